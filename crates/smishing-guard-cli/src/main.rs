use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use smishing_guard_core::{
    render_result, AnalysisEngine, AnalysisEngineBuilder, AnalysisRequest, AnalysisResult,
    OutputFormat, RiskTier,
};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

#[derive(Parser, Debug)]
#[command(
    name = "smishing-guard",
    author,
    version,
    about = "Korean smishing (SMS phishing) analysis CLI"
)]
struct Cli {
    /// Optional TOML config file; SMISHING_GUARD_* environment variables override it
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze one message given as text, as a screenshot, or on stdin
    Analyze {
        /// Message text to analyze
        #[arg(long, conflicts_with = "image")]
        text: Option<String>,
        /// Screenshot of the message (PNG, JPEG, GIF, WEBP or BMP)
        #[arg(long, value_name = "PATH")]
        image: Option<PathBuf>,
        /// Emit the result as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
        /// Skip the local rule-based signal scan
        #[arg(long)]
        no_signals: bool,
    },
    /// Serve the analysis engine over HTTP
    Serve {
        /// Listen address (defaults to the config file value or 127.0.0.1:8080)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let app = config::load(cli.config.as_deref())?;
    let builder = AnalysisEngineBuilder::from_settings(&app.engine)?.log_raw_output(app.debug_output);

    match cli.command {
        Commands::Analyze {
            text,
            image,
            json,
            no_signals,
        } => {
            let engine = builder.signals(!no_signals).build()?;
            let request = read_request(text, image).await?;
            let format = if json {
                OutputFormat::Json
            } else {
                OutputFormat::Human
            };
            analyze(&engine, &request, format).await
        }
        Commands::Serve { bind } => {
            let engine = builder.build()?;
            let bind = bind.unwrap_or(app.bind);
            server::serve(engine, &bind).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn read_request(text: Option<String>, image: Option<PathBuf>) -> Result<AnalysisRequest> {
    if let Some(text) = text {
        return Ok(AnalysisRequest::text(text));
    }
    if let Some(path) = image {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read image {}", path.display()))?;
        return Ok(AnalysisRequest::image(bytes));
    }
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .context("failed to read message from stdin")?;
    Ok(AnalysisRequest::text(buffer))
}

async fn analyze(
    engine: &AnalysisEngine,
    request: &AnalysisRequest,
    format: OutputFormat,
) -> Result<ExitCode> {
    match engine.analyze(request).await {
        Ok(result) => {
            if format == OutputFormat::Human {
                println!("{}", tier_badge(&result));
            }
            print!("{}", render_result(&result, format)?);
            if format == OutputFormat::Json {
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!(
                "{} {}",
                format!("error[{}]:", err.code().as_str()).red().bold(),
                err
            );
            if err.is_retryable() {
                eprintln!("{}", "the analysis may succeed if retried".dimmed());
            }
            Ok(if err.is_client_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn tier_badge(result: &AnalysisResult) -> String {
    let tier = result.verdict.risk_tier();
    let label = format!(" {} ", tier.label_ko());
    match tier {
        RiskTier::Safe => label.on_green().black().bold().to_string(),
        RiskTier::Caution => label.on_yellow().black().bold().to_string(),
        RiskTier::Dangerous => label.on_red().white().bold().to_string(),
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
