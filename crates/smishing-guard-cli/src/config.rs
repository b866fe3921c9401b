use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use smishing_guard_core::EngineSettings;

pub const DEBUG_ENV: &str = "SMISHING_GUARD_DEBUG";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Optional TOML file. Every key mirrors one `SMISHING_GUARD_*` variable;
/// the environment wins when both are set.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    provider: Option<String>,
    api_key: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    ocr_model: Option<String>,
    timeout: Option<String>,
    max_retries: Option<u32>,
    max_input_chars: Option<usize>,
    escalation_model: Option<String>,
    escalation_threshold: Option<u32>,
    debug: Option<bool>,
    server: ServerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    bind: Option<String>,
}

impl FileConfig {
    fn into_vars(self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.insert(key.to_string(), value);
            }
        };
        put(EngineSettings::PROVIDER_ENV, self.provider);
        put(EngineSettings::API_KEY_ENV, self.api_key);
        put(EngineSettings::ENDPOINT_ENV, self.endpoint);
        put(EngineSettings::MODEL_ENV, self.model);
        put(EngineSettings::OCR_MODEL_ENV, self.ocr_model);
        put(EngineSettings::TIMEOUT_ENV, self.timeout);
        put(
            EngineSettings::RETRIES_ENV,
            self.max_retries.map(|v| v.to_string()),
        );
        put(
            EngineSettings::MAX_INPUT_ENV,
            self.max_input_chars.map(|v| v.to_string()),
        );
        put(EngineSettings::ESCALATION_MODEL_ENV, self.escalation_model);
        put(
            EngineSettings::ESCALATION_THRESHOLD_ENV,
            self.escalation_threshold.map(|v| v.to_string()),
        );
        put(DEBUG_ENV, self.debug.map(|v| if v { "1" } else { "0" }.to_string()));
        vars
    }
}

/// Everything the CLI needs, resolved once at startup.
#[derive(Debug)]
pub struct AppConfig {
    pub engine: EngineSettings,
    pub bind: String,
    pub debug_output: bool,
}

pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    load_with_env(path, std::env::vars().collect())
}

pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<AppConfig> {
    let file = match path {
        Some(path) => read_file(path)?,
        None => FileConfig::default(),
    };
    let bind = file.server.bind.clone();

    let mut vars = file.into_vars();
    vars.extend(
        env.into_iter()
            .filter(|(key, value)| key.starts_with("SMISHING_GUARD_") && !value.trim().is_empty()),
    );

    let debug_output = vars.get(DEBUG_ENV).is_some_and(|value| flag_enabled(value));
    let engine = EngineSettings::from_map(vars)
        .context("set the value in the environment or in the --config file")?;

    Ok(AppConfig {
        engine,
        bind: bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
        debug_output,
    })
}

/// `0`, `false`, `no` and `off` (any case) switch a flag off; any other value switches it on.
fn flag_enabled(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    !matches!(value.as_str(), "" | "0" | "false" | "no" | "off")
}

fn read_file(path: &Path) -> Result<FileConfig> {
    ::config::Config::builder()
        .add_source(::config::File::from(path.to_path_buf()).format(::config::FileFormat::Toml))
        .build()
        .with_context(|| format!("failed to read config file {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("invalid config file {}", path.display()))
}
