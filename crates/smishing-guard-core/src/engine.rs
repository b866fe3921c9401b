use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::assemble::{assemble, AnalysisResult};
use crate::error::AnalysisError;
use crate::llm::{build_model_client, EngineSettings, ModelClient, ProviderKind};
use crate::normalize::Normalizer;
use crate::ocr::{OcrAdapter, UnavailableOcr, VisionOcr};
use crate::parser::VerdictParser;
use crate::prompt::PromptBuilder;
use crate::request::AnalysisRequest;
use crate::signals::{Signal, SignalScanner};
use crate::verdict::RiskThresholds;

/// The analysis pipeline: normalize, scan, prompt, complete, parse, assemble.
///
/// Holds no per-request state, so one engine can serve concurrent requests.
/// Dropping the future returned by [`AnalysisEngine::analyze`] cancels any
/// in-flight OCR or model call.
pub struct AnalysisEngine {
    normalizer: Normalizer,
    scanner: Option<SignalScanner>,
    prompts: PromptBuilder,
    model: Arc<dyn ModelClient>,
    escalation: Option<Escalation>,
    parser: VerdictParser,
}

/// A stronger model for messages whose local signals already look risky.
struct Escalation {
    model: Arc<dyn ModelClient>,
    threshold: f32,
}

impl AnalysisEngine {
    pub fn builder(model: Arc<dyn ModelClient>) -> AnalysisEngineBuilder {
        AnalysisEngineBuilder::new(model)
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        AnalysisEngineBuilder::from_settings(settings)?.build()
    }

    #[instrument(name = "analyze", skip_all, fields(source = ?request.source_kind))]
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let input = self.normalizer.normalize(request).await?;
        let signals = self
            .scanner
            .as_ref()
            .map(|scanner| scanner.scan(input.text()))
            .unwrap_or_default();
        debug!(
            chars = input.char_len(),
            truncated = input.truncated(),
            signals = signals.len(),
            "input normalized"
        );

        let payload = self.prompts.build_with_signals(&input, &signals);
        let raw = self.model_for(&signals).complete(&payload).await?;
        let verdict = self.parser.parse(&raw)?;
        info!(
            score = verdict.risk_score(),
            tier = ?verdict.risk_tier(),
            was_image = input.was_image(),
            "analysis complete"
        );

        Ok(assemble(verdict, input.was_image(), input.truncated()).with_signals(signals))
    }

    fn model_for(&self, signals: &[Signal]) -> &dyn ModelClient {
        let local_risk: f32 = signals.iter().map(|signal| signal.weight).sum();
        match &self.escalation {
            Some(escalation) if local_risk >= escalation.threshold => {
                info!(local_risk, threshold = escalation.threshold, "escalating to stronger model");
                escalation.model.as_ref()
            }
            _ => self.model.as_ref(),
        }
    }
}

pub struct AnalysisEngineBuilder {
    model: Arc<dyn ModelClient>,
    escalation: Option<Escalation>,
    ocr: Arc<dyn OcrAdapter>,
    max_input_chars: usize,
    max_image_bytes: Option<usize>,
    thresholds: RiskThresholds,
    signals: bool,
    log_raw_output: bool,
}

impl AnalysisEngineBuilder {
    fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            escalation: None,
            ocr: Arc::new(UnavailableOcr::default()),
            max_input_chars: crate::llm::settings::DEFAULT_MAX_INPUT_CHARS,
            max_image_bytes: None,
            thresholds: RiskThresholds::default(),
            signals: true,
            log_raw_output: false,
        }
    }

    /// Wire the configured provider. Image OCR uses the vision endpoint of the
    /// OpenAI provider; other providers get an adapter that reports itself
    /// unavailable. An `escalation_model` gets its own client on the same
    /// provider.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let model = build_model_client(settings)?;
        let ocr: Arc<dyn OcrAdapter> = match ProviderKind::parse(&settings.provider)? {
            ProviderKind::OpenAi => Arc::new(VisionOcr::new(settings)?),
            ProviderKind::Anthropic => Arc::new(UnavailableOcr::new(
                "image analysis requires the openai provider",
            )),
        };
        let mut builder = Self::new(model)
            .ocr(ocr)
            .max_input_chars(settings.max_input_chars);
        if let Some(name) = &settings.escalation_model {
            let escalated = EngineSettings {
                model: Some(name.clone()),
                ..settings.clone()
            };
            builder = builder.escalation(
                build_model_client(&escalated)?,
                settings.escalation_threshold as f32,
            );
        }
        Ok(builder)
    }

    /// Route messages whose summed signal weight reaches `threshold` to
    /// `model`. Has no effect when the signal scan is disabled.
    pub fn escalation(mut self, model: Arc<dyn ModelClient>, threshold: f32) -> Self {
        self.escalation = Some(Escalation { model, threshold });
        self
    }

    pub fn ocr(mut self, ocr: Arc<dyn OcrAdapter>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn max_input_chars(mut self, max_chars: usize) -> Self {
        self.max_input_chars = max_chars;
        self
    }

    pub fn max_image_bytes(mut self, max_bytes: usize) -> Self {
        self.max_image_bytes = Some(max_bytes);
        self
    }

    pub fn thresholds(mut self, thresholds: RiskThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Toggle the local signal scan (enabled by default).
    pub fn signals(mut self, enabled: bool) -> Self {
        self.signals = enabled;
        self
    }

    pub fn log_raw_output(mut self, enabled: bool) -> Self {
        self.log_raw_output = enabled;
        self
    }

    pub fn build(self) -> Result<AnalysisEngine> {
        let mut normalizer = Normalizer::new(self.ocr).with_max_chars(self.max_input_chars);
        if let Some(max_bytes) = self.max_image_bytes {
            normalizer = normalizer.with_max_image_bytes(max_bytes);
        }
        let scanner = if self.signals {
            Some(SignalScanner::new()?)
        } else {
            None
        };
        Ok(AnalysisEngine {
            prompts: PromptBuilder::new(normalizer.max_chars()),
            normalizer,
            scanner,
            model: self.model,
            escalation: self.escalation,
            parser: VerdictParser::new(self.thresholds).with_raw_logging(self.log_raw_output),
        })
    }
}
