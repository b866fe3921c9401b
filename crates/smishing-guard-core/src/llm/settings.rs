use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_INPUT_CHARS: usize = 4000;
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 50;

/// Process-wide provider configuration, read once at startup and passed into
/// adapter constructors.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub provider: String,
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub ocr_model: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_input_chars: usize,
    /// Stronger model used when the summed signal weight of a message reaches
    /// `escalation_threshold`.
    pub escalation_model: Option<String>,
    pub escalation_threshold: u32,
}

impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("ocr_model", &self.ocr_model)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("max_input_chars", &self.max_input_chars)
            .field("escalation_model", &self.escalation_model)
            .field("escalation_threshold", &self.escalation_threshold)
            .finish()
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            api_key: String::new(),
            endpoint: None,
            model: None,
            ocr_model: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: 1,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            escalation_model: None,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
        }
    }
}

impl EngineSettings {
    pub const PROVIDER_ENV: &'static str = "SMISHING_GUARD_PROVIDER";
    pub const API_KEY_ENV: &'static str = "SMISHING_GUARD_API_KEY";
    pub const ENDPOINT_ENV: &'static str = "SMISHING_GUARD_ENDPOINT";
    pub const MODEL_ENV: &'static str = "SMISHING_GUARD_MODEL";
    pub const OCR_MODEL_ENV: &'static str = "SMISHING_GUARD_OCR_MODEL";
    pub const TIMEOUT_ENV: &'static str = "SMISHING_GUARD_TIMEOUT";
    pub const RETRIES_ENV: &'static str = "SMISHING_GUARD_MAX_RETRIES";
    pub const MAX_INPUT_ENV: &'static str = "SMISHING_GUARD_MAX_INPUT_CHARS";
    pub const ESCALATION_MODEL_ENV: &'static str = "SMISHING_GUARD_ESCALATION_MODEL";
    pub const ESCALATION_THRESHOLD_ENV: &'static str = "SMISHING_GUARD_ESCALATION_THRESHOLD";

    /// Load settings from environment variables.
    ///
    /// * `SMISHING_GUARD_PROVIDER`: `openai` (default) or `anthropic`.
    /// * `SMISHING_GUARD_API_KEY`: API key/token (required).
    /// * `SMISHING_GUARD_TIMEOUT`: `20s`, `1m` or bare seconds (default 30s).
    pub fn from_env() -> Result<Self> {
        Self::from_map(std::env::vars().collect())
    }

    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = get(Self::PROVIDER_ENV)
            .unwrap_or_else(|| "openai".to_string())
            .to_lowercase();
        let api_key = get(Self::API_KEY_ENV).with_context(|| {
            format!("environment variable {} must be set", Self::API_KEY_ENV)
        })?;
        let timeout = match get(Self::TIMEOUT_ENV) {
            Some(raw) => parse_timeout(&raw)?,
            None => DEFAULT_TIMEOUT,
        };
        let max_retries = get(Self::RETRIES_ENV)
            .map(|raw| {
                raw.parse::<u32>()
                    .with_context(|| format!("invalid {} value `{raw}`", Self::RETRIES_ENV))
            })
            .transpose()?
            .unwrap_or(1)
            .min(1);
        let max_input_chars = get(Self::MAX_INPUT_ENV)
            .map(|raw| {
                raw.parse::<usize>()
                    .with_context(|| format!("invalid {} value `{raw}`", Self::MAX_INPUT_ENV))
            })
            .transpose()?
            .unwrap_or(DEFAULT_MAX_INPUT_CHARS);
        if max_input_chars == 0 {
            bail!("{} must be greater than zero", Self::MAX_INPUT_ENV);
        }
        let escalation_threshold = get(Self::ESCALATION_THRESHOLD_ENV)
            .map(|raw| {
                raw.parse::<u32>().with_context(|| {
                    format!("invalid {} value `{raw}`", Self::ESCALATION_THRESHOLD_ENV)
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_ESCALATION_THRESHOLD);

        Ok(Self {
            provider,
            api_key,
            endpoint: get(Self::ENDPOINT_ENV),
            model: get(Self::MODEL_ENV),
            ocr_model: get(Self::OCR_MODEL_ENV),
            timeout,
            max_retries,
            max_input_chars,
            escalation_model: get(Self::ESCALATION_MODEL_ENV),
            escalation_threshold,
        })
    }
}

/// Accepts humantime durations (`20s`, `1m 30s`) or a bare number of seconds.
pub fn parse_timeout(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let timeout = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(raw)
            .with_context(|| format!("invalid timeout `{raw}`"))?,
    };
    if timeout.is_zero() {
        bail!("timeout must be greater than zero");
    }
    Ok(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn with_env_lock<F: FnOnce()>(func: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        func();
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_openai_provider() {
        with_env_lock(|| {
            env::remove_var(EngineSettings::PROVIDER_ENV);
            env::set_var(EngineSettings::API_KEY_ENV, "secret");
            env::remove_var(EngineSettings::ENDPOINT_ENV);
            env::remove_var(EngineSettings::MODEL_ENV);
            env::remove_var(EngineSettings::OCR_MODEL_ENV);
            env::remove_var(EngineSettings::TIMEOUT_ENV);
            env::remove_var(EngineSettings::RETRIES_ENV);
            env::remove_var(EngineSettings::MAX_INPUT_ENV);
            env::remove_var(EngineSettings::ESCALATION_MODEL_ENV);
            env::remove_var(EngineSettings::ESCALATION_THRESHOLD_ENV);

            let settings = EngineSettings::from_env().expect("should load settings");
            assert_eq!(settings.provider, "openai");
            assert_eq!(settings.api_key, "secret");
            assert!(settings.endpoint.is_none());
            assert!(settings.model.is_none());
            assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
            assert_eq!(settings.max_retries, 1);
            assert_eq!(settings.max_input_chars, DEFAULT_MAX_INPUT_CHARS);
            assert!(settings.escalation_model.is_none());
            assert_eq!(settings.escalation_threshold, DEFAULT_ESCALATION_THRESHOLD);
            env::remove_var(EngineSettings::API_KEY_ENV);
        });
    }

    #[test]
    fn errors_when_api_key_missing() {
        let err = EngineSettings::from_map(vars(&[(EngineSettings::PROVIDER_ENV, "openai")]))
            .expect_err("missing API key should error");
        assert!(err.to_string().contains(EngineSettings::API_KEY_ENV));
    }

    #[test]
    fn parses_timeout_and_caps_retries() {
        let settings = EngineSettings::from_map(vars(&[
            (EngineSettings::API_KEY_ENV, "secret"),
            (EngineSettings::PROVIDER_ENV, " Anthropic "),
            (EngineSettings::TIMEOUT_ENV, "15s"),
            (EngineSettings::RETRIES_ENV, "5"),
            (EngineSettings::MAX_INPUT_ENV, "1200"),
        ]))
        .expect("should parse settings");
        assert_eq!(settings.provider, "anthropic");
        assert_eq!(settings.timeout, Duration::from_secs(15));
        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.max_input_chars, 1200);
    }

    #[test]
    fn reads_escalation_model_and_threshold() {
        let settings = EngineSettings::from_map(vars(&[
            (EngineSettings::API_KEY_ENV, "secret"),
            (EngineSettings::ESCALATION_MODEL_ENV, "gpt-4o"),
            (EngineSettings::ESCALATION_THRESHOLD_ENV, "60"),
        ]))
        .expect("should parse settings");
        assert_eq!(settings.escalation_model.as_deref(), Some("gpt-4o"));
        assert_eq!(settings.escalation_threshold, 60);

        let err = EngineSettings::from_map(vars(&[
            (EngineSettings::API_KEY_ENV, "secret"),
            (EngineSettings::ESCALATION_THRESHOLD_ENV, "high"),
        ]))
        .expect_err("non-numeric threshold should error");
        assert!(err.to_string().contains(EngineSettings::ESCALATION_THRESHOLD_ENV));
    }

    #[test]
    fn bare_seconds_are_accepted() {
        assert_eq!(parse_timeout("20").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_timeout("1m").unwrap(), Duration::from_secs(60));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn rejects_zero_input_cap() {
        let err = EngineSettings::from_map(vars(&[
            (EngineSettings::API_KEY_ENV, "secret"),
            (EngineSettings::MAX_INPUT_ENV, "0"),
        ]))
        .expect_err("zero cap should error");
        assert!(err.to_string().contains(EngineSettings::MAX_INPUT_ENV));
    }

    #[test]
    fn debug_output_redacts_key() {
        let settings = EngineSettings {
            api_key: "sk-very-secret".into(),
            ..EngineSettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
