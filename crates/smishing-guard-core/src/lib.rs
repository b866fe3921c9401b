pub mod assemble;
pub mod engine;
pub mod error;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod request;
pub mod signals;
pub mod verdict;

pub use assemble::{assemble, AnalysisResult};
pub use engine::{AnalysisEngine, AnalysisEngineBuilder};
pub use error::{AnalysisError, ErrorCode, ModelError, OcrError};
pub use llm::{
    build_model_client, EngineSettings, ModelClient, ProviderKind, RawCompletion, RetryPolicy,
    RetryingClient,
};
pub use normalize::Normalizer;
pub use ocr::{ImageFormat, OcrAdapter, UnavailableOcr, VisionOcr};
pub use parser::{ParseMode, VerdictParser};
pub use prompt::{ModelPayload, PromptBuilder, PROMPT_VERSION};
pub use report::{render_result, OutputFormat};
pub use request::{AnalysisRequest, NormalizedInput, SourceKind};
pub use signals::{Signal, SignalScanner};
pub use verdict::{RiskThresholds, RiskTier, Verdict};
