use serde::Serialize;

use crate::signals::Signal;
use crate::verdict::Verdict;

/// Final artifact returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub was_image: bool,
    pub truncated: bool,
    /// Local rule findings; informational only, never folded into the score.
    pub signals: Vec<Signal>,
}

impl AnalysisResult {
    pub fn with_signals(mut self, signals: Vec<Signal>) -> Self {
        self.signals = signals;
        self
    }
}

pub fn assemble(verdict: Verdict, was_image: bool, truncated: bool) -> AnalysisResult {
    AnalysisResult {
        verdict,
        was_image,
        truncated,
        signals: Vec::new(),
    }
}
