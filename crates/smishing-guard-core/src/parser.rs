//! Verdict parsing for free-form model output.
//!
//! Parsing runs as a small state machine: a strict structured pass, then a
//! lenient line-oriented recovery pass, then failure. Whatever tier label the
//! model emitted is ignored in favour of the threshold function.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::llm::RawCompletion;
use crate::verdict::{RiskThresholds, RiskTier, Verdict};

const MAX_ITEMS: usize = 10;
const MAX_ITEM_CHARS: usize = 300;

static LABELLED_SCORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:risk[_ ]?score|score|위험\s*점수|위험도|점수)[^\d\-\n]{0,12}(-?\d+)")
        .expect("labelled score regex is valid")
});
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+").expect("integer regex is valid"));
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•·▪]|\d{1,2}[.)])\s+").expect("list marker regex is valid")
});

/// Which pass produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Strict,
    Lenient,
    Exhausted,
}

#[derive(Debug, Default)]
struct Extracted {
    score: i64,
    tier_label: Option<String>,
    reasons: Vec<String>,
    actions: Vec<String>,
}

/// Turns a [`RawCompletion`] into a validated [`Verdict`].
#[derive(Debug, Clone, Default)]
pub struct VerdictParser {
    thresholds: RiskThresholds,
    log_raw: bool,
}

impl VerdictParser {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self {
            thresholds,
            log_raw: false,
        }
    }

    /// Log unparseable completions verbatim (may contain message text).
    pub fn with_raw_logging(mut self, enabled: bool) -> Self {
        self.log_raw = enabled;
        self
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn parse(&self, raw: &RawCompletion) -> Result<Verdict, AnalysisError> {
        self.parse_with_mode(raw).map(|(verdict, _)| verdict)
    }

    pub fn parse_with_mode(
        &self,
        raw: &RawCompletion,
    ) -> Result<(Verdict, ParseMode), AnalysisError> {
        let text = raw.as_str();
        let mut state = ParseState::Strict;
        loop {
            let (extracted, mode) = match state {
                ParseState::Strict => match parse_strict(text) {
                    Some(found) => (found, ParseMode::Strict),
                    None => {
                        state = ParseState::Lenient;
                        continue;
                    }
                },
                ParseState::Lenient => match parse_lenient(text) {
                    Some(found) => {
                        warn!("model output failed strict parsing; recovered leniently");
                        (found, ParseMode::Lenient)
                    }
                    None => {
                        state = ParseState::Exhausted;
                        continue;
                    }
                },
                ParseState::Exhausted => {
                    if self.log_raw {
                        warn!(raw = text, "unparseable model output");
                    }
                    return Err(AnalysisError::MalformedModelOutput(
                        "no risk score could be recovered from model output".into(),
                    ));
                }
            };
            return Ok((self.finish(extracted), mode));
        }
    }

    fn finish(&self, extracted: Extracted) -> Verdict {
        let verdict = Verdict::new(
            extracted.score,
            clean_items(extracted.reasons),
            clean_items(extracted.actions),
            &self.thresholds,
        );
        if let Some(label) = extracted.tier_label.as_deref() {
            match tier_from_label(label) {
                Some(claimed) if claimed != verdict.risk_tier() => warn!(
                    claimed = ?claimed,
                    derived = ?verdict.risk_tier(),
                    score = verdict.risk_score(),
                    "model tier label disagrees with score; using derived tier"
                ),
                None => debug!(label, "unrecognised tier label ignored"),
                _ => {}
            }
        }
        verdict
    }
}

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    #[serde(default, alias = "riskScore", alias = "score")]
    risk_score: Option<Value>,
    #[serde(
        default,
        alias = "riskLevel",
        alias = "risk_tier",
        alias = "riskTier",
        alias = "tier"
    )]
    risk_level: Option<Value>,
    #[serde(default)]
    reasons: Option<Value>,
    #[serde(
        default,
        alias = "recommended_actions",
        alias = "recommendedActions",
        alias = "actions"
    )]
    safe_actions: Option<Value>,
}

fn parse_strict(raw: &str) -> Option<Extracted> {
    let payload = extract_json_payload(raw);
    let verdict = parse_model_json(&payload)?;
    let score = verdict.risk_score.as_ref().and_then(score_from_value)?;
    Some(Extracted {
        score,
        tier_label: verdict
            .risk_level
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string),
        reasons: verdict.reasons.as_ref().map(string_list).unwrap_or_default(),
        actions: verdict
            .safe_actions
            .as_ref()
            .map(string_list)
            .unwrap_or_default(),
    })
}

fn parse_model_json(payload: &str) -> Option<ModelVerdict> {
    if let Ok(verdict) = serde_json::from_str::<ModelVerdict>(payload) {
        return Some(verdict);
    }
    let sanitized = sanitize_json_strings(payload);
    if sanitized != payload {
        if let Ok(verdict) = serde_json::from_str::<ModelVerdict>(&sanitized) {
            return Some(verdict);
        }
    }
    let value: Value = json5::from_str(&sanitized).ok()?;
    serde_json::from_value(value).ok()
}

fn score_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => first_integer(s),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) => s
            .lines()
            .map(|line| LIST_MARKER.replace(line, "").into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Reasons,
    Actions,
}

fn parse_lenient(raw: &str) -> Option<Extracted> {
    let score = lenient_score(raw)?;
    let mut extracted = Extracted {
        score,
        ..Extracted::default()
    };
    let mut section = Section::Reasons;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(marker) = LIST_MARKER.find(line) {
            let item = line[marker.end()..].trim().to_string();
            match section {
                Section::Reasons => extracted.reasons.push(item),
                Section::Actions => extracted.actions.push(item),
            }
            continue;
        }
        if let Some(next) = section_heading(trimmed) {
            section = next;
        }
        if extracted.tier_label.is_none() {
            extracted.tier_label = inline_tier_label(trimmed);
        }
    }
    Some(extracted)
}

/// Labelled score first, then the first in-range integer that is not a list
/// marker, then the first integer of any size (clamped later).
fn lenient_score(raw: &str) -> Option<i64> {
    if let Some(caps) = LABELLED_SCORE.captures(raw) {
        return caps.get(1).map(|m| parse_saturating(m.as_str()));
    }
    let mut first_any = None;
    for line in raw.lines() {
        let body = match LIST_MARKER.find(line) {
            Some(marker) => &line[marker.end()..],
            None => line,
        };
        for m in INTEGER.find_iter(body) {
            let value = parse_saturating(m.as_str());
            if (0..=100).contains(&value) {
                return Some(value);
            }
            first_any.get_or_insert(value);
        }
    }
    first_any
}

fn first_integer(text: &str) -> Option<i64> {
    INTEGER.find(text).map(|m| parse_saturating(m.as_str()))
}

fn parse_saturating(digits: &str) -> i64 {
    digits.parse::<i64>().unwrap_or_else(|_| {
        if digits.starts_with('-') {
            i64::MIN
        } else {
            i64::MAX
        }
    })
}

fn section_heading(line: &str) -> Option<Section> {
    let lower = line.to_lowercase();
    const ACTION_WORDS: &[&str] = &[
        "safe_actions", "action", "recommend", "행동", "대처", "조치", "권장", "가이드",
    ];
    const REASON_WORDS: &[&str] = &["reason", "이유", "근거", "판단"];
    if ACTION_WORDS.iter().any(|w| lower.contains(w)) {
        Some(Section::Actions)
    } else if REASON_WORDS.iter().any(|w| lower.contains(w)) {
        Some(Section::Reasons)
    } else {
        None
    }
}

fn inline_tier_label(line: &str) -> Option<String> {
    let lower = line.to_lowercase();
    let (key, value) = lower.split_once(':')?;
    ["level", "tier", "등급", "위험 수준"]
        .iter()
        .any(|k| key.contains(k))
        .then(|| value.trim().trim_matches('"').to_string())
}

fn tier_from_label(label: &str) -> Option<RiskTier> {
    match label.trim().to_lowercase().as_str() {
        "safe" | "low" | "none" | "안전" | "낮음" => Some(RiskTier::Safe),
        "caution" | "medium" | "moderate" | "warning" | "suspicious" | "주의" | "보통" => {
            Some(RiskTier::Caution)
        }
        "dangerous" | "danger" | "high" | "critical" | "malicious" | "위험" | "높음" | "매우 위험" => {
            Some(RiskTier::Dangerous)
        }
        _ => None,
    }
}

fn clean_items(items: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().trim_matches('"').trim();
        if item.is_empty() {
            continue;
        }
        let item: String = item.chars().take(MAX_ITEM_CHARS).collect();
        if !cleaned.contains(&item) {
            cleaned.push(item);
        }
        if cleaned.len() == MAX_ITEMS {
            break;
        }
    }
    cleaned
}

fn extract_json_payload(raw: &str) -> String {
    let trimmed = raw.trim();
    let unfenced = strip_code_fence(trimmed).unwrap_or_else(|| trimmed.to_string());
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => unfenced[start..=end].to_string(),
        (Some(start), None) => unfenced[start..].to_string(),
        _ => unfenced,
    }
}

fn strip_code_fence(input: &str) -> Option<String> {
    let start = input.find("```")?;
    let mut rest = &input[start + 3..];
    rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
    if let Some(stripped) = rest.strip_prefix("json") {
        rest = stripped;
    }
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

/// Escape raw newlines inside string literals and close whatever the model
/// left open, so a truncated object can still be read.
fn sanitize_json_strings(payload: &str) -> String {
    let mut result = String::with_capacity(payload.len());
    let mut in_string = false;
    let mut escape = false;
    let mut closers = Vec::new();

    for ch in payload.chars() {
        if in_string {
            if escape {
                result.push(ch);
                escape = false;
                continue;
            }
            match ch {
                '\\' => {
                    result.push(ch);
                    escape = true;
                }
                '"' => {
                    result.push(ch);
                    in_string = false;
                }
                '\n' => result.push_str("\\n"),
                '\r' => {}
                _ => result.push(ch),
            }
        } else {
            result.push(ch);
            match ch {
                '"' => in_string = true,
                '{' => closers.push('}'),
                '[' => closers.push(']'),
                '}' | ']' => {
                    closers.pop();
                }
                _ => {}
            }
        }
    }

    if in_string {
        result.push('"');
    }
    while let Some(closer) = closers.pop() {
        result.push(closer);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(raw: &str) -> Result<(Verdict, ParseMode), AnalysisError> {
        VerdictParser::default().parse_with_mode(&RawCompletion::from(raw))
    }

    #[test]
    fn parses_strict_json() {
        let (verdict, mode) = parse(
            r#"{"risk_score": 85, "is_smishing": true, "risk_level": "dangerous",
                "reasons": ["단축 URL 사용", "택배사 사칭"], "safe_actions": ["링크를 누르지 마세요"]}"#,
        )
        .unwrap();
        assert_eq!(mode, ParseMode::Strict);
        assert_eq!(verdict.risk_score(), 85);
        assert_eq!(verdict.risk_tier(), RiskTier::Dangerous);
        assert_eq!(verdict.reasons(), ["단축 URL 사용", "택배사 사칭"]);
        assert_eq!(verdict.recommended_actions(), ["링크를 누르지 마세요"]);
    }

    #[test]
    fn strips_code_fences_and_chatter() {
        let raw = "분석 결과입니다.\n```json\n{\"risk_score\": 10, \"reasons\": [\"일상 대화\"], \"safe_actions\": []}\n```\n감사합니다.";
        let (verdict, mode) = parse(raw).unwrap();
        assert_eq!(mode, ParseMode::Strict);
        assert_eq!(verdict.risk_score(), 10);
        assert_eq!(verdict.risk_tier(), RiskTier::Safe);
    }

    #[test]
    fn accepts_relaxed_json_and_aliases() {
        let raw = "{riskScore: '72.6', riskLevel: 'high', reasons: ['링크 유도',], recommendedActions: ['삭제',],}";
        let (verdict, mode) = parse(raw).unwrap();
        assert_eq!(mode, ParseMode::Strict);
        assert_eq!(verdict.risk_score(), 72);
        assert_eq!(verdict.recommended_actions(), ["삭제"]);
    }

    #[test]
    fn rounds_float_scores() {
        let (verdict, _) = parse(r#"{"risk_score": 69.6, "reasons": ["x"]}"#).unwrap();
        assert_eq!(verdict.risk_score(), 70);
        assert_eq!(verdict.risk_tier(), RiskTier::Dangerous);
    }

    #[test]
    fn repairs_raw_newlines_and_truncation() {
        let raw = "{\"risk_score\": 40, \"reasons\": [\"첫 줄\n둘째 줄\"], \"safe_actions\": [\"확인";
        let (verdict, mode) = parse(raw).unwrap();
        assert_eq!(mode, ParseMode::Strict);
        assert_eq!(verdict.risk_score(), 40);
        assert!(verdict.reasons()[0].contains("둘째 줄"));
        assert_eq!(verdict.recommended_actions(), ["확인"]);
    }

    #[test]
    fn model_tier_label_is_never_trusted() {
        let (verdict, _) =
            parse(r#"{"risk_score": 15, "risk_level": "critical", "reasons": ["?"]}"#).unwrap();
        assert_eq!(verdict.risk_tier(), RiskTier::Safe);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let (verdict, _) = parse(r#"{"risk_score": 150, "reasons": ["x"]}"#).unwrap();
        assert_eq!(verdict.risk_score(), 100);
        let (verdict, mode) = parse("150").unwrap();
        assert_eq!(mode, ParseMode::Lenient);
        assert_eq!(verdict.risk_score(), 100);
        assert_eq!(verdict.risk_tier(), RiskTier::Dangerous);
    }

    #[test]
    fn recovers_bulleted_prose() {
        let raw = "위험도: 85\n판단 근거:\n- 단축 URL 사용\n- 택배사 사칭\n\n대처 방법:\n1. 링크를 누르지 마세요\n2) 118에 신고하세요";
        let (verdict, mode) = parse(raw).unwrap();
        assert_eq!(mode, ParseMode::Lenient);
        assert_eq!(verdict.risk_score(), 85);
        assert_eq!(verdict.reasons(), ["단축 URL 사용", "택배사 사칭"]);
        assert_eq!(
            verdict.recommended_actions(),
            ["링크를 누르지 마세요", "118에 신고하세요"]
        );
    }

    #[test]
    fn lenient_skips_list_markers_when_guessing_score() {
        let raw = "1. 링크가 없습니다\n2. 평범한 안부 문자입니다\n종합 평가 5";
        let (verdict, _) = parse(raw).unwrap();
        assert_eq!(verdict.risk_score(), 5);
        assert_eq!(verdict.reasons().len(), 2);
    }

    #[test]
    fn missing_score_is_malformed() {
        for raw in [
            "",
            "I cannot help with that.",
            r#"{"reasons": ["링크"], "safe_actions": []}"#,
            "- 링크 포함\n- 긴급성 강조",
        ] {
            let err = parse(raw).unwrap_err();
            assert!(
                matches!(err, AnalysisError::MalformedModelOutput(_)),
                "expected malformed for {raw:?}"
            );
        }
    }

    #[test]
    fn zero_score_keeps_empty_reasons() {
        let (verdict, _) = parse(r#"{"risk_score": 0, "reasons": [], "safe_actions": []}"#).unwrap();
        assert!(verdict.reasons().is_empty());
        let (verdict, _) = parse(r#"{"risk_score": 5, "reasons": []}"#).unwrap();
        assert_eq!(verdict.reasons().len(), 1);
    }

    #[test]
    fn items_are_deduplicated_and_capped() {
        let reasons: Vec<String> = (0..15).map(|i| format!("\"r{}\"", i % 12)).collect();
        let raw = format!(
            r#"{{"risk_score": 50, "reasons": [{}, "  ", "r0"]}}"#,
            reasons.join(",")
        );
        let (verdict, _) = parse(&raw).unwrap();
        assert_eq!(verdict.reasons().len(), MAX_ITEMS);
        assert_eq!(verdict.reasons()[0], "r0");
    }

    #[test]
    fn reasons_given_as_single_string_are_split() {
        let (verdict, _) =
            parse(r#"{"risk_score": "80점", "reasons": "- 링크\n- 사칭"}"#).unwrap();
        assert_eq!(verdict.risk_score(), 80);
        assert_eq!(verdict.reasons(), ["링크", "사칭"]);
    }

    #[test]
    fn sanitize_closes_unterminated_structures() {
        let sanitized = sanitize_json_strings("{\"a\": [\"x\ny");
        assert_eq!(sanitized, "{\"a\": [\"x\\ny\"]}");
    }

    proptest! {
        #[test]
        fn parsing_is_deterministic(score in -50i64..200, reason in "[가-힣a-z ]{0,20}") {
            let raw = RawCompletion(format!(
                r#"{{"risk_score": {score}, "reasons": ["{reason}"], "safe_actions": ["삭제"]}}"#
            ));
            let parser = VerdictParser::default();
            let first = parser.parse(&raw).unwrap();
            let second = parser.parse(&raw).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert!(first.risk_score() <= 100);
            prop_assert_eq!(first.risk_tier(), RiskTier::from_score(first.risk_score()));
        }

        #[test]
        fn arbitrary_text_never_panics(raw in "\\PC{0,200}") {
            let parser = VerdictParser::default();
            if let Ok(verdict) = parser.parse(&RawCompletion(raw)) {
                prop_assert_eq!(verdict.risk_tier(), RiskTier::from_score(verdict.risk_score()));
            }
        }
    }
}
