use std::cmp::Ordering;
use std::collections::HashSet;

use aho_corasick::{AhoCorasick, MatchKind};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace};

const DEFAULT_CONTEXT_WINDOW: usize = 24;
const MAX_EXCERPT_CHARS: usize = 120;

pub type Span = (usize, usize);

/// Deterministic evidence found in the message before the model is asked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub rule_id: String,
    pub description: String,
    pub excerpt: String,
    pub weight: f32,
    #[serde(skip)]
    pub span: Span,
}

/// A family of literal keywords reported under one rule id.
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule {
    pub id: &'static str,
    pub description: &'static str,
    pub weight: f32,
    pub keywords: &'static [&'static str],
}

pub const SENSITIVE_ACTION: KeywordRule = KeywordRule {
    id: "SENSITIVE_ACTION",
    description: "비밀번호·계좌·인증 등 민감한 행위를 요구합니다",
    weight: 20.0,
    keywords: &[
        "비밀번호", "password", "재설정", "결제", "payment", "환불", "refund", "주민등록",
        "주민번호", "신분증", "계좌", "account", "카드번호", "인증번호", "본인확인",
        "verification", "로그인", "login", "앱 설치", "송금", "이체",
    ],
};

pub const URGENCY: KeywordRule = KeywordRule {
    id: "URGENCY",
    description: "긴급성을 강조하는 표현이 있습니다",
    weight: 10.0,
    keywords: &[
        "즉시", "긴급", "지금 바로", "오늘 중", "24시간", "마감", "정지 예정", "차단 예정",
        "urgent",
    ],
};

pub const IMPERSONATION: KeywordRule = KeywordRule {
    id: "IMPERSONATION",
    description: "공공기관·금융사·택배사 명칭을 사용합니다",
    weight: 10.0,
    keywords: &[
        "택배", "배송", "은행", "국세청", "경찰", "검찰", "금융감독원", "건강보험",
        "우체국", "카드사", "쿠팡", "네이버", "카카오", "지원금",
    ],
};

pub const DEFAULT_KEYWORD_RULES: &[KeywordRule] = &[SENSITIVE_ACTION, URGENCY, IMPERSONATION];

const SHORTENER_HOSTS: &[&str] = &[
    "bit.ly", "tinyurl.com", "gg.gg", "han.gl", "me2.do", "goo.gl", "t.co", "ow.ly", "is.gd",
    "buff.ly", "adf.ly", "shorturl.at", "vo.la", "url.kr", "c11.kr",
];
const SUSPICIOUS_TLDS: &[&str] = &[".tk", ".ml", ".ga", ".cf", ".gq", ".xyz", ".top", ".work"];
const LURE_TOKENS: &[&str] = &[
    "verify", "secure", "update", "confirm", "suspended", "limited", "restricted", "login",
];

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    let shorteners = SHORTENER_HOSTS
        .iter()
        .map(|host| regex::escape(host))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r#"(?i)(?:https?://|www\.)[^\s<>"'()]+|\b(?:{shorteners})/[^\s<>"'()]+"#
    ))
    .expect("URL regex is valid")
});
static IPV4_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}$").expect("IPv4 regex is valid"));

/// Keyword and URL heuristics over normalized message text.
pub struct SignalScanner {
    automaton: AhoCorasick,
    patterns: Vec<(usize, &'static str)>,
    rules: Vec<KeywordRule>,
}

impl SignalScanner {
    pub fn new() -> Result<Self> {
        Self::with_rules(DEFAULT_KEYWORD_RULES)
    }

    pub fn with_rules(rules: &[KeywordRule]) -> Result<Self> {
        let patterns: Vec<(usize, &'static str)> = rules
            .iter()
            .enumerate()
            .flat_map(|(idx, rule)| rule.keywords.iter().map(move |kw| (idx, *kw)))
            .collect();
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostLongest)
            .build(patterns.iter().map(|(_, kw)| *kw))
            .context("failed to build keyword automaton for signal rules")?;
        Ok(Self {
            automaton,
            patterns,
            rules: rules.to_vec(),
        })
    }

    pub fn scan(&self, text: &str) -> Vec<Signal> {
        let mut signals = Vec::new();
        let mut seen = HashSet::new();

        let mut has_sensitive = false;
        for mat in self.automaton.find_iter(text) {
            let Some(&(rule_idx, keyword)) = self.patterns.get(mat.pattern().as_usize()) else {
                continue;
            };
            let rule = &self.rules[rule_idx];
            if rule.id == SENSITIVE_ACTION.id {
                has_sensitive = true;
            }
            if !seen.insert((rule.id, keyword.to_lowercase())) {
                continue;
            }
            trace!(rule_id = rule.id, keyword, "keyword signal");
            push_signal(
                &mut signals,
                text,
                rule.id,
                rule.description.to_string(),
                rule.weight,
                (mat.start(), mat.end()),
            );
        }

        let mut url_count = 0usize;
        let mut first_url = None;
        for mat in URL_RE.find_iter(text) {
            url_count += 1;
            let span = (mat.start(), mat.end());
            first_url.get_or_insert(span);
            for (rule_id, description, weight) in url_findings(mat.as_str()) {
                push_signal(&mut signals, text, rule_id, description, weight, span);
            }
        }

        if let Some(first_url) = first_url.filter(|_| has_sensitive) {
            push_signal(
                &mut signals,
                text,
                "LINK_SENSITIVE_COMBO",
                "민감한 행위를 문자 속 링크로 유도합니다".to_string(),
                30.0,
                first_url,
            );
        }

        signals.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.span.0.cmp(&b.span.0))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        debug!(signals = signals.len(), urls = url_count, "signal scan completed");
        signals
    }
}

/// Extract every link-like token from `text`.
pub fn extract_urls(text: &str) -> Vec<&str> {
    URL_RE.find_iter(text).map(|m| m.as_str()).collect()
}

fn url_host(url: &str) -> String {
    let lower = url.to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or(host);
    host.split(':').next().unwrap_or(host).to_string()
}

fn url_findings(url: &str) -> Vec<(&'static str, String, f32)> {
    let host = url_host(url);
    let lower = url.to_lowercase();
    let mut findings = Vec::new();

    if SHORTENER_HOSTS
        .iter()
        .any(|short| host == *short || host.ends_with(&format!(".{short}")))
    {
        findings.push(("URL_SHORTENER", format!("단축 URL을 사용합니다 ({host})"), 40.0));
    }
    if SUSPICIOUS_TLDS.iter().any(|tld| host.ends_with(tld)) {
        findings.push((
            "URL_SUSPICIOUS_TLD",
            format!("의심스러운 도메인 확장자입니다 ({host})"),
            35.0,
        ));
    }
    if IPV4_HOST.is_match(&host) {
        findings.push(("URL_IP_HOST", format!("IP 주소로 직접 연결합니다 ({host})"), 40.0));
    }
    if host
        .chars()
        .any(|c| ('\u{0370}'..='\u{03FF}').contains(&c) || ('\u{0400}'..='\u{04FF}').contains(&c))
    {
        findings.push((
            "URL_HOMOGLYPH",
            format!("도메인에 위장 문자(키릴/그리스 문자)가 섞여 있습니다 ({host})"),
            50.0,
        ));
    }
    if let Some(token) = LURE_TOKENS.iter().find(|token| lower.contains(*token)) {
        findings.push((
            "URL_LURE_TOKEN",
            format!("링크에 의심 키워드 '{token}'가 포함되어 있습니다"),
            25.0,
        ));
    }
    if host.chars().count() > 30 {
        findings.push(("URL_LONG_HOST", "비정상적으로 긴 도메인입니다".to_string(), 20.0));
    }
    if host.matches('-').count() > 3 {
        findings.push(("URL_HYPHENS", "도메인에 하이픈이 과도하게 많습니다".to_string(), 15.0));
    }
    findings
}

fn push_signal(
    signals: &mut Vec<Signal>,
    text: &str,
    rule_id: &str,
    description: String,
    weight: f32,
    span: Span,
) {
    signals.push(Signal {
        rule_id: rule_id.to_string(),
        description,
        excerpt: extract_excerpt(text, span, DEFAULT_CONTEXT_WINDOW),
        weight,
        span,
    });
}

fn extract_excerpt(input: &str, span: Span, window: usize) -> String {
    let start = saturating_char_boundary(input, span.0.saturating_sub(window));
    let end = saturating_char_boundary_forward(input, span.1 + window);
    input[start..end]
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .take(MAX_EXCERPT_CHARS)
        .collect()
}

fn saturating_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor > 0 && !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

fn saturating_char_boundary_forward(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor < text.len() && !text.is_char_boundary(cursor) {
        cursor += 1;
    }
    cursor
}
