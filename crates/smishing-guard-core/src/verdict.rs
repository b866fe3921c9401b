use serde::{Deserialize, Serialize};

pub const MAX_SCORE: u8 = 100;

/// Score boundaries separating the three risk tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Lowest score classified as [`RiskTier::Caution`].
    pub caution: u8,
    /// Lowest score classified as [`RiskTier::Dangerous`].
    pub dangerous: u8,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            caution: 30,
            dangerous: 70,
        }
    }
}

impl RiskThresholds {
    /// Build thresholds, rejecting boundaries that leave a tier empty or
    /// exceed the score range.
    pub fn new(caution: u8, dangerous: u8) -> Option<Self> {
        (0 < caution && caution < dangerous && dangerous <= MAX_SCORE)
            .then_some(Self { caution, dangerous })
    }
}

/// Coarse bucket derived from the numeric risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Safe,
    Caution,
    Dangerous,
}

impl RiskTier {
    /// Map a score into a tier with the default thresholds.
    pub fn from_score(score: u8) -> Self {
        Self::from_score_with_thresholds(score, &RiskThresholds::default())
    }

    pub fn from_score_with_thresholds(score: u8, thresholds: &RiskThresholds) -> Self {
        if score >= thresholds.dangerous {
            Self::Dangerous
        } else if score >= thresholds.caution {
            Self::Caution
        } else {
            Self::Safe
        }
    }

    pub fn label_ko(self) -> &'static str {
        match self {
            Self::Safe => "안전",
            Self::Caution => "주의",
            Self::Dangerous => "위험",
        }
    }
}

/// Validated classification of one model completion. Fields are private so the
/// tier can never drift from the score after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    risk_score: u8,
    risk_tier: RiskTier,
    reasons: Vec<String>,
    recommended_actions: Vec<String>,
}

impl Verdict {
    /// Clamp the score, derive the tier and enforce that reasons are only
    /// empty for a zero score.
    pub fn new(
        raw_score: i64,
        reasons: Vec<String>,
        recommended_actions: Vec<String>,
        thresholds: &RiskThresholds,
    ) -> Self {
        let risk_score = raw_score.clamp(0, i64::from(MAX_SCORE)) as u8;
        let risk_tier = RiskTier::from_score_with_thresholds(risk_score, thresholds);
        let mut reasons = reasons;
        if reasons.is_empty() && risk_score > 0 {
            reasons.push(unexplained_reason(risk_score, risk_tier));
        }
        Self {
            risk_score,
            risk_tier,
            reasons,
            recommended_actions,
        }
    }

    pub fn risk_score(&self) -> u8 {
        self.risk_score
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn recommended_actions(&self) -> &[String] {
        &self.recommended_actions
    }
}

fn unexplained_reason(score: u8, tier: RiskTier) -> String {
    format!(
        "분석 모델이 구체적인 근거 없이 위험 점수 {score}점({})으로 평가했습니다.",
        tier.label_ko()
    )
}
