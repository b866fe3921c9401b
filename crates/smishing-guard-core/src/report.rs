use std::fmt::Write;

use crate::assemble::AnalysisResult;

/// Format styles supported by [`render_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Produce printable output for an `AnalysisResult` in the desired format.
pub fn render_result(result: &AnalysisResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(result),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}

fn render_human(result: &AnalysisResult) -> anyhow::Result<String> {
    let verdict = &result.verdict;
    let mut out = String::new();
    writeln!(
        out,
        "위험 점수: {}/100 ({} · {:?})",
        verdict.risk_score(),
        verdict.risk_tier().label_ko(),
        verdict.risk_tier()
    )?;
    let source = if result.was_image {
        "이미지에서 추출한 텍스트"
    } else {
        "입력한 텍스트"
    };
    writeln!(out, "분석 대상: {source}")?;
    if result.truncated {
        writeln!(out, "참고: 메시지가 길어 앞부분만 분석했습니다.")?;
    }

    writeln!(out)?;
    if verdict.reasons().is_empty() {
        writeln!(out, "판단 근거: 특별한 위험 요소가 발견되지 않았습니다.")?;
    } else {
        writeln!(out, "판단 근거:")?;
        for reason in verdict.reasons() {
            writeln!(out, "  - {}", single_line(reason))?;
        }
    }

    if !verdict.recommended_actions().is_empty() {
        writeln!(out)?;
        writeln!(out, "권장 행동:")?;
        for (idx, action) in verdict.recommended_actions().iter().enumerate() {
            writeln!(out, "  {}. {}", idx + 1, single_line(action))?;
        }
    }

    if !result.signals.is_empty() {
        writeln!(out)?;
        writeln!(out, "규칙 점검:")?;
        for signal in &result.signals {
            writeln!(
                out,
                "  - {id} [{weight:.0}] {desc}",
                id = signal.rule_id,
                weight = signal.weight,
                desc = signal.description,
            )?;
            if !signal.excerpt.trim().is_empty() {
                writeln!(out, "    \"{}\"", single_line(&signal.excerpt))?;
            }
        }
    }

    Ok(out)
}

fn single_line(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}
