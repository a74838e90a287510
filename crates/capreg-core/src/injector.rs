//! Assemble record content into a larger prompt text.
//!
//! Pure formatting: records are rendered in the order given, nothing is
//! selected, ranked or fetched.

use std::fmt::Write as _;

use capreg_state::CapabilityRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionStyle {
    /// One headed section per record with its full content.
    #[default]
    Full,
    /// One bullet line per record.
    Summary,
}

impl std::str::FromStr for InjectionStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(InjectionStyle::Full),
            "summary" => Ok(InjectionStyle::Summary),
            other => Err(format!("unknown injection style: {other}")),
        }
    }
}

/// Append `records` to `base_text`.
///
/// An empty slice returns `base_text` unchanged. Otherwise trailing
/// newlines of `base_text` are dropped and each rendered record follows a
/// blank line.
pub fn render(base_text: &str, records: &[CapabilityRecord], style: InjectionStyle) -> String {
    if records.is_empty() {
        return base_text.to_string();
    }

    let blocks: Vec<String> = match style {
        InjectionStyle::Full => records.iter().map(full_section).collect(),
        InjectionStyle::Summary => vec![records
            .iter()
            .map(summary_line)
            .collect::<Vec<_>>()
            .join("\n")],
    };

    let base = base_text.trim_end_matches(['\n', '\r']);
    let mut out = String::with_capacity(base.len() + blocks.iter().map(String::len).sum::<usize>());
    out.push_str(base);
    for block in blocks {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&block);
    }
    out
}

fn full_section(record: &CapabilityRecord) -> String {
    let content = &record.content;
    let mut out = format!("## {} ({} v{})\n", record.name, record.kind, record.version);
    out.push_str(content.instruction.trim_end());
    bullet_list(&mut out, "Rules", &content.rules);
    if !content.tools.is_empty() {
        let _ = write!(out, "\n\nTools: {}", content.tools.join(", "));
    }
    bullet_list(&mut out, "Knowledge", &content.knowledge);
    out
}

fn bullet_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = write!(out, "\n\n{heading}:");
    for item in items {
        let _ = write!(out, "\n- {item}");
    }
}

fn summary_line(record: &CapabilityRecord) -> String {
    let first_line = record.content.instruction.lines().next().unwrap_or_default();
    let mut line = format!("- {} [{}]: {}", record.name, record.domain, first_line.trim());
    if let Some(score) = record.performance_score {
        let _ = write!(line, " (score {score:.2})");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use capreg_state::{CapabilityContent, RecordId, RecordKind};

    fn record(id: &str, content: CapabilityContent) -> CapabilityRecord {
        CapabilityRecord::new(
            RecordId::parse(id).unwrap(),
            RecordKind::Skill,
            id,
            "support",
            content,
            vec![],
            0,
        )
    }

    #[test]
    fn empty_list_returns_base_unchanged() {
        let base = "You are a helpful agent.\n\n";
        assert_eq!(render(base, &[], InjectionStyle::Full), base);
        assert_eq!(render(base, &[], InjectionStyle::Summary), base);
    }

    #[test]
    fn full_style_renders_sections_in_order() {
        let records = vec![
            record(
                "triage",
                CapabilityContent::new("Sort incoming tickets.")
                    .with_rules(["Never close a ticket", "Tag by product"])
                    .with_tools(["jira", "slack"]),
            ),
            record(
                "tone",
                CapabilityContent::new("Be warm.").with_knowledge(["style-guide.md"]),
            ),
        ];
        let out = render("Base prompt.\n", &records, InjectionStyle::Full);
        assert_eq!(
            out,
            "Base prompt.\n\n\
             ## triage (skill v1)\n\
             Sort incoming tickets.\n\n\
             Rules:\n\
             - Never close a ticket\n\
             - Tag by product\n\n\
             Tools: jira, slack\n\n\
             ## tone (skill v1)\n\
             Be warm.\n\n\
             Knowledge:\n\
             - style-guide.md"
        );
    }

    #[test]
    fn summary_style_is_one_line_per_record() {
        let mut scored = record("triage", CapabilityContent::new("Sort tickets.\nMore detail."));
        scored.performance_score = Some(0.789);
        let plain = record("tone", CapabilityContent::new("Be warm."));

        let out = render("", &[scored, plain], InjectionStyle::Summary);
        assert_eq!(
            out,
            "- triage [support]: Sort tickets. (score 0.79)\n- tone [support]: Be warm."
        );
    }

    #[test]
    fn render_is_deterministic() {
        let records = vec![record("a", CapabilityContent::new("x").with_rules(["r"]))];
        let first = render("base", &records, InjectionStyle::Full);
        let second = render("base", &records, InjectionStyle::Full);
        assert_eq!(first, second);
    }
}
