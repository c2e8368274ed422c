//! Structured analyses run over retrieved context.
//!
//! Each [`AnalysisKind`] carries a fixed system instruction. The user
//! prompt is the shared context block plus the query plus a kind-specific
//! task line, so the four requests are independent of one another.

use capability_lookup_core::models::{metadata_label, EffortEstimate, SearchResult};
use capability_lookup_core::table::truncate_chars;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Summary,
    Cost,
    Team,
    SystemImpact,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 4] = [
        AnalysisKind::Summary,
        AnalysisKind::Cost,
        AnalysisKind::Team,
        AnalysisKind::SystemImpact,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => "Summary",
            AnalysisKind::Cost => "Cost analysis",
            AnalysisKind::Team => "Team analysis",
            AnalysisKind::SystemImpact => "System impact analysis",
        }
    }

    pub fn system_instruction(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => {
                "You are a business analyst providing capability analysis. Provide a \
                 comprehensive summary (under 200 words) covering an overview of the matching \
                 capabilities, the key systems and changes involved, and the business impact. \
                 Then mention the source files that contain similar capabilities."
            }
            AnalysisKind::Cost => {
                "You are an estimation analyst. Using only the effort figures in the context, \
                 summarize the low, mid and upper effort per team for the closest matches, \
                 point out the largest cost drivers, and say plainly when no figures are \
                 available. Do not invent numbers."
            }
            AnalysisKind::Team => {
                "You are a delivery lead. Identify which teams and leads own or were involved \
                 in the matching capabilities, and which teams would likely be needed to \
                 deliver the requested capability. Keep it under 150 words."
            }
            AnalysisKind::SystemImpact => {
                "You are a solution architect. List the systems that were changed for the \
                 matching capabilities and describe the likely system impact of the requested \
                 capability. Keep it under 150 words."
            }
        }
    }

    fn task(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => {
                "Provide an overview summary and mention which source files contain similar capabilities."
            }
            AnalysisKind::Cost => "Provide a cost and effort analysis.",
            AnalysisKind::Team => "Provide a team and ownership analysis.",
            AnalysisKind::SystemImpact => "Provide a system impact analysis.",
        }
    }

    /// Deterministic stand-in for a failed analysis.
    pub fn placeholder(&self, reason: &str) -> String {
        format!("{} unavailable: {}", self.label(), reason)
    }
}

/// Build the user prompt for `kind`.
pub fn build_prompt(kind: AnalysisKind, query: &str, context: &str) -> String {
    format!(
        "Query: \"{}\"\n\nMatching capabilities found:\n{}\n\n{}",
        query,
        context.trim_end(),
        kind.task()
    )
}

/// Render the retrieved matches as one context block.
///
/// Hits are grouped by `record_id`, so a record split into several chunks
/// is listed once with every retrieved chunk text under it. Records are
/// numbered in the rank of their best hit and at most `limit` are kept.
/// `deep_context` (the best match's full sheet) is appended when present.
pub fn build_context(matches: &[SearchResult], limit: usize, deep_context: Option<&str>) -> String {
    let mut records: Vec<(&str, Vec<&SearchResult>)> = Vec::new();
    for m in matches {
        let key = m.meta("record_id").unwrap_or(m.id.as_str());
        match records.iter_mut().find(|(k, _)| *k == key) {
            Some((_, hits)) => hits.push(m),
            None => records.push((key, vec![m])),
        }
    }

    let mut out = String::new();
    for (i, (_, hits)) in records.iter().take(limit).enumerate() {
        let m = hits[0];
        out.push_str(&format!(
            "{}. {} (source: {}, sheet: {}, relevance: {:.2})\n",
            i + 1,
            m.meta("capability").unwrap_or("Unknown"),
            m.meta("file_name").unwrap_or("Unknown"),
            m.meta("sheet_name").unwrap_or("Unknown"),
            m.relevance()
        ));
        for (key, label) in [
            ("scope_description", "Business Description"),
            ("system_changes", "System Changes"),
            ("leads", "Leads"),
            ("teams", "Teams"),
        ] {
            if let Some(value) = m.meta(key) {
                out.push_str(&format!("   {}: {}\n", label, value));
            }
        }
        if let Some(project) = m
            .meta("project")
            .and_then(|json| serde_json::from_str::<BTreeMap<String, String>>(json).ok())
        {
            for (key, value) in project {
                out.push_str(&format!("   {}: {}\n", metadata_label(&key), value));
            }
        }
        if let Some(costs) = m
            .meta("cost_breakdown")
            .and_then(|json| serde_json::from_str::<BTreeMap<String, EffortEstimate>>(json).ok())
        {
            out.push_str("   Effort (low/mid/upper):\n");
            for (team, est) in costs {
                out.push_str(&format!(
                    "   - {}: {} / {} / {}\n",
                    team,
                    fmt_opt(est.low),
                    fmt_opt(est.mid),
                    fmt_opt(est.upper)
                ));
            }
        }
        out.push_str("   Matched text:\n");
        for hit in hits {
            for line in hit.text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                out.push_str(&format!("   | {}\n", line));
            }
        }
    }
    if let Some(deep) = deep_context.filter(|d| !d.trim().is_empty()) {
        out.push_str("\nFull source sheet of the best match:\n");
        out.push_str(deep);
        out.push('\n');
    }
    out
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

/// Shorten `text` to `max_chars`, marking the cut with `...`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        format!("{}...", truncate_chars(&collapsed, max_chars))
    }
}
