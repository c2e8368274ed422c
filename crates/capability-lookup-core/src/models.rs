//! Core data models used throughout Capability Lookup.
//!
//! Records and chunks are derived deterministically from a raw table and
//! are never mutated after construction. [`IndexedVector`] is the durable
//! unit held by a vector store; [`SearchResult`] lives for one query.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flat string metadata attached to an indexed vector.
pub type Metadata = BTreeMap<String, String>;

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_name: String,
    pub file_path: String,
    pub sheet_name: String,
    /// 0-based row index within the raw table.
    pub row_index: usize,
}

impl SourceRef {
    /// `file://` link addressing the row; rows are 1-based as in a spreadsheet UI.
    pub fn link(&self) -> String {
        format!(
            "file://{}#sheet={}&row={}",
            self.file_path,
            self.sheet_name,
            self.row_index + 1
        )
    }
}

/// Low / mid / upper effort for one team. Unparseable cells stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EffortEstimate {
    pub low: Option<f64>,
    pub mid: Option<f64>,
    pub upper: Option<f64>,
}

impl EffortEstimate {
    pub fn is_empty(&self) -> bool {
        self.low.is_none() && self.mid.is_none() && self.upper.is_none()
    }
}

/// A structured capability entry extracted from one spreadsheet row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Deterministic UUID derived from the source link.
    pub id: String,
    /// Always non-empty and never a placeholder.
    pub capability: String,
    pub scope_description: Option<String>,
    pub system_changes: Option<String>,
    pub leads: Option<String>,
    pub teams: Option<String>,
    /// Project-level key/value metadata from the sheet header area.
    pub project: BTreeMap<String, String>,
    /// Team name → effort estimate.
    pub cost_breakdown: BTreeMap<String, EffortEstimate>,
    pub source: SourceRef,
}

impl CapabilityRecord {
    /// Create a record with only the required fields populated.
    ///
    /// Returns `None` if `capability` is blank or a placeholder.
    pub fn new(capability: &str, source: SourceRef) -> Option<Self> {
        let capability = crate::table::normalize_cell(capability)?;
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, source.link().as_bytes()).to_string();
        Some(Self {
            id,
            capability,
            scope_description: None,
            system_changes: None,
            leads: None,
            teams: None,
            project: BTreeMap::new(),
            cost_breakdown: BTreeMap::new(),
            source,
        })
    }

    /// Render the populated fields as labeled lines in a fixed order.
    ///
    /// This is the text that gets chunked and embedded.
    pub fn render_text(&self) -> String {
        let mut out = format!("Capability: {}\n", self.capability);
        if let Some(ref scope) = self.scope_description {
            out.push_str(&format!("Business Description: {}\n", scope));
        }
        if let Some(ref changes) = self.system_changes {
            out.push_str(&format!("System Changes: {}\n", changes));
        }
        if let Some(ref leads) = self.leads {
            out.push_str(&format!("Leads: {}\n", leads));
        }
        if let Some(ref teams) = self.teams {
            out.push_str(&format!("Teams: {}\n", teams));
        }
        for (key, value) in &self.project {
            out.push_str(&format!("{}: {}\n", metadata_label(key), value));
        }
        if !self.cost_breakdown.is_empty() {
            out.push_str("Effort Estimate (low/mid/upper):\n");
            for (team, est) in &self.cost_breakdown {
                out.push_str(&format!(
                    "- {}: {} / {} / {}\n",
                    team,
                    fmt_effort(est.low),
                    fmt_effort(est.mid),
                    fmt_effort(est.upper)
                ));
            }
        }
        out
    }

    /// Flat metadata copied onto every chunk of this record.
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("record_id".into(), self.id.clone());
        meta.insert("capability".into(), self.capability.clone());
        meta.insert("file_name".into(), self.source.file_name.clone());
        meta.insert("file_path".into(), self.source.file_path.clone());
        meta.insert("sheet_name".into(), self.source.sheet_name.clone());
        meta.insert("row_index".into(), self.source.row_index.to_string());
        meta.insert("source_link".into(), self.source.link());
        let optional = [
            ("scope_description", &self.scope_description),
            ("system_changes", &self.system_changes),
            ("leads", &self.leads),
            ("teams", &self.teams),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                meta.insert(key.into(), v.clone());
            }
        }
        if !self.project.is_empty() {
            if let Ok(json) = serde_json::to_string(&self.project) {
                meta.insert("project".into(), json);
            }
        }
        if !self.cost_breakdown.is_empty() {
            if let Ok(json) = serde_json::to_string(&self.cost_breakdown) {
                meta.insert("cost_breakdown".into(), json);
            }
        }
        meta
    }
}

fn fmt_effort(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 => format!("{}", v as i64),
        Some(v) => format!("{:.2}", v),
        None => "n/a".to_string(),
    }
}

/// Human label for a canonical metadata key (`project_name` → `Project Name`).
pub fn metadata_label(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A bounded, overlapping window of a record's rendered text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub record_id: String,
    /// 0-based, contiguous per record.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    /// Metadata copied from the owning record.
    pub metadata: Metadata,
}

/// The durable unit stored by a vector collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

impl IndexedVector {
    /// Pair a chunk with its embedding.
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        let mut metadata = chunk.metadata.clone();
        metadata.insert("chunk_index".into(), chunk.chunk_index.to_string());
        metadata.insert("content_hash".into(), chunk.hash.clone());
        Self {
            id: chunk.id.clone(),
            vector,
            text: chunk.text.clone(),
            metadata,
        }
    }
}

/// One nearest-neighbor hit. Smaller `distance` means closer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub distance: f64,
    pub metadata: Metadata,
}

impl SearchResult {
    /// `1 - distance`, the relevance figure shown to users.
    pub fn relevance(&self) -> f64 {
        1.0 - self.distance
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }
}
