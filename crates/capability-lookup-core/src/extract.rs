//! Record extraction from raw tables.
//!
//! Two layouts are supported:
//!
//! - **Capability list**: a header row located by [`infer_header`], one
//!   record per data row below it.
//! - **Project estimation**: key/value project metadata in the top rows,
//!   then a capability × team effort matrix located by
//!   [`infer_estimation_layout`].
//!
//! Extraction never fails as a whole once a header is known. Rows that
//! cannot become records are reported in [`ExtractionOutcome::skipped`]
//! and the scan continues. A blank row (see [`RawTable::is_blank_row`])
//! ends the scan.

use std::collections::BTreeMap;

use crate::error::{ExtractionError, SchemaInferenceError};
use crate::models::{CapabilityRecord, EffortEstimate, SourceRef};
use crate::schema::{
    infer_estimation_layout, infer_header, metadata_key, normalize_label, EstimationLayout,
    HeaderMatch, RuleSet, SheetKind, CAPABILITY, LEADS, SCOPE_DESCRIPTION, SYSTEM_CHANGES, TEAMS,
};
use crate::table::RawTable;

/// Rows scanned for `key: value` project metadata.
const METADATA_SCAN_ROWS: usize = 10;

/// Row labels that mark totals rather than capabilities.
const SUMMARY_LABELS: &[&str] = &["total", "grand total", "subtotal", "sub-total", "sub total"];

/// The file and sheet a table was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLocation {
    pub file_name: String,
    pub file_path: String,
    pub sheet_name: String,
}

impl SheetLocation {
    pub fn new(file_name: &str, file_path: &str, sheet_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            file_path: file_path.to_string(),
            sheet_name: sheet_name.to_string(),
        }
    }

    pub fn at(&self, row_index: usize) -> SourceRef {
        SourceRef {
            file_name: self.file_name.clone(),
            file_path: self.file_path.clone(),
            sheet_name: self.sheet_name.clone(),
            row_index,
        }
    }
}

/// Scan windows used when locating headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindows {
    pub header: usize,
    pub estimation: usize,
}

impl Default for ScanWindows {
    fn default() -> Self {
        Self {
            header: crate::schema::DEFAULT_SCAN_WINDOW,
            estimation: crate::schema::DEFAULT_ESTIMATION_SCAN_WINDOW,
        }
    }
}

/// Records extracted from one sheet plus the rows that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    pub records: Vec<CapabilityRecord>,
    pub skipped: Vec<ExtractionError>,
}

/// Extract records from a sheet of a known kind.
///
/// Returns `Err` only when no header can be located; callers treat that
/// as a per-sheet failure.
pub fn extract_sheet(
    table: &RawTable,
    kind: SheetKind,
    rules: &RuleSet,
    windows: ScanWindows,
    location: &SheetLocation,
) -> Result<ExtractionOutcome, SchemaInferenceError> {
    match kind {
        SheetKind::CapabilityList => {
            let header = infer_header(table, rules, windows.header)?;
            Ok(extract_capability_list(table, &header, location))
        }
        SheetKind::ProjectEstimation => {
            let layout = infer_estimation_layout(table, rules, windows.estimation)?;
            Ok(extract_project_estimation(table, &layout, location))
        }
    }
}

/// One record per data row below `header.row`.
///
/// `capability` is required. When the description column sits left of
/// the capability column the description is required too.
pub fn extract_capability_list(
    table: &RawTable,
    header: &HeaderMatch,
    location: &SheetLocation,
) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    let cap_col = match header.mapping.column(CAPABILITY) {
        Some(c) => c,
        None => return outcome,
    };
    let scope_col = header.mapping.column(SCOPE_DESCRIPTION);
    let changes_col = header.mapping.column(SYSTEM_CHANGES);
    let leads_col = header.mapping.column(LEADS);
    let teams_col = header.mapping.column(TEAMS);
    let description_first = scope_col.map(|s| s < cap_col).unwrap_or(false);

    let cell = |row: usize, col: Option<usize>| -> Option<String> {
        col.and_then(|c| table.get(row, c)).map(|s| s.to_string())
    };

    for row in (header.row + 1)..table.len() {
        if table.is_blank_row(row) {
            break;
        }
        let capability = match table.get(row, cap_col) {
            Some(c) => c,
            None => {
                outcome.skipped.push(ExtractionError::MissingField {
                    row,
                    field: CAPABILITY.to_string(),
                });
                continue;
            }
        };
        let scope = cell(row, scope_col);
        if description_first && scope.is_none() {
            outcome.skipped.push(ExtractionError::MissingField {
                row,
                field: SCOPE_DESCRIPTION.to_string(),
            });
            continue;
        }
        let mut record = match CapabilityRecord::new(capability, location.at(row)) {
            Some(r) => r,
            None => {
                outcome.skipped.push(ExtractionError::MissingField {
                    row,
                    field: CAPABILITY.to_string(),
                });
                continue;
            }
        };
        record.scope_description = scope;
        record.system_changes = cell(row, changes_col);
        record.leads = cell(row, leads_col);
        record.teams = cell(row, teams_col);
        outcome.records.push(record);
    }
    outcome
}

/// Project metadata from the rows above `limit` (at most the first 10).
///
/// A cell whose text is a vocabulary label supplies the key; the cell
/// immediately to its right supplies the value. The first occurrence of
/// each key wins.
pub fn extract_project_metadata(table: &RawTable, limit: usize) -> BTreeMap<String, String> {
    let mut project = BTreeMap::new();
    for row in 0..limit.min(METADATA_SCAN_ROWS).min(table.len()) {
        for col in 0..table.width() {
            let key = match table.get(row, col).and_then(metadata_key) {
                Some(k) => k,
                None => continue,
            };
            if let Some(value) = table.get(row, col + 1) {
                project
                    .entry(key.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
    }
    project
}

/// One record per capability row of an estimation matrix.
pub fn extract_project_estimation(
    table: &RawTable,
    layout: &EstimationLayout,
    location: &SheetLocation,
) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    let project = extract_project_metadata(table, layout.header_row);

    for row in layout.data_start..table.len() {
        if table.is_blank_row(row) {
            break;
        }
        let capability = match table.get(row, layout.capability_col) {
            Some(c) => c,
            None => {
                outcome.skipped.push(ExtractionError::MissingField {
                    row,
                    field: CAPABILITY.to_string(),
                });
                continue;
            }
        };
        if SUMMARY_LABELS.contains(&normalize_label(capability).as_str()) {
            outcome.skipped.push(ExtractionError::SummaryRow {
                row,
                label: capability.to_string(),
            });
            continue;
        }
        let mut record = match CapabilityRecord::new(capability, location.at(row)) {
            Some(r) => r,
            None => continue,
        };
        record.scope_description = layout
            .description_col
            .and_then(|c| table.get(row, c))
            .map(|s| s.to_string());
        record.project = project.clone();
        for team in &layout.teams {
            let estimate = EffortEstimate {
                low: parse_number(table.get(row, team.low)),
                mid: parse_number(table.get(row, team.mid)),
                upper: parse_number(table.get(row, team.upper)),
            };
            if !estimate.is_empty() {
                record.cost_breakdown.insert(team.team.clone(), estimate);
            }
        }
        outcome.records.push(record);
    }
    outcome
}

/// Parse an effort/cost cell permissively.
///
/// Accepts integers, floats and numeric strings with thousands separators
/// or a leading currency symbol. Anything else is `None`; this never fails.
///
/// ```rust
/// use capability_lookup_core::extract::parse_number;
///
/// assert_eq!(parse_number(Some("12")), Some(12.0));
/// assert_eq!(parse_number(Some(" 1,250.5 ")), Some(1250.5));
/// assert_eq!(parse_number(Some("$40")), Some(40.0));
/// assert_eq!(parse_number(Some("TBD")), None);
/// assert_eq!(parse_number(None), None);
/// ```
pub fn parse_number(cell: Option<&str>) -> Option<f64> {
    let raw = cell?.trim();
    let cleaned: String = raw
        .trim_start_matches(['$', '£', '€'])
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
