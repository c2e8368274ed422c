//! Header-row inference over tables with no fixed schema.
//!
//! Column detection is driven by a [`RuleSet`]: a table of
//! `canonical name → synonyms` rules evaluated uniformly against every
//! header candidate cell. A cell matches a rule when its normalized text
//! equals a synonym (score `1.0 × weight`) or contains one as a substring
//! (score `0.5 × weight`).
//!
//! # Header selection
//!
//! 1. Scan at most `window` rows from the top.
//! 2. For each row, map every required canonical name to the first column
//!    (left to right) whose cell matches one of its synonyms.
//! 3. The row qualifies only if **all** required names were mapped.
//! 4. The first qualifying row wins. If none qualifies, inference fails
//!    with [`SchemaInferenceError::NoHeaderFound`].
//!
//! Optional rules are resolved on the winning row afterwards and never
//! influence which row is chosen.

use std::collections::BTreeMap;

use crate::error::SchemaInferenceError;
use crate::table::RawTable;

/// Default number of rows scanned for a header.
pub const DEFAULT_SCAN_WINDOW: usize = 10;
/// Default number of rows scanned for an estimation matrix header.
pub const DEFAULT_ESTIMATION_SCAN_WINDOW: usize = 20;

pub const CAPABILITY: &str = "Capability";
pub const SCOPE_DESCRIPTION: &str = "Scope / Business Description";
pub const SYSTEM_CHANGES: &str = "System Changes";
pub const LEADS: &str = "Leads";
pub const TEAMS: &str = "Teams";

/// Score for an exact synonym match, before weighting.
const EXACT_SCORE: f32 = 1.0;
/// Score for a substring synonym match, before weighting.
const CONTAINS_SCORE: f32 = 0.5;

/// Lower-case, trim and collapse internal whitespace.
pub fn normalize_label(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One row of the rule table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRule {
    pub canonical: String,
    /// Lower-case synonyms.
    pub synonyms: Vec<String>,
    pub required: bool,
    pub weight: f32,
}

impl ColumnRule {
    pub fn new(canonical: &str, synonyms: &[&str], required: bool) -> Self {
        Self {
            canonical: canonical.to_string(),
            synonyms: synonyms.iter().map(|s| normalize_label(s)).collect(),
            required,
            weight: 1.0,
        }
    }

    /// Score a normalized cell against this rule, or `None` if it doesn't match.
    pub fn score(&self, normalized: &str) -> Option<f32> {
        if normalized.is_empty() {
            return None;
        }
        if self.synonyms.iter().any(|s| s == normalized) {
            return Some(EXACT_SCORE * self.weight);
        }
        if self
            .synonyms
            .iter()
            .any(|s| !s.is_empty() && normalized.contains(s.as_str()))
        {
            return Some(CONTAINS_SCORE * self.weight);
        }
        None
    }

    /// Whether a raw cell matches this rule.
    pub fn matches(&self, cell: &str) -> bool {
        self.score(&normalize_label(cell)).is_some()
    }
}

/// An ordered set of column rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<ColumnRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ColumnRule>) -> Self {
        Self { rules }
    }

    /// Rules for a "Capability List" sheet.
    pub fn capability_list() -> Self {
        Self::new(vec![
            ColumnRule::new(
                CAPABILITY,
                &[
                    "capability",
                    "capabilities",
                    "cap",
                    "function",
                    "feature",
                    "business capability",
                ],
                true,
            ),
            ColumnRule::new(
                SCOPE_DESCRIPTION,
                &[
                    "scope",
                    "business description",
                    "description",
                    "scope/business description",
                    "scope / business description",
                ],
                true,
            ),
            ColumnRule::new(
                SYSTEM_CHANGES,
                &[
                    "system changes",
                    "system change",
                    "changes",
                    "technical changes",
                    "system modifications",
                ],
                true,
            ),
            ColumnRule::new(
                LEADS,
                &["leads", "lead", "owner", "business owner", "product owner"],
                false,
            ),
            ColumnRule::new(
                TEAMS,
                &["teams", "team", "impacted teams", "delivery team"],
                false,
            ),
        ])
    }

    /// Add synonyms to existing rules. Unknown canonical names are ignored.
    pub fn with_extra_synonyms(mut self, extra: &BTreeMap<String, Vec<String>>) -> Self {
        for rule in &mut self.rules {
            if let Some(more) = extra.get(&rule.canonical) {
                for syn in more {
                    let syn = normalize_label(syn);
                    if !syn.is_empty() && !rule.synonyms.contains(&syn) {
                        rule.synonyms.push(syn);
                    }
                }
            }
        }
        self
    }

    pub fn rules(&self) -> &[ColumnRule] {
        &self.rules
    }

    pub fn rule(&self, canonical: &str) -> Option<&ColumnRule> {
        self.rules.iter().find(|r| r.canonical == canonical)
    }

    fn required(&self) -> impl Iterator<Item = &ColumnRule> {
        self.rules.iter().filter(|r| r.required)
    }

    fn optional(&self) -> impl Iterator<Item = &ColumnRule> {
        self.rules.iter().filter(|r| !r.required)
    }
}

/// A resolved column for one canonical name.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMatch {
    pub column: usize,
    /// Header cell text as found in the table.
    pub header: String,
    pub score: f32,
}

/// Canonical name → column, built from exactly one header row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    columns: BTreeMap<String, ColumnMatch>,
}

impl ColumnMapping {
    pub fn column(&self, canonical: &str) -> Option<usize> {
        self.columns.get(canonical).map(|m| m.column)
    }

    pub fn get(&self, canonical: &str) -> Option<&ColumnMatch> {
        self.columns.get(canonical)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnMatch)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn insert(&mut self, canonical: &str, m: ColumnMatch) {
        // First match wins; callers scan left to right.
        self.columns.entry(canonical.to_string()).or_insert(m);
    }
}

/// The chosen header row and its mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMatch {
    pub row: usize,
    pub mapping: ColumnMapping,
}

/// First column in `row` whose cell matches `rule`, skipping `taken` columns.
fn first_match(cells: &[(usize, String)], rule: &ColumnRule, taken: &[usize]) -> Option<ColumnMatch> {
    cells.iter().find_map(|(col, norm)| {
        if taken.contains(col) {
            return None;
        }
        rule.score(norm).map(|score| ColumnMatch {
            column: *col,
            header: norm.clone(),
            score,
        })
    })
}

/// Locate the header row of `table` and map its cells to canonical names.
pub fn infer_header(
    table: &RawTable,
    rules: &RuleSet,
    window: usize,
) -> Result<HeaderMatch, SchemaInferenceError> {
    if table.is_empty() {
        return Err(SchemaInferenceError::EmptyTable);
    }

    let required_count = rules.required().count();
    let scanned = window.min(table.len());
    let mut best_missing: Option<Vec<String>> = None;

    for row_idx in 0..scanned {
        let cells = normalized_cells(table, row_idx);
        let mut mapping = ColumnMapping::default();
        let mut missing = Vec::new();

        for rule in rules.required() {
            match first_match(&cells, rule, &[]) {
                Some(m) => mapping.insert(&rule.canonical, m),
                None => missing.push(rule.canonical.clone()),
            }
        }

        if mapping.len() == required_count {
            let taken: Vec<usize> = mapping.iter().map(|(_, m)| m.column).collect();
            for rule in rules.optional() {
                if let Some(m) = first_match(&cells, rule, &taken) {
                    mapping.insert(&rule.canonical, m);
                }
            }
            return Ok(HeaderMatch {
                row: row_idx,
                mapping,
            });
        }

        if best_missing
            .as_ref()
            .map(|b| missing.len() < b.len())
            .unwrap_or(true)
        {
            best_missing = Some(missing);
        }
    }

    Err(SchemaInferenceError::NoHeaderFound {
        scanned,
        missing: best_missing.unwrap_or_default().join(", "),
    })
}

/// Present cells of a row as `(column, normalized text)`, left to right.
fn normalized_cells(table: &RawTable, row: usize) -> Vec<(usize, String)> {
    table
        .row(row)
        .map(|cells| {
            cells
                .iter()
                .enumerate()
                .filter_map(|(col, c)| c.as_deref().map(|v| (col, normalize_label(v))))
                .filter(|(_, v)| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ============ Sheet classification ============

/// Recognized sheet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SheetKind {
    /// One row per capability with name, scope and system-change columns.
    CapabilityList,
    /// Project metadata on top, capability × team effort matrix below.
    ProjectEstimation,
}

impl SheetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetKind::CapabilityList => "capability_list",
            SheetKind::ProjectEstimation => "project_estimation",
        }
    }
}

/// `(kind, stem that must appear, any-of qualifiers)`; empty qualifiers match anything.
const SHEET_RULES: &[(SheetKind, &str, &[&str])] = &[
    (
        SheetKind::CapabilityList,
        "capabilit",
        &["list", "register", "catalog", "inventory"],
    ),
    (SheetKind::ProjectEstimation, "estimat", &[]),
];

/// Classify a sheet by fuzzy name match.
///
/// ```rust
/// use capability_lookup_core::schema::{classify_sheet, SheetKind};
///
/// assert_eq!(classify_sheet("Capability List"), Some(SheetKind::CapabilityList));
/// assert_eq!(classify_sheet(" project ESTIMATION v2"), Some(SheetKind::ProjectEstimation));
/// assert_eq!(classify_sheet("Assumptions"), None);
/// ```
pub fn classify_sheet(name: &str) -> Option<SheetKind> {
    let norm: String = normalize_label(name)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    SHEET_RULES
        .iter()
        .find(|(_, stem, qualifiers)| {
            norm.contains(stem) && (qualifiers.is_empty() || qualifiers.iter().any(|q| norm.contains(q)))
        })
        .map(|(kind, _, _)| *kind)
}

// ============ Project metadata vocabulary ============

/// `canonical key ← labels`, matched exactly after normalization.
pub const METADATA_VOCABULARY: &[(&str, &[&str])] = &[
    ("project_name", &["project name", "project"]),
    ("client", &["client", "customer"]),
    ("estimate_date", &["date", "estimate date", "estimation date"]),
    ("version", &["version"]),
    ("prepared_by", &["prepared by", "estimated by", "author"]),
    ("currency", &["currency"]),
    ("rate", &["rate", "day rate", "blended rate"]),
    ("total_effort", &["total effort"]),
    ("status", &["status"]),
];

/// Resolve a cell to a canonical metadata key.
///
/// Trailing colons are ignored: `"Project Name:"` → `project_name`.
pub fn metadata_key(cell: &str) -> Option<&'static str> {
    let norm = normalize_label(cell);
    let norm = norm.trim_end_matches(':').trim_end();
    METADATA_VOCABULARY
        .iter()
        .find(|(_, labels)| labels.contains(&norm))
        .map(|(key, _)| *key)
}

// ============ Estimation matrix layout ============

/// Labels that sit in an estimation header but are not teams.
const NON_TEAM_LABELS: &[&str] = &["total", "comment", "notes", "assumption", "remarks"];
const LOW_LABELS: &[&str] = &["low", "min", "optimistic"];
const MID_LABELS: &[&str] = &["mid", "medium", "likely", "realistic"];
const UPPER_LABELS: &[&str] = &["upper", "high", "max", "pessimistic"];

/// Three adjacent sub-columns owned by one team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamColumns {
    pub team: String,
    pub low: usize,
    pub mid: usize,
    pub upper: usize,
}

/// Resolved layout of a project-estimation matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimationLayout {
    pub header_row: usize,
    pub capability_col: usize,
    pub description_col: Option<usize>,
    /// First data row (after an optional low/mid/upper sub-header).
    pub data_start: usize,
    pub teams: Vec<TeamColumns>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Band {
    Low,
    Mid,
    Upper,
}

fn band_of(cell: &str) -> Option<Band> {
    let norm = normalize_label(cell);
    if UPPER_LABELS.iter().any(|l| norm.contains(l)) {
        Some(Band::Upper)
    } else if LOW_LABELS.iter().any(|l| norm.contains(l)) {
        Some(Band::Low)
    } else if MID_LABELS.iter().any(|l| norm.contains(l)) {
        Some(Band::Mid)
    } else {
        None
    }
}

/// Whether a `label: value` pair sits at or left of `cap_col`.
///
/// `Project Name | Capability Uplift` is metadata; a `Status` or `Date`
/// column to the right of `Capability` is an ordinary header cell.
fn is_metadata_pair(table: &RawTable, row: usize, cap_col: usize) -> bool {
    (0..=cap_col).any(|col| {
        table.get(row, col).and_then(metadata_key).is_some() && table.get(row, col + 1).is_some()
    })
}

/// Locate the capability × team matrix of an estimation sheet.
pub fn infer_estimation_layout(
    table: &RawTable,
    rules: &RuleSet,
    window: usize,
) -> Result<EstimationLayout, SchemaInferenceError> {
    if table.is_empty() {
        return Err(SchemaInferenceError::EmptyTable);
    }
    let cap_rule = rules.rule(CAPABILITY);
    let desc_rule = rules.rule(SCOPE_DESCRIPTION);
    let scanned = window.min(table.len());

    for row_idx in 0..scanned {
        let cells = normalized_cells(table, row_idx);
        let cap = match cap_rule.and_then(|r| first_match(&cells, r, &[])) {
            Some(m) => m,
            None => continue,
        };
        if is_metadata_pair(table, row_idx, cap.column) {
            continue;
        }

        let mut description_col = None;
        let mut teams = Vec::new();
        let mut col = cap.column + 1;
        while col < table.width() {
            let cell = match table.get(row_idx, col) {
                Some(c) => c,
                None => {
                    col += 1;
                    continue;
                }
            };
            let norm = normalize_label(cell);
            if description_col.is_none() && desc_rule.map(|r| r.matches(cell)).unwrap_or(false) {
                description_col = Some(col);
                col += 1;
            } else if NON_TEAM_LABELS.iter().any(|l| norm.contains(l)) || metadata_key(cell).is_some() {
                col += 1;
            } else {
                teams.push(TeamColumns {
                    team: cell.to_string(),
                    low: col,
                    mid: col + 1,
                    upper: col + 2,
                });
                col += 3;
            }
        }

        if teams.is_empty() {
            continue;
        }

        let sub = row_idx + 1;
        let mut has_subheader = false;
        for team in &mut teams {
            let mut assigned: [Option<usize>; 3] = [None, None, None];
            for c in team.low..team.low + 3 {
                if let Some(band) = table.get(sub, c).and_then(band_of) {
                    has_subheader = true;
                    let slot = match band {
                        Band::Low => 0,
                        Band::Mid => 1,
                        Band::Upper => 2,
                    };
                    assigned[slot].get_or_insert(c);
                }
            }
            let start = team.low;
            team.low = assigned[0].unwrap_or(start);
            team.mid = assigned[1].unwrap_or(start + 1);
            team.upper = assigned[2].unwrap_or(start + 2);
        }

        return Ok(EstimationLayout {
            header_row: row_idx,
            capability_col: cap.column,
            description_col,
            data_start: if has_subheader { row_idx + 2 } else { row_idx + 1 },
            teams,
        });
    }

    Err(SchemaInferenceError::NoHeaderFound {
        scanned,
        missing: format!("{} with team columns", CAPABILITY),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(n: usize) -> Vec<Vec<String>> {
        (0..n)
            .map(|i| vec![format!("Workbook notes {}", i), String::new(), "v1".to_string()])
            .collect()
    }

    fn header_cells() -> Vec<String> {
        vec![
            "Capability".to_string(),
            "Scope / Business Description".to_string(),
            "System Changes".to_string(),
        ]
    }

    /// All orderings of `[0, 1, 2]`.
    fn permutations() -> Vec<[usize; 3]> {
        vec![
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ]
    }

    #[test]
    fn finds_header_for_every_column_permutation() {
        let header = header_cells();
        for perm in permutations() {
            for before in 0..4 {
                let mut rows = filler(before);
                rows.push(perm.iter().map(|&i| header[i].clone()).collect());
                rows.extend(filler(3));
                let table = RawTable::from_rows(rows);

                let found = infer_header(&table, &RuleSet::capability_list(), DEFAULT_SCAN_WINDOW)
                    .expect("header should be found");
                assert_eq!(found.row, before, "perm {:?}", perm);
                for (pos, &src) in perm.iter().enumerate() {
                    let canonical = [CAPABILITY, SCOPE_DESCRIPTION, SYSTEM_CHANGES][src];
                    assert_eq!(found.mapping.column(canonical), Some(pos), "perm {:?}", perm);
                }
            }
        }
    }

    #[test]
    fn header_outside_window_is_not_found() {
        let mut rows = filler(10);
        rows.push(header_cells());
        let table = RawTable::from_rows(rows);
        let err = infer_header(&table, &RuleSet::capability_list(), 10).unwrap_err();
        assert!(matches!(err, SchemaInferenceError::NoHeaderFound { scanned: 10, .. }));
    }

    #[test]
    fn partial_header_does_not_qualify() {
        let table = RawTable::from_rows(vec![
            vec!["Capability", "Scope", ""],
            vec!["KYC", "Verify", ""],
        ]);
        let err = infer_header(&table, &RuleSet::capability_list(), 10).unwrap_err();
        match err {
            SchemaInferenceError::NoHeaderFound { missing, .. } => {
                assert_eq!(missing, SYSTEM_CHANGES)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn first_qualifying_row_wins() {
        let table = RawTable::from_rows(vec![
            vec!["Capability", "Description", "Changes"],
            vec!["Capability", "Scope", "System Changes"],
        ]);
        let found = infer_header(&table, &RuleSet::capability_list(), 10).unwrap();
        assert_eq!(found.row, 0);
    }

    #[test]
    fn leftmost_column_wins_within_row() {
        let table = RawTable::from_rows(vec![vec![
            "Feature",
            "Capability",
            "Scope",
            "System Changes",
        ]]);
        let found = infer_header(&table, &RuleSet::capability_list(), 10).unwrap();
        assert_eq!(found.mapping.column(CAPABILITY), Some(0));
    }

    #[test]
    fn exact_match_scores_higher_than_substring() {
        let rule = ColumnRule::new(CAPABILITY, &["capability"], true);
        assert_eq!(rule.score("capability"), Some(1.0));
        assert_eq!(rule.score("business capability name"), Some(0.5));
        assert_eq!(rule.score("scope"), None);
    }

    #[test]
    fn optional_columns_resolved_without_stealing() {
        let table = RawTable::from_rows(vec![vec![
            "ID",
            "Capability",
            "Scope / Business Description",
            "System Changes",
            "Product Owner",
        ]]);
        let found = infer_header(&table, &RuleSet::capability_list(), 10).unwrap();
        assert_eq!(found.mapping.column(LEADS), Some(4));
        assert_eq!(found.mapping.column(TEAMS), None);
    }

    #[test]
    fn extra_synonyms_extend_rules() {
        let mut extra = BTreeMap::new();
        extra.insert(CAPABILITY.to_string(), vec!["Epic".to_string()]);
        let rules = RuleSet::capability_list().with_extra_synonyms(&extra);
        let table = RawTable::from_rows(vec![vec!["Epic", "Scope", "System Changes"]]);
        let found = infer_header(&table, &rules, 10).unwrap();
        assert_eq!(found.mapping.column(CAPABILITY), Some(0));
    }

    #[test]
    fn empty_table_is_an_error() {
        let table = RawTable::default();
        assert_eq!(
            infer_header(&table, &RuleSet::capability_list(), 10),
            Err(SchemaInferenceError::EmptyTable)
        );
    }

    #[test]
    fn metadata_keys_strip_colons() {
        assert_eq!(metadata_key("Project Name:"), Some("project_name"));
        assert_eq!(metadata_key("  CLIENT "), Some("client"));
        assert_eq!(metadata_key("Capability"), None);
    }

    fn estimation_table() -> RawTable {
        RawTable::from_rows(vec![
            vec!["Project Name", "Capability Uplift", "", "", "", "", ""],
            vec!["Client", "Acme Bank", "", "", "", "", ""],
            vec!["", "", "", "", "", "", ""],
            vec!["Capability", "Description", "Platform", "", "", "Data", ""],
            vec!["", "", "Low", "Mid", "Upper", "Low", "Mid"],
            vec!["KYC Verification", "Verify", "5", "8", "13", "2", "3"],
        ])
    }

    #[test]
    fn estimation_layout_skips_metadata_rows() {
        let layout =
            infer_estimation_layout(&estimation_table(), &RuleSet::capability_list(), 20).unwrap();
        assert_eq!(layout.header_row, 3);
        assert_eq!(layout.capability_col, 0);
        assert_eq!(layout.description_col, Some(1));
        assert_eq!(layout.data_start, 5);
        assert_eq!(layout.teams.len(), 2);
        assert_eq!(
            layout.teams[0],
            TeamColumns {
                team: "Platform".to_string(),
                low: 2,
                mid: 3,
                upper: 4
            }
        );
        assert_eq!(layout.teams[1].team, "Data");
        assert_eq!(layout.teams[1].low, 5);
    }

    #[test]
    fn estimation_header_may_carry_vocabulary_columns() {
        let table = RawTable::from_rows(vec![
            vec!["Project Name", "Payments Hub", "", "", "", ""],
            vec!["", "", "", "", "", ""],
            vec!["Capability", "Status", "Date", "Platform", "", ""],
            vec!["", "", "", "Low", "Mid", "Upper"],
            vec!["Instant Payments", "Draft", "2024-03-01", "5", "8", "12"],
        ]);
        let layout = infer_estimation_layout(&table, &RuleSet::capability_list(), 20).unwrap();
        assert_eq!(layout.header_row, 2);
        assert_eq!(layout.data_start, 4);
        let platform = layout.teams.iter().find(|t| t.team == "Platform").unwrap();
        assert_eq!((platform.low, platform.mid, platform.upper), (3, 4, 5));
    }

    #[test]
    fn estimation_layout_without_subheader_is_positional() {
        let table = RawTable::from_rows(vec![
            vec!["Capability", "Ops", "", "", "Total"],
            vec!["Onboarding", "1", "2", "3", "6"],
        ]);
        let layout = infer_estimation_layout(&table, &RuleSet::capability_list(), 20).unwrap();
        assert_eq!(layout.data_start, 1);
        assert_eq!(layout.teams.len(), 1);
        assert_eq!(layout.teams[0].upper, 3);
    }

    #[test]
    fn estimation_layout_requires_team_columns() {
        let table = RawTable::from_rows(vec![vec!["Capability", ""], vec!["KYC", ""]]);
        assert!(infer_estimation_layout(&table, &RuleSet::capability_list(), 20).is_err());
    }
}
