//! Raw spreadsheet tables.
//!
//! A [`RawTable`] is a fixed-width grid of [`Cell`]s. Placeholder values
//! (empty strings, `nan`, `none`, `-`) are resolved to the absent sentinel
//! (`None`) once, when the table is built, so downstream code never
//! re-checks for them.

use anyhow::Result;
use async_trait::async_trait;

/// A single cell: `Some(trimmed text)` or `None` when absent.
pub type Cell = Option<String>;

/// Placeholder spellings treated as "no value" (compared lower-cased).
const PLACEHOLDERS: &[&str] = &["", "nan", "none", "-"];

/// Resolve a raw cell string to a [`Cell`].
///
/// Trims whitespace and maps placeholders to `None`.
///
/// ```rust
/// use capability_lookup_core::table::normalize_cell;
///
/// assert_eq!(normalize_cell("  KYC  "), Some("KYC".to_string()));
/// assert_eq!(normalize_cell("NaN"), None);
/// assert_eq!(normalize_cell(" - "), None);
/// ```
pub fn normalize_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if is_placeholder(trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Whether an already-trimmed value is a placeholder.
pub fn is_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    PLACEHOLDERS.contains(&lower.as_str())
}

/// An ordered grid of cells with no fixed schema.
///
/// Every row has exactly [`width`](RawTable::width) cells; short rows are
/// padded with absent cells on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    rows: Vec<Vec<Cell>>,
    width: usize,
}

impl RawTable {
    /// Build a table from raw string rows, normalizing every cell.
    pub fn from_rows<R, S>(rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rows: Vec<Vec<Cell>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(|c| normalize_cell(c.as_ref())).collect())
            .collect();
        Self::from_cells(rows)
    }

    /// Build a table from already-resolved cells, padding to a common width.
    pub fn from_cells(mut rows: Vec<Vec<Cell>>) -> Self {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, None);
        }
        Self { rows, width }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns (identical for every row).
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[Cell]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    /// Cell text at `(row, col)`, or `None` when absent or out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
    }

    /// Whether a row counts as empty for early termination: its first
    /// `min(5, width)` cells are all absent.
    pub fn is_blank_row(&self, row: usize) -> bool {
        let checked = self.width.min(5);
        match self.rows.get(row) {
            Some(cells) => cells.iter().take(checked).all(|c| c.is_none()),
            None => true,
        }
    }

    /// Render the table as pipe-separated lines, skipping fully absent rows.
    ///
    /// Used to give the generation capability a compact view of a whole
    /// sheet. Output is truncated to `max_chars` characters.
    pub fn to_text(&self, max_chars: usize) -> String {
        let mut out = String::new();
        for row in &self.rows {
            if row.iter().all(|c| c.is_none()) {
                continue;
            }
            let line = row
                .iter()
                .map(|c| c.as_deref().unwrap_or(""))
                .collect::<Vec<_>>()
                .join(" | ");
            out.push_str(line.trim_end_matches(" | ").trim_end());
            out.push('\n');
            if out.chars().count() >= max_chars {
                break;
            }
        }
        truncate_chars(&out, max_chars)
    }
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Re-reads a sheet from its original source file.
///
/// The retrieval orchestrator uses this to pull deeper context for the
/// best match. Implemented by the workbook reader in the app crate.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read_sheet(&self, file_path: &str, sheet_name: &str) -> Result<RawTable>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_become_absent() {
        let table = RawTable::from_rows(vec![vec!["nan", "None", "-", "", "  ", "x"]]);
        assert_eq!(table.width(), 6);
        for col in 0..5 {
            assert_eq!(table.get(0, col), None, "col {} should be absent", col);
        }
        assert_eq!(table.get(0, 5), Some("x"));
    }

    #[test]
    fn only_the_fixed_placeholders_are_absent() {
        let table = RawTable::from_rows(vec![vec!["N/A", "Null", "nil", "--"]]);
        assert_eq!(table.get(0, 0), Some("N/A"));
        assert_eq!(table.get(0, 1), Some("Null"));
        assert_eq!(table.get(0, 2), Some("nil"));
        assert_eq!(table.get(0, 3), Some("--"));
    }

    #[test]
    fn short_rows_are_padded() {
        let table = RawTable::from_rows(vec![vec!["a", "b", "c"], vec!["d"]]);
        assert_eq!(table.width(), 3);
        assert_eq!(table.row(1).map(|r| r.len()), Some(3));
        assert_eq!(table.get(1, 2), None);
    }

    #[test]
    fn blank_row_check_is_limited_to_five_cells() {
        let table = RawTable::from_rows(vec![
            vec!["", "", "", "", "", "late value"],
            vec!["", "", "", "x", "", ""],
        ]);
        assert!(table.is_blank_row(0));
        assert!(!table.is_blank_row(1));
        assert!(table.is_blank_row(99));
    }

    #[test]
    fn blank_row_check_uses_width_when_narrow() {
        let table = RawTable::from_rows(vec![vec!["", ""], vec!["", "y"]]);
        assert!(table.is_blank_row(0));
        assert!(!table.is_blank_row(1));
    }

    #[test]
    fn to_text_skips_empty_rows_and_truncates() {
        let table = RawTable::from_rows(vec![
            vec!["Capability", "Scope"],
            vec!["", ""],
            vec!["KYC", "Verify identity"],
        ]);
        let text = table.to_text(1000);
        assert_eq!(text, "Capability | Scope\nKYC | Verify identity\n");
        assert_eq!(table.to_text(5), "Capab");
    }

    #[test]
    fn truncate_respects_multibyte_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
