//! `.xlsx` workbook reader.
//!
//! Reads an Office Open XML workbook straight from its ZIP container with
//! `zip` and `quick-xml` and returns every sheet as a [`RawTable`]:
//!
//! 1. `xl/workbook.xml` + `xl/_rels/workbook.xml.rels` give sheet names
//!    and their part paths, in tab order. Workbooks without them fall
//!    back to `xl/worksheets/sheetN.xml` order with names `SheetN`.
//! 2. `xl/sharedStrings.xml` (optional) holds the string table; rich
//!    text runs inside one `<si>` are concatenated.
//! 3. Each `<c r="B3">` is placed at its cell reference, so sparse rows
//!    keep their column positions.
//!
//! Every ZIP entry is read with a size cap. Sheets, rows, columns and
//! cells are bounded, and so is the padded grid: a cell that would grow
//! `rows × width` past `XLSX_MAX_GRID_AREA` is dropped, so two far-apart
//! cells cannot force a huge dense table.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use capability_lookup_core::table::{normalize_cell, Cell, RawTable, SourceReader};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Maximum sheets read from one workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells read per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
const XLSX_MAX_ROWS: usize = 100_000;
const XLSX_MAX_COLUMNS: usize = 1_024;
/// Maximum `rows × width` of the dense table built for one sheet.
const XLSX_MAX_GRID_AREA: usize = 1_000_000;
/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a valid xlsx container: {0}")]
    Zip(String),

    #[error("malformed workbook XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("ZIP entry {0} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)")]
    EntryTooLarge(String),

    #[error("sheet '{0}' not found")]
    SheetNotFound(String),

    #[error("workbook reader task failed: {0}")]
    Join(String),
}

/// One named sheet of a workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub table: RawTable,
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Read every sheet of the workbook at `path`.
pub fn read_workbook(path: &Path) -> Result<Vec<Sheet>, WorkbookError> {
    let bytes = std::fs::read(path).map_err(|source| WorkbookError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_workbook_bytes(&bytes)
}

/// Read every sheet from in-memory `.xlsx` bytes.
pub fn read_workbook_bytes(bytes: &[u8]) -> Result<Vec<Sheet>, WorkbookError> {
    let mut archive = open_archive(bytes)?;
    let shared = read_shared_strings(&mut archive)?;
    let parts = list_sheets(&mut archive)?;
    let mut sheets = Vec::with_capacity(parts.len());
    for (name, part) in parts.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &part)?;
        let table = parse_sheet(&xml, &shared, &part)?;
        sheets.push(Sheet { name, table });
    }
    Ok(sheets)
}

/// Read one sheet by name from `.xlsx` bytes.
pub fn read_sheet_bytes(bytes: &[u8], sheet_name: &str) -> Result<RawTable, WorkbookError> {
    let mut archive = open_archive(bytes)?;
    let parts = list_sheets(&mut archive)?;
    let part = parts
        .into_iter()
        .find(|(name, _)| name == sheet_name)
        .map(|(_, part)| part)
        .ok_or_else(|| WorkbookError::SheetNotFound(sheet_name.to_string()))?;
    let shared = read_shared_strings(&mut archive)?;
    let xml = read_zip_entry_bounded(&mut archive, &part)?;
    parse_sheet(&xml, &shared, &part)
}

/// [`SourceReader`] over `.xlsx` files on disk.
///
/// Parsing runs on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxReader;

#[async_trait]
impl SourceReader for XlsxReader {
    async fn read_sheet(&self, file_path: &str, sheet_name: &str) -> anyhow::Result<RawTable> {
        let path = PathBuf::from(file_path);
        let sheet = sheet_name.to_string();
        let table = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path).map_err(|source| WorkbookError::Io {
                path: path.clone(),
                source,
            })?;
            read_sheet_bytes(&bytes, &sheet)
        })
        .await
        .map_err(|e| WorkbookError::Join(e.to_string()))??;
        Ok(table)
    }
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, WorkbookError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| WorkbookError::Zip(e.to_string()))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| WorkbookError::Zip(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| WorkbookError::Zip(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(WorkbookError::EntryTooLarge(name.to_string()));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn xml_err(part: &str, e: impl std::fmt::Display) -> WorkbookError {
    WorkbookError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

/// Attribute value by local name (`r:id` matches `id`).
fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Shared string table; empty when the workbook has none.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, WorkbookError> {
    const PART: &str = "xl/sharedStrings.xml";
    if !has_entry(archive, PART) {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, PART)?;
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the text in another script.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" if in_si && !in_phonetic => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                current.push_str(&te.unescape().map_err(|e| xml_err(PART, e))?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `(sheet name, part path)` in tab order.
fn list_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, WorkbookError> {
    const WORKBOOK: &str = "xl/workbook.xml";
    const RELS: &str = "xl/_rels/workbook.xml.rels";
    if !has_entry(archive, WORKBOOK) || !has_entry(archive, RELS) {
        return Ok(fallback_sheet_parts(archive));
    }

    let rels_xml = read_zip_entry_bounded(archive, RELS)?;
    let mut targets = std::collections::HashMap::new();
    let mut reader = Reader::from_reader(rels_xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    targets.insert(id, resolve_target(&target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(RELS, e)),
            _ => {}
        }
        buf.clear();
    }

    let wb_xml = read_zip_entry_bounded(archive, WORKBOOK)?;
    buf.clear();
    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(wb_xml.as_slice());
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name");
                let part = attr(&e, b"id").and_then(|id| targets.get(&id).cloned());
                if let (Some(name), Some(part)) = (name, part) {
                    if has_entry(archive, &part) {
                        sheets.push((name, part));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(WORKBOOK, e)),
            _ => {}
        }
        buf.clear();
    }

    if sheets.is_empty() {
        return Ok(fallback_sheet_parts(archive));
    }
    Ok(sheets)
}

/// Relationship targets are relative to `xl/` unless absolute.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn fallback_sheet_parts(archive: &Archive<'_>) -> Vec<(String, String)> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|n| {
            let idx = n
                .trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX);
            (idx, n.to_string())
        })
        .collect();
    parts.sort();
    parts
        .into_iter()
        .map(|(idx, part)| (format!("Sheet{}", idx), part))
        .collect()
}

/// `"B3"` → `(row 2, col 1)`, both 0-based.
pub fn parse_cell_ref(reference: &str) -> Option<(usize, usize)> {
    let letters: String = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let digits = &reference[letters.len()..];
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let col = letters
        .chars()
        .try_fold(0usize, |acc, c| {
            acc.checked_mul(26)?
                .checked_add((c.to_ascii_uppercase() as u8 - b'A') as usize + 1)
        })?
        .checked_sub(1)?;
    let row = digits.parse::<usize>().ok()?.checked_sub(1)?;
    Some((row, col))
}

#[derive(Default)]
struct CellState {
    row: usize,
    col: usize,
    kind: Option<String>,
    value: String,
    in_value: bool,
}

fn parse_sheet(xml: &[u8], shared: &[String], part: &str) -> Result<RawTable, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut grid: Vec<Vec<Cell>> = Vec::new();
    let mut width = 0usize;
    let mut cell_count = 0usize;
    let mut next_row = 0usize;
    let mut current_row = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<CellState> = None;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = attr(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .and_then(|r| r.checked_sub(1))
                        .unwrap_or(next_row);
                    next_row = current_row + 1;
                    next_col = 0;
                }
                b"c" => {
                    let (row, col) = attr(&e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .unwrap_or((current_row, next_col));
                    next_col = col + 1;
                    cell = Some(CellState {
                        row,
                        col,
                        kind: attr(&e, b"t"),
                        ..CellState::default()
                    });
                }
                b"v" | b"t" => {
                    if let Some(c) = cell.as_mut() {
                        c.in_value = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = attr(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .and_then(|r| r.checked_sub(1))
                        .unwrap_or(next_row);
                    next_row = current_row + 1;
                }
                b"c" => {
                    next_col = attr(&e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .map(|(_, c)| c + 1)
                        .unwrap_or(next_col + 1);
                }
                _ => {}
            },
            Ok(Event::Text(te)) => {
                if let Some(c) = cell.as_mut().filter(|c| c.in_value) {
                    c.value.push_str(&te.unescape().map_err(|e| xml_err(part, e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => {
                    if let Some(c) = cell.as_mut() {
                        c.in_value = false;
                    }
                }
                b"c" => {
                    if let Some(c) = cell.take() {
                        if place(&mut grid, &mut width, c, shared) {
                            cell_count += 1;
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(RawTable::from_cells(grid))
}

/// Resolve a finished cell and store it. Returns whether anything was stored.
fn place(grid: &mut Vec<Vec<Cell>>, width: &mut usize, cell: CellState, shared: &[String]) -> bool {
    if cell.row >= XLSX_MAX_ROWS || cell.col >= XLSX_MAX_COLUMNS {
        return false;
    }
    let raw = match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned()),
        Some("b") => Some(if cell.value.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()),
        Some("e") => None,
        _ => Some(cell.value),
    };
    let value = match raw.as_deref().and_then(normalize_cell) {
        Some(v) => v,
        None => return false,
    };
    let rows = grid.len().max(cell.row + 1);
    let grown_width = (*width).max(cell.col + 1);
    if rows.saturating_mul(grown_width) > XLSX_MAX_GRID_AREA {
        return false;
    }
    *width = grown_width;
    if grid.len() <= cell.row {
        grid.resize_with(cell.row + 1, Vec::new);
    }
    let row = &mut grid[cell.row];
    if row.len() <= cell.col {
        row.resize(cell.col + 1, None);
    }
    row[cell.col] = Some(value);
    true
}
