#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

/// A sheet name and its rows; empty strings leave the cell out.
pub type SheetSpec<'a> = (&'a str, Vec<Vec<&'a str>>);

fn column_letters(mut col: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn sheet_xml(rows: &[Vec<&str>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let reference = format!("{}{}", column_letters(c), r + 1);
            if value.parse::<f64>().is_ok() {
                xml.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, reference, value));
            } else {
                xml.push_str(&format!(
                    r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                    reference,
                    escape(value)
                ));
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Build a minimal `.xlsx` with inline-string cells.
pub fn xlsx_bytes(sheets: &[SheetSpec]) -> Vec<u8> {
    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut rels = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (i, (name, _)) in sheets.iter().enumerate() {
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(name),
            i + 1,
            i + 1
        ));
        rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            i + 1,
            i + 1
        ));
    }
    workbook.push_str("</sheets></workbook>");
    rels.push_str("</Relationships>");

    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("xl/workbook.xml", options).unwrap();
        zip.write_all(workbook.as_bytes()).unwrap();
        zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
        zip.write_all(rels.as_bytes()).unwrap();
        for (i, (_, rows)) in sheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)
                .unwrap();
            zip.write_all(sheet_xml(rows).as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

pub fn write_xlsx(path: &Path, sheets: &[SheetSpec]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, xlsx_bytes(sheets)).unwrap();
}

/// The three-capability workbook: header at row index 2.
pub fn capability_list_workbook(path: &Path) {
    write_xlsx(
        path,
        &[
            ("Notes", vec![vec!["Internal only"]]),
            (
                "Capability List",
                vec![
                    vec!["Wealth Platform Estimate"],
                    vec!["Prepared for portfolio review"],
                    vec!["ID", "Capability", "Scope / Business Description", "System Changes"],
                    vec![
                        "1",
                        "Customer Onboarding",
                        "Open accounts digitally for new customers",
                        "CRM and document store",
                    ],
                    vec![
                        "2",
                        "KYC Verification",
                        "Identity and address checks during onboarding",
                        "KYC engine integration",
                    ],
                    vec![
                        "3",
                        "Mutual Fund Selection",
                        "Let advisors browse and choose mutual funds for a portfolio",
                        "Fund catalogue service",
                    ],
                ],
            ),
        ],
    );
}

/// An estimation sheet with project metadata and two teams.
pub fn estimation_workbook(path: &Path) {
    write_xlsx(
        path,
        &[(
            "Project Estimation",
            vec![
                vec!["Project Name:", "Payments Hub"],
                vec!["Client:", "Acme Bank"],
                vec![],
                vec!["Capability", "Description", "Platform", "", "", "Data Services", "", ""],
                vec!["", "", "Low", "Mid", "Upper", "Low", "Mid", "Upper"],
                vec!["Instant Payments", "Real-time credit transfers", "5", "8", "12", "3", "4", "6"],
                vec!["Standing Orders", "Recurring payment schedules", "2", "3", "5", "TBD", "", ""],
                vec!["Total", "", "7", "11", "17", "3", "4", "6"],
            ],
        )],
    );
}
