//! Minimal SpreadsheetML reading and writing
//!
//! Reading goes through calamine. Writing only needs values (no styles,
//! formulas or shared strings), so it is a handful of XML parts zipped
//! together with inline strings.

use calamine::{Data, Range, Reader};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

/// A cell value as kept in split workbooks
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    /// Convert a calamine cell, dropping errors
    pub fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty => Self::Empty,
            Data::String(s) => Self::Text(s.clone()),
            Data::Float(f) => Self::Number(*f),
            Data::Int(i) => Self::Number(*i as f64),
            Data::Bool(b) => Self::Bool(*b),
            Data::DateTime(dt) => Self::Text(dt.to_string()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Self::Text(s.clone()),
            _ => Self::Empty,
        }
    }

    /// Text rendering used for extraction
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// One worksheet's values, anchored at `origin` (zero-based row, column)
#[derive(Debug, Clone, PartialEq)]
pub struct SheetData {
    pub name: String,
    pub origin: (u32, u32),
    pub rows: Vec<Vec<CellValue>>,
}

impl SheetData {
    /// Collect the values of a calamine range
    pub fn from_range(name: &str, range: &Range<Data>) -> Self {
        Self {
            name: name.to_string(),
            origin: range.start().unwrap_or((0, 0)),
            rows: range
                .rows()
                .map(|row| row.iter().map(CellValue::from_data).collect())
                .collect(),
        }
    }
}

/// Read every worksheet of a workbook file
pub fn read_workbook(path: &Path) -> Result<Vec<SheetData>> {
    let filename = path.display().to_string();
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| Error::file_parse(&filename, e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| Error::file_parse(&filename, e.to_string()))?;
        sheets.push(SheetData::from_range(&name, &range));
    }
    Ok(sheets)
}

/// Write sheets into a new .xlsx file
pub fn write_workbook(path: &Path, sheets: &[SheetData]) -> Result<()> {
    let filename = path.display().to_string();
    let zip_err = |e: zip::result::ZipError| Error::file_parse(&filename, e.to_string());

    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let parts = [
        ("[Content_Types].xml".to_string(), content_types_xml(sheets.len())),
        ("_rels/.rels".to_string(), ROOT_RELS.to_string()),
        ("xl/workbook.xml".to_string(), workbook_xml(sheets)),
        ("xl/_rels/workbook.xml.rels".to_string(), workbook_rels_xml(sheets.len())),
    ];
    for (name, xml) in parts {
        zip.start_file(name, options).map_err(zip_err)?;
        zip.write_all(xml.as_bytes())?;
    }
    for (i, sheet) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)
            .map_err(zip_err)?;
        zip.write_all(worksheet_xml(sheet).as_bytes())?;
    }
    zip.finish().map_err(zip_err)?;
    Ok(())
}

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

fn content_types_xml(sheet_count: usize) -> String {
    let mut xml = format!(
        "{XML_DECL}<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>"
    );
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{n}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn workbook_xml(sheets: &[SheetData]) -> String {
    let mut xml = format!("{XML_DECL}<workbook xmlns=\"{MAIN_NS}\" xmlns:r=\"{REL_NS}\"><sheets>");
    for (i, sheet) in sheets.iter().enumerate() {
        xml.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
            quick_xml::escape::escape(sheet.name.as_str()),
            i + 1,
            i + 1
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut xml = format!(
        "{XML_DECL}<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">"
    );
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            "<Relationship Id=\"rId{n}\" Type=\"{REL_NS}/worksheet\" Target=\"worksheets/sheet{n}.xml\"/>"
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

fn worksheet_xml(sheet: &SheetData) -> String {
    let (row0, col0) = sheet.origin;
    let mut xml = format!("{XML_DECL}<worksheet xmlns=\"{MAIN_NS}\"><sheetData>");

    for (i, row) in sheet.rows.iter().enumerate() {
        if row.iter().all(CellValue::is_empty) {
            continue;
        }
        let row_num = row0 + i as u32 + 1;
        xml.push_str(&format!("<row r=\"{row_num}\">"));
        for (j, cell) in row.iter().enumerate() {
            let cell_ref = format!("{}{}", column_name(col0 + j as u32), row_num);
            match cell {
                CellValue::Empty => {}
                CellValue::Text(s) => xml.push_str(&format!(
                    "<c r=\"{cell_ref}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                    quick_xml::escape::escape(s.as_str())
                )),
                CellValue::Number(n) => {
                    xml.push_str(&format!("<c r=\"{cell_ref}\"><v>{n}</v></c>"))
                }
                CellValue::Bool(b) => xml.push_str(&format!(
                    "<c r=\"{cell_ref}\" t=\"b\"><v>{}</v></c>",
                    u8::from(*b)
                )),
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Zero-based column index to spreadsheet letters (0 -> A, 26 -> AA)
fn column_name(mut col: u32) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}
