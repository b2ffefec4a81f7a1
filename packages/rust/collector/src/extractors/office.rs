//! Tabular and office document extractors.
//!
//! CSV files expose their header as columns. Binary office formats are
//! catalogued from their container signature only; their content is not
//! parsed.

use repoctx_shared::{FileKind, Fragment, SourceFile, kinds, rel};

use super::{Extractor, utf8};

/// Zip local file header, the container of every OOXML format.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// OLE2 compound file header used by legacy `.xls`.
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Columns recorded per CSV header.
const MAX_COLUMNS: usize = 64;

pub struct SpreadsheetExtractor;

impl Extractor for SpreadsheetExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::Spreadsheet]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        let ext = extension(&file.path);
        if ext != "csv" {
            return catalog_binary(file, bytes, &ext);
        }

        let text = utf8(bytes)?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().unwrap_or("");
        let rows = lines.count();
        let columns = split_csv_header(header);

        let mut frag = Fragment::new(file.path.clone());
        let table = frag.entity_with(
            file.path.clone(),
            kinds::DOCUMENT,
            [
                ("format", "csv".to_string()),
                ("rows", rows.to_string()),
                ("columns", columns.len().to_string()),
            ],
        );
        for (idx, column) in columns.into_iter().take(MAX_COLUMNS).enumerate() {
            let col = frag.entity_with(column, kinds::COLUMN, [("position", idx.to_string())]);
            frag.relate(&table, &col, rel::CONTAINS);
        }
        Ok(frag)
    }

    fn name(&self) -> &str {
        "spreadsheet"
    }
}

pub struct OfficeExtractor;

impl Extractor for OfficeExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::Document, FileKind::Presentation]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        catalog_binary(file, bytes, &extension(&file.path))
    }

    fn name(&self) -> &str {
        "office"
    }
}

fn extension(path: &str) -> String {
    path.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// A document entity carrying only format and size, after checking the
/// container signature.
fn catalog_binary(file: &SourceFile, bytes: &[u8], ext: &str) -> Result<Fragment, String> {
    let magic = if ext == "xls" { OLE_MAGIC } else { ZIP_MAGIC };
    if !bytes.starts_with(magic) {
        return Err(format!("not a valid .{ext} file (bad container signature)"));
    }
    let mut frag = Fragment::new(file.path.clone());
    frag.entity_with(
        file.path.clone(),
        kinds::DOCUMENT,
        [
            ("format", ext.to_string()),
            ("size_bytes", bytes.len().to_string()),
        ],
    );
    Ok(frag)
}

/// Split a CSV header line, honouring double-quoted fields.
fn split_csv_header(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}
