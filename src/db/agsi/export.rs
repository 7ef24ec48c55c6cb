use std::str::FromStr;

use csv::Writer;
use log::warn;

use crate::{
    db::agsi::gas_storage_archive::{DailyRecord, GasStorageArchive},
    error::GasStorageError,
};

pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const FILE_STEM: &str = "gas_storage";
const COLUMNS: [&str; 4] = ["date", "percent", "delta", "comment"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl FromStr for ExportFormat {
    type Err = GasStorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "xls" => Ok(ExportFormat::Xlsx),
            _ => Err(GasStorageError::InvalidInput(format!("Unknown format: {}", s))),
        }
    }
}

/// A file ready to be sent as an attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Writes the records as a spreadsheet.
pub type SheetWriter = fn(&[DailyRecord]) -> Result<Vec<u8>, GasStorageError>;

fn comment_cell(r: &DailyRecord) -> String {
    r.comment.as_deref().unwrap_or("").replace('\n', " ").trim().to_string()
}

pub fn to_csv(records: &[DailyRecord]) -> Result<Vec<u8>, GasStorageError> {
    let mut wtr = Writer::from_writer(vec![]);
    wtr.write_record(COLUMNS)
        .map_err(|e| GasStorageError::Internal(e.to_string()))?;
    for r in records {
        wtr.write_record([
            r.date.to_string(),
            format!("{:.2}", r.percent),
            r.delta.map(|d| format!("{:.2}", d)).unwrap_or_default(),
            comment_cell(r),
        ])
        .map_err(|e| GasStorageError::Internal(e.to_string()))?;
    }
    wtr.into_inner()
        .map_err(|e| GasStorageError::Internal(e.to_string()))
}

#[cfg(feature = "xlsx")]
mod sheet {
    use std::io::{Cursor, Write};

    use quick_xml::{
        events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
        Writer,
    };
    use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

    use super::COLUMNS;
    use crate::{db::agsi::gas_storage_archive::DailyRecord, error::GasStorageError};

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;

    const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="gas_storage" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#;

    const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;

    type Sheet = Writer<Vec<u8>>;

    fn xml_err(e: impl std::fmt::Display) -> GasStorageError {
        GasStorageError::Internal(format!("xlsx: {}", e))
    }

    fn put(w: &mut Sheet, event: Event) -> Result<(), GasStorageError> {
        w.write_event(event).map_err(xml_err)
    }

    /// Drop the characters XML 1.0 does not allow in a document.
    pub(super) fn xml_safe(s: &str) -> String {
        s.chars()
            .filter(|c| {
                matches!(*c,
                    '\t' | '\n' | '\r'
                    | '\u{20}'..='\u{D7FF}'
                    | '\u{E000}'..='\u{FFFD}'
                    | '\u{10000}'..='\u{10FFFF}')
            })
            .collect()
    }

    fn text_cell(w: &mut Sheet, s: &str) -> Result<(), GasStorageError> {
        let clean = xml_safe(s);
        put(w, Event::Start(BytesStart::new("c").with_attributes([("t", "inlineStr")])))?;
        put(w, Event::Start(BytesStart::new("is")))?;
        put(w, Event::Start(BytesStart::new("t")))?;
        put(w, Event::Text(BytesText::new(&clean)))?;
        put(w, Event::End(BytesEnd::new("t")))?;
        put(w, Event::End(BytesEnd::new("is")))?;
        put(w, Event::End(BytesEnd::new("c")))
    }

    fn number_cell(w: &mut Sheet, x: Option<f64>) -> Result<(), GasStorageError> {
        match x {
            Some(x) => {
                let v = format!("{:.2}", x);
                put(w, Event::Start(BytesStart::new("c")))?;
                put(w, Event::Start(BytesStart::new("v")))?;
                put(w, Event::Text(BytesText::new(&v)))?;
                put(w, Event::End(BytesEnd::new("v")))?;
                put(w, Event::End(BytesEnd::new("c")))
            }
            None => put(w, Event::Empty(BytesStart::new("c"))),
        }
    }

    /// The worksheet xml: a header row, then one row per record.
    pub(super) fn worksheet(records: &[DailyRecord]) -> Result<Vec<u8>, GasStorageError> {
        let mut w = Writer::new(Vec::new());
        put(&mut w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        put(
            &mut w,
            Event::Start(BytesStart::new("worksheet").with_attributes([(
                "xmlns",
                "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
            )])),
        )?;
        put(&mut w, Event::Start(BytesStart::new("sheetData")))?;
        put(&mut w, Event::Start(BytesStart::new("row")))?;
        for c in COLUMNS {
            text_cell(&mut w, c)?;
        }
        put(&mut w, Event::End(BytesEnd::new("row")))?;
        for r in records {
            put(&mut w, Event::Start(BytesStart::new("row")))?;
            text_cell(&mut w, &r.date.to_string())?;
            number_cell(&mut w, Some(r.percent))?;
            number_cell(&mut w, r.delta)?;
            text_cell(&mut w, r.comment.as_deref().unwrap_or("").trim())?;
            put(&mut w, Event::End(BytesEnd::new("row")))?;
        }
        put(&mut w, Event::End(BytesEnd::new("sheetData")))?;
        put(&mut w, Event::End(BytesEnd::new("worksheet")))?;
        Ok(w.into_inner())
    }

    pub fn xlsx_bytes(records: &[DailyRecord]) -> Result<Vec<u8>, GasStorageError> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let sheet = worksheet(records)?;
        let parts: [(&str, &[u8]); 5] = [
            ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
            ("_rels/.rels", ROOT_RELS.as_bytes()),
            ("xl/workbook.xml", WORKBOOK.as_bytes()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes()),
            ("xl/worksheets/sheet1.xml", &sheet),
        ];
        for (name, content) in parts {
            zip.start_file(name, options).map_err(xml_err)?;
            zip.write_all(content).map_err(xml_err)?;
        }
        let cursor = zip.finish().map_err(xml_err)?;
        Ok(cursor.into_inner())
    }
}

#[cfg(feature = "xlsx")]
pub use sheet::xlsx_bytes;

#[cfg(not(feature = "xlsx"))]
pub fn xlsx_bytes(_records: &[DailyRecord]) -> Result<Vec<u8>, GasStorageError> {
    Err(GasStorageError::Internal(
        "built without the xlsx feature".to_string(),
    ))
}

pub fn export_records(
    records: &[DailyRecord],
    format: ExportFormat,
) -> Result<ExportFile, GasStorageError> {
    export_records_with(records, format, xlsx_bytes)
}

/// Serialize `records`.  A spreadsheet that cannot be written is replaced
/// by the CSV file.
pub fn export_records_with(
    records: &[DailyRecord],
    format: ExportFormat,
    sheet_writer: SheetWriter,
) -> Result<ExportFile, GasStorageError> {
    if format == ExportFormat::Xlsx {
        match sheet_writer(records) {
            Ok(bytes) => {
                return Ok(ExportFile {
                    content_type: XLSX_CONTENT_TYPE,
                    filename: format!("{}.xlsx", FILE_STEM),
                    bytes,
                })
            }
            Err(e) => warn!("{}, exporting csv instead", e),
        }
    }
    Ok(ExportFile {
        content_type: CSV_CONTENT_TYPE,
        filename: format!("{}.csv", FILE_STEM),
        bytes: to_csv(records)?,
    })
}

/// Export the last `days` records.
pub fn export_window(
    archive: &GasStorageArchive,
    days: u32,
    format: ExportFormat,
) -> Result<ExportFile, GasStorageError> {
    let conn = archive.connection()?;
    let records = archive.get_last_n(&conn, days)?;
    export_records(&records, format)
}
