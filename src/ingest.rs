//! Decoding raw uploads into text or cell grids.

use crate::detector::{file_extension, FileType, PAGE_BREAK};
use crate::error::{Error, Result};
use crate::tabular_extractor::{self, read_delimited};
use crate::text_extractor;
use crate::types::{Extraction, Grid};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use std::io::Cursor;
use std::panic;
use tracing::debug;

/// A decoded document, ready for local extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    /// Page text; pages are separated by form feeds.
    Text { text: String, file_type: FileType },
    /// Spreadsheet cells.
    Grid(Grid),
}

impl DocumentSource {
    /// Decode `bytes` according to the extension of `filename`.
    ///
    /// PDFs go through `pdf-extract` page by page, CSV and TSV through the `csv` reader,
    /// Excel workbooks through `calamine` (first sheet only) and `.txt` dumps are read as
    /// UTF-8. Anything else is rejected with `Validation`.
    pub fn decode(bytes: &[u8], filename: &str) -> Result<Self> {
        let source = match file_extension(filename).as_str() {
            "pdf" => DocumentSource::Text {
                text: pdf_text(bytes)?,
                file_type: FileType::Pdf,
            },
            "csv" => DocumentSource::Grid(read_delimited(bytes, b',')?),
            "tsv" => DocumentSource::Grid(read_delimited(bytes, b'\t')?),
            "txt" => DocumentSource::Text {
                text: String::from_utf8(bytes.to_vec()).map_err(|_| {
                    Error::Validation(format!("{} is not valid UTF-8 text", filename))
                })?,
                file_type: FileType::Text,
            },
            "xls" | "xlsx" => DocumentSource::Grid(read_workbook(bytes)?),
            _ => return Err(Error::Validation(format!("Unsupported file type: {}", filename))),
        };

        debug!(filename, kind = source.kind(), "decoded document");
        Ok(source)
    }

    /// Detect the bank and run the matching local extractor.
    pub fn extract(&self) -> Result<Extraction> {
        match self {
            DocumentSource::Text { text, file_type } => text_extractor::extract(text, *file_type),
            DocumentSource::Grid(grid) => tabular_extractor::extract(grid),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DocumentSource::Text { .. } => "text",
            DocumentSource::Grid(_) => "grid",
        }
    }
}

fn pdf_text(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed inputs.
    let pages = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| Error::Extraction("PDF decoder crashed on malformed input".to_string()))?
        .map_err(|e| Error::Extraction(format!("Failed to extract text from PDF: {}", e)))?;
    Ok(pages.join(&PAGE_BREAK.to_string()))
}

/// First worksheet of an `.xls`/`.xlsx` workbook as trimmed strings.
fn read_workbook(bytes: &[u8]) -> Result<Grid> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| Error::Extraction(format!("Failed to open workbook: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Extraction("Workbook has no worksheets".to_string()))?
        .map_err(|e| Error::Extraction(format!("Failed to read first worksheet: {}", e)))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(Grid::from_rows(rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        // Serial dates become day-first text, the profiles' default order.
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|date| date.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::detect_text;
    use crate::profile::Bank;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    /// One text line per page, Courier 12pt.
    fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let stream = Stream::new(dictionary! {}, content.encode().unwrap());
            let content_id = doc.add_object(stream);
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
    const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const CONTENT_TYPES: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        r#"<Default Extension="rels" "#,
        r#"ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
        r#"<Default Extension="xml" ContentType="application/xml"/>"#,
        r#"<Override PartName="/xl/workbook.xml" ContentType="application/"#,
        r#"vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/"#,
        r#"vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
        "</Types>",
    );
    const PACKAGE_RELS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        r#"<Relationship Id="rId1" Target="xl/workbook.xml" "#,
        r#"Type="http://schemas.openxmlformats.org/officeDocument/2006/"#,
        r#"relationships/officeDocument"/>"#,
        "</Relationships>",
    );
    const WORKBOOK: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
        r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
        r#"<sheets><sheet name="Statement" sheetId="1" r:id="rId1"/></sheets>"#,
        "</workbook>",
    );
    const WORKBOOK_RELS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        r#"<Relationship Id="rId1" Target="worksheets/sheet1.xml" "#,
        r#"Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet"/>"#,
        "</Relationships>",
    );

    fn inline_cell(reference: &str, text: &str) -> String {
        format!(r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#, reference, text)
    }

    /// Minimal single-sheet `.xlsx` package built from inline strings and numbers.
    fn xlsx_workbook(rows: &[Vec<(&str, &str)>]) -> Vec<u8> {
        let mut sheet_rows = String::new();
        for (index, row) in rows.iter().enumerate() {
            let number = index + 1;
            sheet_rows.push_str(&format!(r#"<row r="{}">"#, number));
            for (column, value) in row {
                let reference = format!("{}{}", column, number);
                if value.parse::<f64>().is_ok() {
                    sheet_rows.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, reference, value));
                } else {
                    sheet_rows.push_str(&inline_cell(&reference, value));
                }
            }
            sheet_rows.push_str("</row>");
        }

        let sheet = format!(
            r#"{}<worksheet xmlns="{}"><sheetData>{}</sheetData></worksheet>"#,
            XML_DECL, SPREADSHEET_NS, sheet_rows
        );
        let parts = [
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("_rels/.rels", PACKAGE_RELS.to_string()),
            ("xl/workbook.xml", WORKBOOK.to_string()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
            ("xl/worksheets/sheet1.xml", sheet),
        ];

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(name, FileOptions::<()>::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_decode_csv() {
        let bytes = b"Date,Description\n01/11/2025,POS\n";
        let source = DocumentSource::decode(bytes, "stmt.CSV").unwrap();
        let DocumentSource::Grid(grid) = source else {
            panic!("expected a grid");
        };
        assert_eq!(grid.rows.len(), 2);
        assert_eq!(grid.rows[1], vec!["01/11/2025".to_string(), "POS".to_string()]);
    }

    #[test]
    fn test_decode_tsv() {
        let bytes = b"Date\tAmount\n01/11/2025\t-5.00\n";
        let source = DocumentSource::decode(bytes, "stmt.tsv").unwrap();
        let DocumentSource::Grid(grid) = source else {
            panic!("expected a grid");
        };
        assert_eq!(grid.rows[1][1], "-5.00");
    }

    #[test]
    fn test_decode_text() {
        let source = DocumentSource::decode("Zenith Bank\n".as_bytes(), "dump.txt").unwrap();
        assert_eq!(
            source,
            DocumentSource::Text {
                text: "Zenith Bank\n".into(),
                file_type: FileType::Text,
            }
        );
    }

    #[test]
    fn test_rejected_types() {
        for name in ["photo.png", "letter.docx", "noextension"] {
            let err = DocumentSource::decode(b"irrelevant", name).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{}", name);
        }
        let err = DocumentSource::decode(&[0xff, 0xfe, 0x00], "dump.txt").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_invalid_pdf_is_an_extraction_error() {
        let err = DocumentSource::decode(b"definitely not a pdf", "stmt.pdf").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn test_pdf_pages_are_separated_by_form_feeds() {
        let bytes = pdf_with_pages(&["lorem ipsum", "dolor sit", "Union Bank of Nigeria"]);
        let source = DocumentSource::decode(&bytes, "stmt.pdf").unwrap();
        let DocumentSource::Text { text, file_type } = source else {
            panic!("expected text");
        };
        assert_eq!(file_type, FileType::Pdf);
        assert_eq!(text.matches(PAGE_BREAK).count(), 2);

        // The bank name sits on page three, past the detection sample.
        let detection = detect_text(&text, file_type);
        assert_eq!(detection.pages, Some(3));
        assert_eq!(detection.bank, Bank::Unknown);
    }

    #[test]
    fn test_decode_xlsx_first_sheet() {
        let bytes = xlsx_workbook(&[
            vec![("A", "Zenith Bank Plc")],
            vec![
                ("A", "Trans Date"),
                ("B", "Remarks"),
                ("C", "Withdrawals"),
                ("D", "Lodgements"),
                ("E", "Balance"),
            ],
            vec![
                ("A", "03/10/2025"),
                ("B", "POS PURCHASE SHOPRITE"),
                ("C", "2500"),
                ("E", "7500.5"),
            ],
        ]);

        let source = DocumentSource::decode(&bytes, "Statement.XLSX").unwrap();
        let DocumentSource::Grid(grid) = source else {
            panic!("expected a grid");
        };
        assert_eq!(grid.rows.len(), 3);
        assert_eq!(grid.rows[0][0], "Zenith Bank Plc");
        assert_eq!(
            grid.rows[2],
            vec!["03/10/2025", "POS PURCHASE SHOPRITE", "2500", "", "7500.5"]
        );

        let extraction = DocumentSource::Grid(grid).extract().unwrap();
        assert_eq!(extraction.detection.bank, Bank::ZenithBank);
        assert_eq!(extraction.transactions.len(), 1);
        assert_eq!(extraction.transactions[0].debit, rust_decimal::Decimal::from(2500));
    }

    #[test]
    fn test_corrupt_workbook_is_an_extraction_error() {
        let err = DocumentSource::decode(b"PK not really a zip", "book.xlsx").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
