//! Office document extraction: DOCX via zip + quick-xml, XLSX/XLS via
//! calamine, legacy DOC via antiword.

use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::process::Command;

use calamine::{Data, Reader};
use quick_xml::events::Event;

use super::{handle_cmd_output, RawText, TableHint, TextError};
use crate::models::DocumentFormat;

/// Render one table row. Two-cell rows read as "label: value".
fn render_row(cells: &[String]) -> String {
    let filled: Vec<&str> = cells
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    match filled.as_slice() {
        [label, value] => format!("{}: {}", label.trim_end_matches(':'), value),
        _ => filled.join("\t"),
    }
}

/// Extract paragraphs and tables from `word/document.xml`.
pub(super) fn extract_docx(content: &[u8]) -> Result<RawText, TextError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(content))
        .map_err(|e| TextError::Corrupted(e.to_string()))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| TextError::Corrupted(e.to_string()))?
        .read_to_string(&mut xml)?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut blocks: Vec<String> = Vec::new();
    let mut tables: Vec<TableHint> = Vec::new();

    let mut table_depth = 0usize;
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_rows: Vec<Vec<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => paragraph.clear(),
                b"w:tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table_rows.clear();
                    }
                }
                b"w:tr" => row.clear(),
                b"w:tc" => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if matches!(e.name().as_ref(), b"w:tab" | b"w:br") {
                    paragraph.push(' ');
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| TextError::Corrupted(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:p" => {
                    let line = paragraph.trim();
                    if table_depth > 0 {
                        if !cell.is_empty() && !line.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(line);
                    } else if !line.is_empty() {
                        blocks.push(line.to_string());
                    }
                    paragraph.clear();
                }
                b"w:tc" => {
                    row.push(cell.trim().to_string());
                    cell.clear();
                }
                b"w:tr" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        table_rows.push(std::mem::take(&mut row));
                    }
                }
                b"w:tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !table_rows.is_empty() {
                        tables.push(TableHint {
                            page: 1,
                            rows: table_rows.len(),
                            columns: table_rows.iter().map(|r| r.len()).max().unwrap_or(0),
                        });
                        blocks.extend(table_rows.iter().map(|r| render_row(r)));
                        table_rows.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(TextError::Corrupted(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(RawText {
        text: blocks.join("\n"),
        page_count: 1,
        tables,
    })
}

/// Extract every sheet of an XLSX or XLS workbook. Each sheet counts as a page.
pub(super) fn extract_spreadsheet(
    content: &[u8],
    format: DocumentFormat,
) -> Result<RawText, TextError> {
    match format {
        DocumentFormat::Xlsx => {
            let mut workbook = calamine::Xlsx::new(Cursor::new(content))
                .map_err(|e| TextError::Corrupted(e.to_string()))?;
            Ok(read_sheets(&mut workbook))
        }
        DocumentFormat::Xls => {
            let mut workbook = calamine::Xls::new(Cursor::new(content))
                .map_err(|e| TextError::Corrupted(e.to_string()))?;
            Ok(read_sheets(&mut workbook))
        }
        other => Err(TextError::UnsupportedFormat(other.as_str().to_string())),
    }
}

fn read_sheets<RS, R>(workbook: &mut R) -> RawText
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let names = workbook.sheet_names().to_vec();
    let mut blocks = Vec::new();
    let mut tables = Vec::new();

    for (idx, name) in names.iter().enumerate() {
        let Ok(range) = workbook.worksheet_range(name) else {
            continue;
        };
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .filter(|row: &Vec<String>| row.iter().any(|c| !c.trim().is_empty()))
            .collect();
        if rows.is_empty() {
            continue;
        }

        tables.push(TableHint {
            page: idx as u32 + 1,
            rows: rows.len(),
            columns: range.width(),
        });
        blocks.push(name.clone());
        blocks.extend(rows.iter().map(|r| render_row(r)));
    }

    RawText {
        text: blocks.join("\n"),
        page_count: names.len().max(1) as u32,
        tables,
    }
}

fn cell_to_string(cell: &Data) -> String {
    cell.to_string()
}

/// Extract a legacy Word document with antiword.
pub(super) fn extract_doc(path: &Path) -> Result<RawText, TextError> {
    let antiword = which::which("antiword")
        .map_err(|_| TextError::ToolNotFound("antiword".to_string()))?;
    let output = Command::new(antiword).arg(path).output();
    let text = handle_cmd_output(output, "antiword", TextError::Corrupted)?;
    let page_count = text.matches('\x0c').count().max(1) as u32;
    Ok(RawText::new(text.replace('\x0c', "\n"), page_count))
}
