use std::io::{Cursor, Read};

use lopdf::Document as PdfDocument;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;
use zip::ZipArchive;

use super::types::{DocumentKind, ExtractionError};

const DOCX_BODY_PART: &str = "word/document.xml";

/// Extract plain text from an upload based on its declared media type.
pub fn extract(content: &[u8], media_type: &str) -> Result<String, ExtractionError> {
    match DocumentKind::from_media_type(media_type) {
        Some(DocumentKind::Pdf) => extract_pdf(content),
        Some(DocumentKind::Docx) => extract_docx(content),
        None => Err(ExtractionError::UnsupportedType(media_type.to_string())),
    }
}

/// Page text in page order. Pages without text contribute nothing.
///
/// lopdf closes every text object with a newline; the one trailing a page is
/// dropped so pages join with no separator of their own.
fn extract_pdf(content: &[u8]) -> Result<String, ExtractionError> {
    let document = PdfDocument::load_mem(content)
        .map_err(|err| ExtractionError::failed(DocumentKind::Pdf, err))?;

    let mut text = String::new();
    for page_number in document.get_pages().into_keys() {
        let page_text = document
            .extract_text(&[page_number])
            .map_err(|err| ExtractionError::failed(DocumentKind::Pdf, err))?;
        let page_text = page_text.strip_suffix('\n').unwrap_or(&page_text);
        debug!(page_number, chars = page_text.len(), "extracted pdf page");
        text.push_str(page_text);
    }

    Ok(text)
}

fn extract_docx(content: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = ZipArchive::new(Cursor::new(content))
        .map_err(|err| ExtractionError::failed(DocumentKind::Docx, err))?;

    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY_PART)
        .map_err(|err| ExtractionError::failed(DocumentKind::Docx, err))?
        .read_to_string(&mut xml)
        .map_err(|err| ExtractionError::failed(DocumentKind::Docx, err))?;

    body_paragraphs(&xml).map_err(|err| ExtractionError::failed(DocumentKind::Docx, err))
}

/// Walk `word/document.xml` and emit each body paragraph followed by a newline.
///
/// Only `w:t` runs count as text. Tabs and breaks inside runs map to `\t` and
/// `\n`. Paragraphs inside tables are not body paragraphs and are skipped.
fn body_paragraphs(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut paragraph = String::new();
    let mut table_depth = 0usize;
    let mut paragraph_depth = 0usize;
    let mut in_run = false;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"tbl" => table_depth += 1,
                b"p" => {
                    if paragraph_depth == 0 {
                        paragraph.clear();
                    }
                    paragraph_depth += 1;
                }
                b"r" => in_run = true,
                b"t" if in_run => in_text = true,
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"p" if table_depth == 0 && paragraph_depth == 0 => text.push('\n'),
                b"tab" if in_run => paragraph.push('\t'),
                b"br" | b"cr" if in_run => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(run_text) if in_text => paragraph.push_str(&run_text.unescape()?),
            Event::CData(run_text) if in_text => {
                paragraph.push_str(&String::from_utf8_lossy(&run_text.into_inner()))
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                b"r" => in_run = false,
                b"t" => in_text = false,
                b"p" => {
                    paragraph_depth = paragraph_depth.saturating_sub(1);
                    if paragraph_depth == 0 && table_depth == 0 {
                        text.push_str(&paragraph);
                        text.push('\n');
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text)
}
