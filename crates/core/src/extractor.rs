use crate::error::IngestError;
use crate::models::Document;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use zip::ZipArchive;

const DOCX_BODY: &str = "word/document.xml";
const FORM_FEED: char = '\u{000c}';

/// Reads one file into zero or more documents. Files that parse but carry no
/// text yield no documents; unreadable files are errors.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<Document>, IngestError>;
}

/// Endpoint that turns a base64 PDF into page text, used when a PDF has no
/// text layer.
#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Option<Vec<OcrPage>>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

impl OcrResponse {
    /// Non-empty page texts in page order. Falls back to `text` split on
    /// form feeds when no page list is present.
    fn into_pages(self) -> Vec<String> {
        let mut listed = self
            .pages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|page| {
                let text = page.text?.trim().to_string();
                (!text.is_empty()).then_some((page.page.unwrap_or(1), text))
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            listed.sort_by_key(|(number, _)| *number);
            return listed.into_iter().map(|(_, text)| text).collect();
        }

        self.text
            .unwrap_or_default()
            .split(FORM_FEED)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl OcrEndpointConfig {
    fn recognize(&self, path: &Path, pdf: &[u8]) -> Result<Vec<String>, IngestError> {
        let client = Client::builder().timeout(self.timeout).build()?;
        let mut request = client.post(&self.endpoint).json(&OcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: path.to_string_lossy().to_string(),
        });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "ocr request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: OcrResponse = response.json()?;
        Ok(payload.into_pages())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PdfExtractor {
    ocr: Option<OcrEndpointConfig>,
}

impl PdfExtractor {
    pub fn with_ocr(ocr: OcrEndpointConfig) -> Self {
        Self { ocr: Some(ocr) }
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Document>, IngestError> {
        let bytes = std::fs::read(path)?;
        let document = lopdf::Document::load_mem(&bytes)
            .map_err(|error| IngestError::PdfParse(format!("{}: {error}", path.display())))?;
        let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();

        let mut pages = Vec::new();
        for page_no in &page_numbers {
            let text = document
                .extract_text(&[*page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            let text = text.trim();
            if !text.is_empty() {
                pages.push(text.to_string());
            }
        }

        if pages.is_empty() {
            if let Some(ocr) = &self.ocr {
                debug!(path = %path.display(), endpoint = %ocr.endpoint, "pdf has no text layer, trying ocr");
                pages = ocr.recognize(path, &bytes)?;
            }
        }

        if pages.is_empty() {
            warn!(path = %path.display(), "pdf has no readable text, skipping");
            return Ok(Vec::new());
        }

        let page_count = page_numbers.len() as u32;
        Ok(vec![make_document(path, &bytes, pages.join("\n\n"), Some(page_count))?])
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Document>, IngestError> {
        let bytes = std::fs::read(path)?;
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;

        let mut xml = String::new();
        archive
            .by_name(DOCX_BODY)
            .map_err(|error| {
                IngestError::DocxParse(format!("{}: {DOCX_BODY}: {error}", path.display()))
            })?
            .read_to_string(&mut xml)?;

        let text = docx_xml_to_text(&xml)?;
        if text.trim().is_empty() {
            warn!(path = %path.display(), "docx has no readable text, skipping");
            return Ok(Vec::new());
        }

        Ok(vec![make_document(path, &bytes, text, None)?])
    }
}

/// Flattens a WordprocessingML body into plain text, one line per paragraph.
pub fn docx_xml_to_text(xml: &str) -> Result<String, IngestError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.name().as_ref() {
                b"w:t" => in_text_run = true,
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                _ => {}
            },
            Event::Empty(element) => match element.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::End(element) => match element.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Text(text) if in_text_run => current.push_str(&text.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn make_document(
    path: &Path,
    bytes: &[u8],
    text: String,
    page_count: Option<u32>,
) -> Result<Document, IngestError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(Document {
        source_path: path.to_path_buf(),
        file_name: file_name.to_string(),
        checksum: digest_bytes(bytes),
        page_count,
        text,
        loaded_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const BODY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Pump maintenance</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">Check </w:t></w:r><w:r><w:t>seals &amp; valves</w:t></w:r></w:p>
    <w:p/>
    <w:p><w:r><w:t>Step</w:t><w:tab/><w:t>one</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    fn write_docx(path: &Path, body: &str) -> Result<(), Box<dyn std::error::Error>> {
        let file = std::fs::File::create(path)?;
        let mut writer = ZipWriter::new(file);
        writer.start_file(DOCX_BODY, SimpleFileOptions::default())?;
        writer.write_all(body.as_bytes())?;
        writer.finish()?;
        Ok(())
    }

    #[test]
    fn docx_paragraphs_become_lines() -> Result<(), Box<dyn std::error::Error>> {
        let text = docx_xml_to_text(BODY)?;
        assert_eq!(text, "Pump maintenance\nCheck seals & valves\n\nStep\tone");
        Ok(())
    }

    #[test]
    fn docx_extractor_reads_archive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.docx");
        write_docx(&path, BODY)?;

        let documents = DocxExtractor.extract(&path)?;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].file_name, "manual.docx");
        assert_eq!(documents[0].page_count, None);
        assert!(documents[0].text.starts_with("Pump maintenance"));
        assert_eq!(documents[0].checksum, digest_bytes(&std::fs::read(&path)?));
        Ok(())
    }

    #[test]
    fn docx_without_body_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.docx");
        let mut writer = ZipWriter::new(std::fs::File::create(&path)?);
        writer.start_file("word/styles.xml", SimpleFileOptions::default())?;
        writer.write_all(b"<styles/>")?;
        writer.finish()?;

        let result = DocxExtractor.extract(&path);
        assert!(matches!(result, Err(IngestError::DocxParse(_))));
        Ok(())
    }

    /// One page per entry; an empty entry produces a page with no text.
    fn write_pdf(path: &Path, pages: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
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
        doc.save(path)?;
        Ok(())
    }

    #[test]
    fn pdf_pages_are_joined_with_a_blank_line() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("pump.pdf");
        write_pdf(&path, &["Pump manual page one", "Pump manual page two"])?;

        let documents = PdfExtractor::default().extract(&path)?;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].file_name, "pump.pdf");
        assert_eq!(documents[0].page_count, Some(2));
        assert_eq!(documents[0].text, "Pump manual page one\n\nPump manual page two");
        assert_eq!(documents[0].checksum, digest_bytes(&std::fs::read(&path)?));
        Ok(())
    }

    #[test]
    fn pdf_without_text_layer_yields_no_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scanned.pdf");
        write_pdf(&path, &[""])?;

        assert!(PdfExtractor::default().extract(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn failing_ocr_endpoint_aborts_text_less_pdf() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scanned.pdf");
        write_pdf(&path, &[""])?;

        let extractor = PdfExtractor::with_ocr(OcrEndpointConfig {
            endpoint: "http://127.0.0.1:9/ocr".to_string(),
            api_key: None,
            timeout: Duration::from_secs(2),
        });
        let result = extractor.extract(&path);
        assert!(matches!(
            result,
            Err(IngestError::OcrHttp(_)) | Err(IngestError::OcrFailed(_))
        ));
        Ok(())
    }

    #[test]
    fn ocr_pages_keep_order_and_drop_blank_text() -> Result<(), serde_json::Error> {
        let response: OcrResponse = serde_json::from_str(
            r#"{"pages": [{"page": 3, "text": "Third"}, {"page": 2, "text": "  "}, {"page": 1, "text": "First"}]}"#,
        )?;
        assert_eq!(response.into_pages(), vec!["First", "Third"]);
        Ok(())
    }

    #[test]
    fn ocr_text_is_split_on_form_feeds() -> Result<(), serde_json::Error> {
        let response: OcrResponse = serde_json::from_str(r#"{"text": "First\fSecond\n"}"#)?;
        assert_eq!(response.into_pages(), vec!["First", "Second"]);
        Ok(())
    }

    #[test]
    fn blank_docx_yields_no_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("blank.docx");
        write_docx(
            &path,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p/></w:body></w:document>"#,
        )?;

        assert!(DocxExtractor.extract(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = PdfExtractor::default().extract(&path);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }
}
