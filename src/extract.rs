//! Document parsing: raw bytes + declared mime type → normalized text.
//!
//! Supported formats:
//!
//! | Format | Mime type | Decoder |
//! |--------|-----------|---------|
//! | plain text | `text/plain` | UTF-8 (lossy) |
//! | markdown | `text/markdown` | UTF-8 (lossy), title from first `# ` heading |
//! | PDF | `application/pdf` | `pdf-extract` text, `lopdf` page count and Info dictionary |
//! | Word 97-2003 | `application/msword` | OLE2 signature check, then text-run recovery |
//! | Word | `…wordprocessingml.document` | `word/document.xml` + `docProps/core.xml` |
//! | PowerPoint | `…presentationml.presentation` | `ppt/slides/slideN.xml` in slide order |
//!
//! Every failure is fatal for the document; nothing here retries.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use tutor_rag_core::chunk::{count_words, normalize_text};
use tutor_rag_core::error::{ParseError, MIN_CONTENT_CHARS};
use tutor_rag_core::models::{ParseMetadata, ParsedDocument};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// OLE2 compound file signature.
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Shortest printable run kept when recovering text from a `.doc` file.
const MIN_DOC_RUN_CHARS: usize = 8;

pub fn is_supported_mime(mime: &str) -> bool {
    matches!(
        mime,
        MIME_TEXT | MIME_MARKDOWN | MIME_PDF | MIME_DOC | MIME_DOCX | MIME_PPTX
    )
}

/// Guess a supported mime type from a filename extension.
pub fn mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "pdf" => Some(MIME_PDF),
        "doc" => Some(MIME_DOC),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        _ => None,
    }
}

/// Parse `bytes` declared as `mime` into normalized text and metadata.
///
/// Fails with [`ParseError::EmptyContent`] when fewer than
/// [`MIN_CONTENT_CHARS`] characters survive extraction.
pub fn parse_document(
    bytes: &[u8],
    filename: &str,
    mime: &str,
) -> Result<ParsedDocument, ParseError> {
    let Extracted {
        text,
        title,
        author,
        page_count,
    } = match mime {
        MIME_TEXT => extract_plain(bytes),
        MIME_MARKDOWN => extract_markdown(bytes),
        MIME_PDF => extract_pdf(bytes)?,
        MIME_DOC => extract_doc(bytes)?,
        MIME_DOCX => extract_docx(bytes)?,
        MIME_PPTX => extract_pptx(bytes)?,
        other => return Err(ParseError::UnsupportedFormat(other.to_string())),
    };

    let text = normalize_text(&text);
    let char_count = text.chars().count();
    if char_count < MIN_CONTENT_CHARS {
        return Err(ParseError::EmptyContent {
            chars: char_count,
            bytes: bytes.len(),
            min: MIN_CONTENT_CHARS,
        });
    }

    let title = title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| filename_stem(filename));

    tracing::debug!(
        filename,
        mime,
        chars = char_count,
        pages = page_count,
        "parsed document"
    );

    Ok(ParsedDocument {
        metadata: ParseMetadata {
            title,
            author: author.filter(|a| !a.trim().is_empty()),
            page_count,
            word_count: count_words(&text),
            char_count,
        },
        text,
    })
}

#[derive(Default)]
struct Extracted {
    text: String,
    title: Option<String>,
    author: Option<String>,
    page_count: Option<u32>,
}

fn filename_stem(filename: &str) -> Option<String> {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn extract_plain(bytes: &[u8]) -> Extracted {
    Extracted {
        text: String::from_utf8_lossy(bytes).into_owned(),
        ..Default::default()
    }
}

fn extract_markdown(bytes: &[u8]) -> Extracted {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let title = text
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("# "))
        .map(|t| t.trim().to_string());
    Extracted {
        text,
        title,
        ..Default::default()
    }
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<Extracted, ParseError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| ParseError::decode("pdf", e))?;

    // Metadata is best effort; text extraction already succeeded.
    let (page_count, title, author) = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => {
            let pages = doc.get_pages().len() as u32;
            let title = pdf_info_string(&doc, b"Title");
            let author = pdf_info_string(&doc, b"Author");
            (Some(pages), title, author)
        }
        Err(e) => {
            tracing::debug!(error = %e, "could not read PDF structure for metadata");
            (None, None, None)
        }
    };

    Ok(Extracted {
        text,
        title,
        author,
        page_count,
    })
}

fn pdf_info_string(doc: &lopdf::Document, key: &[u8]) -> Option<String> {
    let info = resolve(doc, doc.trailer.get(b"Info").ok()?)?;
    let value = resolve(doc, info.as_dict().ok()?.get(key).ok()?)?;
    let raw = value.as_str().ok()?;
    let decoded = decode_pdf_text(raw);
    let trimmed = decoded.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn resolve<'a>(doc: &'a lopdf::Document, obj: &'a lopdf::Object) -> Option<&'a lopdf::Object> {
    match obj {
        lopdf::Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise single-byte.
fn decode_pdf_text(raw: &[u8]) -> String {
    if let Some(body) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    raw.iter().map(|&b| b as char).collect()
}

// ============ Word 97-2003 ============

/// Recover readable text from a `.doc` compound file.
///
/// Word stores body text either as UTF-16LE or as 8-bit characters. Both
/// encodings are scanned for printable runs and the richer result wins.
fn extract_doc(bytes: &[u8]) -> Result<Extracted, ParseError> {
    if !bytes.starts_with(&OLE_MAGIC) {
        return Err(ParseError::decode(
            "doc",
            "missing OLE2 compound file signature",
        ));
    }
    let body = &bytes[OLE_MAGIC.len()..];

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let wide = printable_runs(char::decode_utf16(units.iter().copied()).map(|r| r.ok()));
    let narrow = printable_runs(body.iter().map(|&b| Some(b as char)));

    let text = if wide.len() >= narrow.len() { wide } else { narrow };
    if text.trim().is_empty() {
        return Err(ParseError::decode("doc", "no readable text found"));
    }
    Ok(Extracted {
        text,
        ..Default::default()
    })
}

fn printable_runs(chars: impl Iterator<Item = Option<char>>) -> String {
    let mut out = String::new();
    let mut run = String::new();
    let mut run_len = 0usize;

    for ch in chars {
        match ch {
            Some(c) if is_doc_text_char(c) => {
                run.push(if c == '\r' { '\n' } else { c });
                run_len += 1;
            }
            _ => flush_run(&mut run, &mut run_len, &mut out),
        }
    }
    flush_run(&mut run, &mut run_len, &mut out);
    out
}

fn flush_run(run: &mut String, run_len: &mut usize, out: &mut String) {
    if *run_len >= MIN_DOC_RUN_CHARS && run.chars().any(|c| c.is_alphabetic()) {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(run.trim());
    }
    run.clear();
    *run_len = 0;
}

fn is_doc_text_char(c: char) -> bool {
    match c {
        '\r' | '\n' | '\t' => true,
        c if c.is_control() => false,
        c => c.is_ascii_graphic()
            || c == ' '
            || (c.is_alphanumeric() && (c as u32) < 0x2000)
            || matches!(c, '\u{2018}'..='\u{201D}' | '\u{2013}' | '\u{2014}' | '\u{2026}'),
    }
}

// ============ OOXML ============

fn open_zip<'a>(
    bytes: &'a [u8],
    format: &'static str,
) -> Result<zip::ZipArchive<std::io::Cursor<&'a [u8]>>, ParseError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ParseError::decode(format, e))
}

fn read_zip_entry_bounded<'a>(
    archive: &mut zip::ZipArchive<std::io::Cursor<&'a [u8]>>,
    name: &str,
    format: &'static str,
) -> Result<Vec<u8>, ParseError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ParseError::decode(format, format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ParseError::decode(format, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ParseError::decode(
            format,
            format!(
                "ZIP entry {} exceeds size limit ({} bytes)",
                name, MAX_XML_ENTRY_BYTES
            ),
        ));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Extracted, ParseError> {
    let mut archive = open_zip(bytes, "docx")?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", "docx")?;
    let text = ooxml_paragraphs(&doc_xml, "docx")?.join("\n\n");

    let (title, author) = if archive.file_names().any(|n| n == "docProps/core.xml") {
        let core = read_zip_entry_bounded(&mut archive, "docProps/core.xml", "docx")?;
        core_properties(&core)
    } else {
        (None, None)
    };

    Ok(Extracted {
        text,
        title,
        author,
        page_count: None,
    })
}

fn extract_pptx(bytes: &[u8]) -> Result<Extracted, ParseError> {
    let mut archive = open_zip(bytes, "pptx")?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in &slide_names {
        let xml = read_zip_entry_bounded(&mut archive, name, "pptx")?;
        let text = ooxml_paragraphs(&xml, "pptx")?.join("\n");
        if !text.is_empty() {
            slides.push(text);
        }
    }

    let (title, author) = if archive.file_names().any(|n| n == "docProps/core.xml") {
        let core = read_zip_entry_bounded(&mut archive, "docProps/core.xml", "pptx")?;
        core_properties(&core)
    } else {
        (None, None)
    };

    Ok(Extracted {
        text: slides.join("\n\n"),
        title,
        author,
        page_count: Some(slide_names.len() as u32),
    })
}

/// Collect the text of every non-empty `<w:p>` / `<a:p>` paragraph.
///
/// Runs (`<w:t>`, `<a:t>`) are concatenated verbatim; tabs and line breaks
/// inside a paragraph become whitespace.
fn ooxml_paragraphs(xml: &[u8], format: &'static str) -> Result<Vec<String>, ParseError> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ParseError::decode(format, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::decode(format, e)),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs)
}

/// `dc:title` and `dc:creator` from `docProps/core.xml`. Malformed
/// properties are ignored.
fn core_properties(xml: &[u8]) -> (Option<String>, Option<String>) {
    let mut title = None;
    let mut creator = None;
    let mut field: Option<&'static str> = None;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                field = match e.local_name().as_ref() {
                    b"title" => Some("title"),
                    b"creator" => Some("creator"),
                    _ => None,
                };
            }
            Ok(Event::Text(te)) => {
                if let (Some(name), Ok(value)) = (field, te.unescape()) {
                    let value = value.trim().to_string();
                    if !value.is_empty() {
                        match name {
                            "title" => title = Some(value),
                            _ => creator = Some(value),
                        }
                    }
                }
            }
            Ok(Event::End(_)) => field = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    (title, creator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LESSON: &str = "Photosynthesis converts light energy into chemical energy stored in glucose.";

    fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn docx(paragraphs: &[&str], core: Option<&str>) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let mut entries = vec![(
            "word/document.xml",
            format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            ),
        )];
        if let Some(core) = core {
            entries.push(("docProps/core.xml", core.to_string()));
        }
        zip_with(&entries)
    }

    fn slide(text: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            text
        )
    }

    #[test]
    fn test_plain_text_uses_filename_title() {
        let parsed = parse_document(LESSON.as_bytes(), "biology-notes.txt", MIME_TEXT).unwrap();
        assert_eq!(parsed.text, LESSON);
        assert_eq!(parsed.metadata.title.as_deref(), Some("biology-notes"));
        assert_eq!(parsed.metadata.word_count, 10);
        assert_eq!(parsed.metadata.char_count, LESSON.chars().count());
        assert_eq!(parsed.metadata.page_count, None);
    }

    #[test]
    fn test_short_text_is_empty_content() {
        let text = "Forty characters of text is not enough.";
        let err = parse_document(text.as_bytes(), "short.txt", MIME_TEXT).unwrap_err();
        match err {
            ParseError::EmptyContent { chars, bytes, min } => {
                assert_eq!(chars, text.len());
                assert_eq!(bytes, text.len());
                assert_eq!(min, 50);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_whitespace_does_not_count_toward_length() {
        let padded = format!("   short text \n\n\n\n{}", " ".repeat(100));
        assert!(matches!(
            parse_document(padded.as_bytes(), "pad.txt", MIME_TEXT),
            Err(ParseError::EmptyContent { chars: 10, .. })
        ));
    }

    #[test]
    fn test_markdown_title_from_heading() {
        let md = format!("Intro line\n\n# Cell Biology\n\n{}\n", LESSON);
        let parsed = parse_document(md.as_bytes(), "cells.md", MIME_MARKDOWN).unwrap();
        assert_eq!(parsed.metadata.title.as_deref(), Some("Cell Biology"));
        assert!(parsed.text.contains("glucose"));
    }

    #[test]
    fn test_unsupported_format() {
        let err = parse_document(b"\x89PNG", "photo.png", "image/png").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(ref m) if m == "image/png"));
    }

    #[test]
    fn test_docx_paragraphs_and_core_properties() {
        let core = "<?xml version=\"1.0\"?><cp:coreProperties xmlns:cp=\"cp\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><dc:title>Plant Energy</dc:title><dc:creator>Ada Lovelace</dc:creator></cp:coreProperties>";
        let bytes = docx(&[LESSON, "The Calvin cycle fixes carbon dioxide into sugars."], Some(core));
        let parsed = parse_document(&bytes, "plants.docx", MIME_DOCX).unwrap();
        assert_eq!(
            parsed.text,
            format!("{}\n\nThe Calvin cycle fixes carbon dioxide into sugars.", LESSON)
        );
        assert_eq!(parsed.metadata.title.as_deref(), Some("Plant Energy"));
        assert_eq!(parsed.metadata.author.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_docx_without_core_falls_back_to_filename() {
        let bytes = docx(&[LESSON], None);
        let parsed = parse_document(&bytes, "week-3.docx", MIME_DOCX).unwrap();
        assert_eq!(parsed.metadata.title.as_deref(), Some("week-3"));
        assert_eq!(parsed.metadata.author, None);
    }

    #[test]
    fn test_docx_missing_document_xml_is_decode_error() {
        let bytes = zip_with(&[("word/other.xml", "<x/>".to_string())]);
        let err = parse_document(&bytes, "broken.docx", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ParseError::Decode { format: "docx", .. }));
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_corrupt_zip_is_decode_error() {
        let err = parse_document(b"not a zip archive", "x.pptx", MIME_PPTX).unwrap_err();
        assert!(matches!(err, ParseError::Decode { format: "pptx", .. }));
    }

    #[test]
    fn test_pptx_slide_order_and_page_count() {
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", slide("Tenth slide closes the lesson on cellular respiration.")),
            ("ppt/slides/slide2.xml", slide("Second slide covers the light reactions in detail.")),
            ("ppt/slides/slide1.xml", slide("First slide introduces photosynthesis for the class.")),
        ]);
        let parsed = parse_document(&bytes, "deck.pptx", MIME_PPTX).unwrap();
        assert_eq!(parsed.metadata.page_count, Some(3));
        let first = parsed.text.find("First").unwrap();
        let second = parsed.text.find("Second").unwrap();
        let tenth = parsed.text.find("Tenth").unwrap();
        assert!(first < second && second < tenth);
    }

    #[test]
    fn test_doc_recovers_utf16_text() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        for unit in LESSON.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 16]);
        let parsed = parse_document(&bytes, "old.doc", MIME_DOC).unwrap();
        assert!(parsed.text.contains(LESSON));
    }

    #[test]
    fn test_doc_without_signature_is_decode_error() {
        let err = parse_document(LESSON.as_bytes(), "fake.doc", MIME_DOC).unwrap_err();
        assert!(matches!(err, ParseError::Decode { format: "doc", .. }));
    }

    #[test]
    fn test_invalid_pdf_is_decode_error() {
        let err = parse_document(b"not a valid pdf", "x.pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ParseError::Decode { format: "pdf", .. }));
    }

    #[test]
    fn test_mime_from_filename() {
        assert_eq!(mime_from_filename("Notes.MD"), Some(MIME_MARKDOWN));
        assert_eq!(mime_from_filename("a/b/deck.pptx"), Some(MIME_PPTX));
        assert_eq!(mime_from_filename("legacy.doc"), Some(MIME_DOC));
        assert_eq!(mime_from_filename("sheet.xlsx"), None);
        assert_eq!(mime_from_filename("README"), None);
        assert!(is_supported_mime(MIME_PDF));
        assert!(!is_supported_mime("text/html"));
    }
}
