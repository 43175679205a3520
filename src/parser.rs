//! Markdown and Word (.docx) parsing into [`Prd`] sections.
//!
//! Headings start sections. Text before the first heading becomes an
//! "Overview" section, sections without a body are dropped, and a document
//! with no usable headings becomes a single "Document Content" section.
//! Each section gets a priority from keyword matching and tags from its
//! title plus any `#hashtags` in its body.

use regex::Regex;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use crate::models::{Prd, PrdSection, Priority};

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Characters of the first section used as a fallback description.
const DESCRIPTION_CHARS: usize = 200;

const OVERVIEW_TITLE: &str = "Overview";
const FALLBACK_TITLE: &str = "Document Content";

const CRITICAL_KEYWORDS: [&str; 5] = ["critical", "must have", "essential", "required", "mandatory"];
const HIGH_KEYWORDS: [&str; 4] = ["important", "high priority", "key", "core"];
const LOW_KEYWORDS: [&str; 4] = ["nice to have", "optional", "future", "low priority"];

/// Title patterns that tag a section with a well-known PRD section kind.
const SECTION_PATTERNS: [(&str, &[&str]); 10] = [
    ("overview", &["overview", "summary", "introduction", "executive summary"]),
    ("objectives", &["objectives", "goals", "purpose"]),
    ("requirements", &["requirements", "functional requirements", "specifications"]),
    ("features", &["features", "capabilities", "functionality"]),
    ("constraints", &["constraints", "limitations", "restrictions"]),
    ("stakeholders", &["stakeholders", "users", "audience"]),
    ("metrics", &["metrics", "kpis", "success criteria", "measurements"]),
    ("dependencies", &["dependencies", "prerequisites", "integrations"]),
    ("risks", &["risks", "challenges", "concerns"]),
    ("timeline", &["timeline", "schedule", "milestones"]),
];

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Unsupported file type: {0}. Supported types: .docx, .md, .markdown")]
    UnsupportedType(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse Word document: {0}")]
    Docx(String),
}

/// Parse a file, choosing the parser by extension. The PRD name defaults to the file stem.
pub fn parse_document(
    path: &Path,
    name: Option<String>,
    description: Option<String>,
) -> Result<Prd, ParseError> {
    if !path.exists() {
        return Err(ParseError::NotFound(path.display().to_string()));
    }

    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    let name = name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Untitled".to_string())
        });

    let io_err = |source| ParseError::Io {
        path: path.display().to_string(),
        source,
    };

    let prd = match suffix.as_str() {
        ".md" | ".markdown" => {
            let text = std::fs::read_to_string(path).map_err(io_err)?;
            parse_markdown(&text, &name, description)
        }
        ".docx" => {
            let bytes = std::fs::read(path).map_err(io_err)?;
            parse_docx(&bytes, &name, description)?
        }
        other => return Err(ParseError::UnsupportedType(other.to_string())),
    };

    tracing::info!(
        path = %path.display(),
        sections = prd.sections.len(),
        "parsed document"
    );
    Ok(prd)
}

/// Split Markdown on ATX headings (`#` through `######`).
pub fn parse_markdown(text: &str, name: &str, description: Option<String>) -> Prd {
    static HEADING_RE: OnceLock<Regex> = OnceLock::new();
    let heading_re =
        HEADING_RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid heading regex"));

    let mut builder = SectionBuilder::default();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match heading_re.captures(line) {
            Some(caps) => builder.start(caps[2].trim()),
            None => builder.push_line(line),
        }
    }

    let sections = builder.finish(|| text.trim().to_string());
    build_prd(name, description, sections)
}

/// Parse the body of a .docx file. Paragraphs whose style id contains
/// `Heading` start new sections.
pub fn parse_docx(bytes: &[u8], name: &str, description: Option<String>) -> Result<Prd, ParseError> {
    let xml = read_document_xml(bytes)?;
    let paragraphs = docx_paragraphs(&xml)?;

    let mut builder = SectionBuilder::default();
    for para in &paragraphs {
        let text = para.text.trim();
        if text.is_empty() {
            continue;
        }
        if para.is_heading {
            builder.start(text);
        } else {
            builder.push_line(text);
        }
    }

    let sections = builder.finish(|| {
        paragraphs
            .iter()
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    });
    Ok(build_prd(name, description, sections))
}

/// Accumulates heading/body lines into sections.
#[derive(Default)]
struct SectionBuilder {
    sections: Vec<PrdSection>,
    title: Option<String>,
    lines: Vec<String>,
}

impl SectionBuilder {
    fn start(&mut self, title: &str) {
        self.flush();
        self.title = Some(title.to_string());
    }

    fn push_line(&mut self, line: &str) {
        if self.title.is_some() {
            self.lines.push(line.to_string());
        } else if !line.trim().is_empty() && !self.sections.iter().any(|s| s.title == OVERVIEW_TITLE) {
            self.title = Some(OVERVIEW_TITLE.to_string());
            self.lines.push(line.to_string());
        }
    }

    fn flush(&mut self) {
        let lines = std::mem::take(&mut self.lines);
        let Some(title) = self.title.take() else {
            return;
        };
        let content = lines.join("\n").trim().to_string();
        if content.is_empty() {
            return;
        }
        self.sections.push(PrdSection {
            priority: section_priority(&title, &content),
            tags: extract_tags(&title, &content),
            title,
            content,
        });
    }

    /// Finish parsing; `whole_text` supplies the fallback section body.
    fn finish(mut self, whole_text: impl FnOnce() -> String) -> Vec<PrdSection> {
        self.flush();
        if self.sections.is_empty() {
            let content = whole_text();
            if !content.is_empty() {
                self.sections.push(PrdSection {
                    title: FALLBACK_TITLE.to_string(),
                    content,
                    priority: Priority::Medium,
                    tags: Vec::new(),
                });
            }
        }
        self.sections
    }
}

fn build_prd(name: &str, description: Option<String>, sections: Vec<PrdSection>) -> Prd {
    let description = description
        .filter(|d| !d.trim().is_empty())
        .or_else(|| sections.first().map(|s| truncate_description(&s.content)));
    Prd::new(name, description, sections)
}

fn truncate_description(content: &str) -> String {
    if content.chars().count() > DESCRIPTION_CHARS {
        let head: String = content.chars().take(DESCRIPTION_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

/// Priority from keywords in the title or body. Critical wins over high, high over low.
pub fn section_priority(title: &str, content: &str) -> Priority {
    let title = title.to_lowercase();
    let content = content.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| title.contains(w) || content.contains(w));

    if mentions(&CRITICAL_KEYWORDS) {
        Priority::Critical
    } else if mentions(&HIGH_KEYWORDS) {
        Priority::High
    } else if mentions(&LOW_KEYWORDS) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

/// Section-kind tags from the title plus `#hashtags` from the body, sorted and deduplicated.
pub fn extract_tags(title: &str, content: &str) -> Vec<String> {
    static HASHTAG_RE: OnceLock<Regex> = OnceLock::new();
    let hashtag_re = HASHTAG_RE.get_or_init(|| Regex::new(r"#(\w+)").expect("valid hashtag regex"));

    let title = title.to_lowercase();
    let mut tags = BTreeSet::new();

    for (tag, patterns) in SECTION_PATTERNS {
        if patterns.iter().any(|p| title.contains(p)) {
            tags.insert(tag.to_string());
        }
    }
    for caps in hashtag_re.captures_iter(content) {
        tags.insert(caps[1].to_string());
    }

    tags.into_iter().collect()
}

struct DocxParagraph {
    text: String,
    is_heading: bool,
}

fn read_document_xml(bytes: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ParseError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ParseError::Docx("word/document.xml not found".to_string()))?;

    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ParseError::Docx(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ParseError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    Ok(out)
}

fn docx_paragraphs(xml: &[u8]) -> Result<Vec<DocxParagraph>, ParseError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current: Option<DocxParagraph> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    current = Some(DocxParagraph {
                        text: String::new(),
                        is_heading: false,
                    })
                }
                b"t" => in_text = true,
                b"pStyle" => mark_heading(&e, current.as_mut()),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" => mark_heading(&e, current.as_mut()),
                b"tab" => {
                    if let Some(p) = current.as_mut() {
                        p.text.push('\t');
                    }
                }
                b"br" => {
                    if let Some(p) = current.as_mut() {
                        p.text.push(' ');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(p) = current.as_mut() {
                    let text = te.unescape().map_err(|e| ParseError::Docx(e.to_string()))?;
                    p.text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

fn mark_heading(e: &quick_xml::events::BytesStart<'_>, paragraph: Option<&mut DocxParagraph>) {
    let Some(paragraph) = paragraph else {
        return;
    };
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"val" {
            if let Ok(value) = attr.unescape_value() {
                if value.contains("Heading") {
                    paragraph.is_heading = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_markdown_sections_and_overview() {
        let md = "Intro paragraph before headings.\n\n# Goals\nShip it.\n\n## Empty\n\n## Security Requirements\nAll data must be encrypted. #security\n";
        let prd = parse_markdown(md, "Demo", None);
        let titles: Vec<_> = prd.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Overview", "Goals", "Security Requirements"]);
        assert_eq!(prd.sections[0].content, "Intro paragraph before headings.");
        let security = &prd.sections[2];
        assert_eq!(security.tags, vec!["requirements".to_string(), "security".to_string()]);
        assert_eq!(prd.description.as_deref(), Some("Intro paragraph before headings."));
    }

    #[test]
    fn test_markdown_without_headings_is_single_section() {
        let prd = parse_markdown("   \n", "Empty", None);
        assert!(prd.sections.is_empty());
        assert!(prd.description.is_none());

        // Only a heading with no body: nothing survives, so the whole text is used.
        let prd = parse_markdown("# Title only\n", "Doc", None);
        assert_eq!(prd.sections.len(), 1);
        assert_eq!(prd.sections[0].title, "Document Content");
        assert_eq!(prd.sections[0].content, "# Title only");
    }

    #[test]
    fn test_heading_requires_space() {
        let prd = parse_markdown("#hashtag line\n# Real\nbody", "Doc", None);
        assert_eq!(prd.sections[0].title, "Overview");
        assert_eq!(prd.sections[0].content, "#hashtag line");
        assert_eq!(prd.sections[1].title, "Real");
    }

    #[test]
    fn test_description_truncated() {
        let body = "x".repeat(250);
        let prd = parse_markdown(&format!("# A\n{}", body), "Doc", None);
        let desc = prd.description.unwrap();
        assert_eq!(desc.len(), 203);
        assert!(desc.ends_with("..."));

        let prd = parse_markdown("# A\nbody", "Doc", Some("given".into()));
        assert_eq!(prd.description.as_deref(), Some("given"));
    }

    #[test]
    fn test_priority_keywords() {
        assert_eq!(section_priority("Auth", "This is a mandatory flow"), Priority::Critical);
        assert_eq!(section_priority("Core Flow", "text"), Priority::High);
        assert_eq!(section_priority("Later", "optional extras"), Priority::Low);
        assert_eq!(section_priority("Later", "plain text"), Priority::Medium);
        // Critical is checked first even when low keywords appear too.
        assert_eq!(section_priority("Optional", "essential"), Priority::Critical);
    }

    #[test]
    fn test_tags_from_title_patterns() {
        let tags = extract_tags("Users and Stakeholders / Timeline", "no hashtags");
        assert_eq!(tags, vec!["stakeholders".to_string(), "timeline".to_string()]);
    }

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(document_xml.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_docx_headings_start_sections() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>Preamble text</w:t></w:r></w:p>
<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Login Feature</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Users log in </w:t></w:r><w:r><w:t>with SSO &amp; MFA.</w:t></w:r></w:p>
<w:p><w:r><w:t>Second line.</w:t></w:r></w:p>
</w:body></w:document>"#;
        let prd = parse_docx(&docx_bytes(xml), "Word PRD", None).unwrap();
        assert_eq!(prd.name, "Word PRD");
        assert_eq!(prd.sections.len(), 2);
        assert_eq!(prd.sections[0].title, "Overview");
        assert_eq!(prd.sections[1].title, "Login Feature");
        assert_eq!(prd.sections[1].content, "Users log in with SSO & MFA.\nSecond line.");
    }

    #[test]
    fn test_invalid_docx_is_error() {
        let err = parse_docx(b"not a zip", "x", None).unwrap_err();
        assert!(matches!(err, ParseError::Docx(_)));
    }

    #[test]
    fn test_parse_document_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("checkout-flow.md");
        std::fs::write(&md, "# Payments\nCard payments are core.").unwrap();
        let prd = parse_document(&md, None, None).unwrap();
        assert_eq!(prd.name, "checkout-flow");
        assert_eq!(prd.sections[0].priority, Priority::High);

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "hello").unwrap();
        assert!(matches!(
            parse_document(&txt, None, None),
            Err(ParseError::UnsupportedType(ext)) if ext == ".txt"
        ));

        assert!(matches!(
            parse_document(&dir.path().join("missing.md"), None, None),
            Err(ParseError::NotFound(_))
        ));
    }
}
