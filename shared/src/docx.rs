//! Conversion of editor markup into Word documents.
//!
//! Accepts the small HTML subset the petition editor produces (`h1`-`h3`,
//! `p`, `div`, `br`, `b`/`strong`, `i`/`em`, `u`, `ul`/`ol`/`li`). Input
//! without tags is read as plain text with light Markdown: `#` headings,
//! `-`/`*` bullets and `**bold**` spans.

use docx_rs::{AlignmentType, Docx, Paragraph, Run, RunFonts};
use std::io::Cursor;

use crate::{Error, Result};

const BODY_FONT: &str = "Times New Roman";
/// Sizes are in half-points.
const BODY_SIZE: usize = 24;
const TITLE_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading(u8),
    Paragraph,
    ListItem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub spans: Vec<Span>,
}

impl Block {
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

#[derive(Default)]
struct Style {
    bold: usize,
    italic: usize,
    underline: usize,
}

struct BlockBuilder {
    blocks: Vec<Block>,
    kind: BlockKind,
    spans: Vec<Span>,
    style: Style,
    /// Counters for open `ol` lists; `None` for `ul`
    lists: Vec<Option<usize>>,
}

impl BlockBuilder {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            kind: BlockKind::Paragraph,
            spans: Vec::new(),
            style: Style::default(),
            lists: Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let bold = self.style.bold > 0;
        let italic = self.style.italic > 0;
        let underline = self.style.underline > 0;

        if let Some(last) = self.spans.last_mut() {
            if last.bold == bold && last.italic == italic && last.underline == underline {
                last.text.push_str(text);
                return;
            }
        }
        self.spans.push(Span {
            text: text.to_string(),
            bold,
            italic,
            underline,
        });
    }

    fn flush(&mut self) {
        if let Some(first) = self.spans.first_mut() {
            let trimmed = first.text.trim_start().to_string();
            first.text = trimmed;
        }
        if let Some(last) = self.spans.last_mut() {
            let trimmed = last.text.trim_end().to_string();
            last.text = trimmed;
        }
        self.spans.retain(|s| !s.text.is_empty());

        if !self.spans.is_empty() {
            self.blocks.push(Block {
                kind: self.kind,
                spans: std::mem::take(&mut self.spans),
            });
        }
    }

    fn start(&mut self, kind: BlockKind) {
        self.flush();
        self.kind = kind;
    }

    fn start_list_item(&mut self) {
        self.start(BlockKind::ListItem);
        let marker = match self.lists.last_mut() {
            Some(Some(counter)) => {
                *counter += 1;
                format!("{}. ", counter)
            }
            _ => "• ".to_string(),
        };
        self.spans.push(Span {
            text: marker,
            ..Span::default()
        });
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

/// Decode the HTML entities the editor emits.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|i| *i <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };

        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() && c != '\u{a0}' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn parse_html(markup: &str) -> Vec<Block> {
    let mut builder = BlockBuilder::new();
    let mut rest = markup;

    while !rest.is_empty() {
        let Some(open) = rest.find('<') else {
            builder.push_text(&decode_entities(&collapse_whitespace(rest)));
            break;
        };
        if open > 0 {
            builder.push_text(&decode_entities(&collapse_whitespace(&rest[..open])));
        }

        let tail = &rest[open..];
        let Some(close) = tail.find('>') else {
            builder.push_text(&decode_entities(&collapse_whitespace(tail)));
            break;
        };

        let inner = tail[1..close].trim();
        rest = &tail[close + 1..];

        let closing = inner.starts_with('/');
        let name: String = inner
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match (name.as_str(), closing) {
            ("h1", false) => builder.start(BlockKind::Heading(1)),
            ("h2", false) => builder.start(BlockKind::Heading(2)),
            ("h3" | "h4" | "h5" | "h6", false) => builder.start(BlockKind::Heading(3)),
            ("p" | "div", false) => builder.start(BlockKind::Paragraph),
            ("h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "div" | "li", true) => {
                builder.start(BlockKind::Paragraph)
            }
            ("br", _) => {
                let kind = if builder.kind == BlockKind::ListItem {
                    BlockKind::Paragraph
                } else {
                    builder.kind
                };
                builder.start(kind);
            }
            ("li", false) => builder.start_list_item(),
            ("ul", false) => builder.lists.push(None),
            ("ol", false) => builder.lists.push(Some(0)),
            ("ul" | "ol", true) => {
                builder.lists.pop();
                builder.start(BlockKind::Paragraph);
            }
            ("b" | "strong", false) => builder.style.bold += 1,
            ("b" | "strong", true) => builder.style.bold = builder.style.bold.saturating_sub(1),
            ("i" | "em", false) => builder.style.italic += 1,
            ("i" | "em", true) => builder.style.italic = builder.style.italic.saturating_sub(1),
            ("u", false) => builder.style.underline += 1,
            ("u", true) => builder.style.underline = builder.style.underline.saturating_sub(1),
            _ => {}
        }
    }

    builder.finish()
}

fn push_markdown_spans(builder: &mut BlockBuilder, line: &str) {
    for (i, part) in line.split("**").enumerate() {
        builder.style.bold = i % 2;
        builder.push_text(part);
    }
    builder.style.bold = 0;
}

fn parse_plain(text: &str) -> Vec<Block> {
    let mut builder = BlockBuilder::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            builder.flush();
            continue;
        }

        let (kind, body) = if let Some(body) = line.strip_prefix("### ") {
            (BlockKind::Heading(3), body)
        } else if let Some(body) = line.strip_prefix("## ") {
            (BlockKind::Heading(2), body)
        } else if let Some(body) = line.strip_prefix("# ") {
            (BlockKind::Heading(1), body)
        } else if let Some(body) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            (BlockKind::ListItem, body)
        } else {
            (BlockKind::Paragraph, line)
        };

        builder.start(kind);
        if kind == BlockKind::ListItem {
            builder.push_text("• ");
        }
        push_markdown_spans(&mut builder, body);
        builder.flush();
    }

    builder.finish()
}

/// Split markup into styled blocks.
pub fn parse_markup(markup: &str) -> Vec<Block> {
    let looks_like_html = markup.contains('<') && markup.contains('>');
    if looks_like_html {
        parse_html(markup)
    } else {
        parse_plain(markup)
    }
}

fn to_run(span: &Span, size: usize, force_bold: bool) -> Run {
    let mut run = Run::new()
        .add_text(span.text.as_str())
        .fonts(RunFonts::new().ascii(BODY_FONT).hi_ansi(BODY_FONT).cs(BODY_FONT))
        .size(size);
    if span.bold || force_bold {
        run = run.bold();
    }
    if span.italic {
        run = run.italic();
    }
    if span.underline {
        run = run.underline("single");
    }
    run
}

/// Render markup as a `.docx` file.
pub fn render_docx(title: Option<&str>, markup: &str) -> Result<Vec<u8>> {
    let blocks = parse_markup(markup);
    if blocks.is_empty() && title.map_or(true, |t| t.trim().is_empty()) {
        return Err(Error::Validation("Document has no content".to_string()));
    }

    let mut docx = Docx::new();

    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        let span = Span {
            text: title.to_string(),
            bold: true,
            ..Span::default()
        };
        docx = docx.add_paragraph(
            Paragraph::new()
                .add_run(to_run(&span, TITLE_SIZE, true))
                .align(AlignmentType::Center),
        );
    }

    for block in &blocks {
        let (size, bold, align) = match block.kind {
            BlockKind::Heading(1) => (TITLE_SIZE, true, AlignmentType::Center),
            BlockKind::Heading(2) => (28, true, AlignmentType::Left),
            BlockKind::Heading(_) => (26, true, AlignmentType::Left),
            BlockKind::Paragraph | BlockKind::ListItem => (BODY_SIZE, false, AlignmentType::Both),
        };

        let mut paragraph = Paragraph::new().align(align);
        for span in &block.spans {
            paragraph = paragraph.add_run(to_run(span, size, bold));
        }
        docx = docx.add_paragraph(paragraph);
    }

    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|e| Error::Document(format!("Failed to write docx: {}", e)))?;

    Ok(buffer.into_inner())
}

/// File name safe for the download, always ending in `.docx`.
pub fn sanitize_file_name(name: Option<&str>) -> String {
    let cleaned: String = name
        .unwrap_or_default()
        .trim()
        .trim_end_matches(".docx")
        .chars()
        .map(|c| if c.is_control() || "\\/:*?\"<>|".contains(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        "dilekce.docx".to_string()
    } else {
        format!("{}.docx", cleaned)
    }
}

/// `Content-Disposition` header with an ASCII fallback and RFC 5987 name.
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| if c.is_ascii() && c != '"' { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(file_name)
    )
}
