//! Document output
//!
//! Payslips, invoices and reports are built as a small block tree and
//! rendered to Markdown files under the output directory.

use crate::error::OrchestrationError;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum RichLine {
    Heading(String),
    Item(String),
    Text(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum Block {
    Paragraph(String),
    Fields(Vec<(String, String)>),
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    RichText(Vec<RichLine>),
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub heading: String,
    pub blocks: Vec<Block>,
}

impl Section {
    pub fn new(heading: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            blocks: Vec::new(),
        }
    }

    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub title: String,
    pub subtitle: Option<String>,
    pub sections: Vec<Section>,
    pub footer: Option<String>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            sections: Vec::new(),
            footer: None,
        }
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        if let Some(subtitle) = &self.subtitle {
            out.push_str(&format!("_{}_\n\n", subtitle));
        }

        for section in &self.sections {
            out.push_str(&format!("## {}\n\n", section.heading));
            for block in &section.blocks {
                render_block(block, &mut out);
            }
        }

        if let Some(footer) = &self.footer {
            out.push_str(&format!("---\n\n_{}_\n", footer));
        }
        out
    }
}

fn render_block(block: &Block, out: &mut String) {
    match block {
        Block::Paragraph(text) => {
            out.push_str(text.trim());
            out.push_str("\n\n");
        }
        Block::Fields(fields) => {
            for (key, value) in fields {
                out.push_str(&format!("- **{}:** {}\n", key, value));
            }
            out.push('\n');
        }
        Block::Table { headers, rows } => {
            out.push_str(&format!("| {} |\n", headers.join(" | ")));
            out.push_str(&format!(
                "|{}\n",
                headers.iter().map(|_| "---|").collect::<String>()
            ));
            for row in rows {
                let cells: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
                out.push_str(&format!("| {} |\n", cells.join(" | ")));
            }
            out.push('\n');
        }
        Block::RichText(lines) => {
            for line in lines {
                match line {
                    RichLine::Heading(h) => out.push_str(&format!("\n### {}\n\n", h)),
                    RichLine::Item(i) => out.push_str(&format!("- {}\n", i)),
                    RichLine::Text(t) => out.push_str(&format!("{}\n", t)),
                }
            }
            out.push('\n');
        }
    }
}

#[async_trait::async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render `document` to `relative_path` and return the written path.
    async fn render(&self, document: &Document, relative_path: &str) -> Result<PathBuf>;

    /// Location `relative_path` would be written to.
    fn resolve(&self, relative_path: &str) -> PathBuf;
}

pub struct MarkdownRenderer {
    root: PathBuf,
}

impl MarkdownRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl DocumentRenderer for MarkdownRenderer {
    async fn render(&self, document: &Document, relative_path: &str) -> Result<PathBuf> {
        let escapes = Path::new(relative_path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(OrchestrationError::DocumentError(format!(
                "refusing to write outside the output directory: {}",
                relative_path
            )));
        }

        let path = self.resolve(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, document.to_markdown()).await?;

        debug!(path = %path.display(), "Document written");
        Ok(path)
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }
}

lazy_static! {
    static ref NUMBER_THEN_NEWLINE: Regex = Regex::new(r"(?m)^(\d+\.)[ \t]*\n\s*").unwrap();
    static ref HEADING_LINE: Regex = Regex::new(r"^(?:\d+\.\s*)?\*\*(.+?)\*\*:?$").unwrap();
    static ref NUMBERED_HEADING: Regex = Regex::new(r"^\*\*(\d+\..+?)\*\*:?$").unwrap();
    static ref BULLET: Regex = Regex::new(r"^(?:[-•*]|[a-z]\.|\d+\.\d+)\s+").unwrap();
    static ref BOLD_SPAN: Regex = Regex::new(r"\*\*(.*?)\*\*").unwrap();
}

/// Normalise free-form LLM prose into headings, list items and text lines.
pub fn rich_text_blocks(text: &str) -> Block {
    let joined = NUMBER_THEN_NEWLINE.replace_all(text, "$1 ");
    let mut lines = Vec::new();

    for raw in joined.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = NUMBERED_HEADING.captures(line) {
            lines.push(RichLine::Heading(caps[1].trim().to_string()));
        } else if let Some(caps) = HEADING_LINE.captures(line) {
            lines.push(RichLine::Heading(caps[1].trim().to_string()));
        } else if let Some(m) = BULLET.find(line) {
            lines.push(RichLine::Item(line[m.end()..].trim().to_string()));
        } else {
            lines.push(RichLine::Text(line.to_string()));
        }
    }

    Block::RichText(lines)
}

/// Plain-text cleanup for mail bodies: bold markers are dropped and
/// literal `\n` sequences become line breaks.
pub fn clean_markdown(text: &str) -> String {
    let plain = BOLD_SPAN.replace_all(text, "$1");
    plain.replace("\\n", "\n").trim().to_string()
}
