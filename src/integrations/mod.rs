//! External collaborators: spreadsheets, mail and document output.

pub mod documents;
pub mod mail;
pub mod sheets;

pub use documents::{
    clean_markdown, rich_text_blocks, Block, Document, DocumentRenderer, MarkdownRenderer, Section,
};
pub use mail::{Attachment, GmailMailer, Mailer, OutgoingEmail, Outbox};
pub use sheets::{GoogleSheetsClient, InMemorySheets, Record, SheetClient};
