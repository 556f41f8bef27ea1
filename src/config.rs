//! Runtime settings loaded from the environment
//!
//! Binaries call `dotenv::dotenv().ok()` before `Settings::from_env()`.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_GROQ_MODEL: &str = "llama3-70b-8192";
pub const DEFAULT_FISCAL_YEARS: &str = "2023 (PKR),2024 (PKR),2025 (PKR)";
pub const DEFAULT_SHEETS_API_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    Groq,
    None,
}

impl FromStr for LlmProvider {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(LlmProvider::Gemini),
            "groq" => Ok(LlmProvider::Groq),
            "none" | "" => Ok(LlmProvider::None),
            other => Err(OrchestrationError::ConfigError(format!(
                "LLM_PROVIDER must be gemini, groq or none (got `{}`)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Deterministic,
    Llm,
}

impl FromStr for SelectorKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "deterministic" | "" => Ok(SelectorKind::Deterministic),
            "llm" => Ok(SelectorKind::Llm),
            other => Err(OrchestrationError::ConfigError(format!(
                "STEP_SELECTOR must be deterministic or llm (got `{}`)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_provider: LlmProvider,
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub groq_model: String,

    pub spreadsheet_id: Option<String>,
    pub sheets_api_base_url: String,
    pub sheets_access_token: Option<String>,

    pub gmail_api_base_url: String,
    pub gmail_access_token: Option<String>,
    pub sender_email: String,
    pub approver_email: String,
    pub payment_link_base: String,

    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub fiscal_years: Vec<String>,

    pub max_iterations: u32,
    pub max_resume_attempts: u32,
    pub step_selector: SelectorKind,

    pub database_url: Option<String>,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::None,
            gemini_api_key: None,
            groq_api_key: None,
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            spreadsheet_id: None,
            sheets_api_base_url: DEFAULT_SHEETS_API_BASE_URL.to_string(),
            sheets_access_token: None,
            gmail_api_base_url: DEFAULT_GMAIL_API_BASE_URL.to_string(),
            gmail_access_token: None,
            sender_email: "finance@example.com".to_string(),
            approver_email: "approvals@example.com".to_string(),
            payment_link_base: "https://pay.example.com/invoices".to_string(),
            output_dir: PathBuf::from("output"),
            batch_size: 5,
            fiscal_years: split_list(DEFAULT_FISCAL_YEARS),
            max_iterations: 30,
            max_resume_attempts: 1,
            step_selector: SelectorKind::Deterministic,
            database_url: None,
            port: 3000,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let settings = Self {
            llm_provider: optional("LLM_PROVIDER")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(defaults.llm_provider),
            gemini_api_key: optional("GEMINI_API_KEY"),
            groq_api_key: optional("GROQ_API_KEY"),
            groq_model: optional("GROQ_MODEL").unwrap_or(defaults.groq_model),

            spreadsheet_id: optional("SPREADSHEET_ID"),
            sheets_api_base_url: optional("SHEETS_API_BASE_URL")
                .unwrap_or(defaults.sheets_api_base_url),
            sheets_access_token: optional("SHEETS_ACCESS_TOKEN"),

            gmail_api_base_url: optional("GMAIL_API_BASE_URL")
                .unwrap_or(defaults.gmail_api_base_url),
            gmail_access_token: optional("GMAIL_ACCESS_TOKEN"),
            sender_email: optional("SENDER_EMAIL").unwrap_or(defaults.sender_email),
            approver_email: optional("APPROVER_EMAIL").unwrap_or(defaults.approver_email),
            payment_link_base: optional("PAYMENT_LINK_BASE")
                .unwrap_or(defaults.payment_link_base),

            output_dir: optional("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            batch_size: parse_or("BATCH_SIZE", defaults.batch_size)?,
            fiscal_years: optional("FISCAL_YEARS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.fiscal_years),

            max_iterations: parse_or("MAX_ITERATIONS", defaults.max_iterations)?,
            max_resume_attempts: parse_or("MAX_RESUME_ATTEMPTS", defaults.max_resume_attempts)?,
            step_selector: optional("STEP_SELECTOR")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(defaults.step_selector),

            database_url: optional("DATABASE_URL").or_else(|| optional("POSTGRES_URL")),
            port: match optional("PORT") {
                Some(_) => parse_or("PORT", defaults.port)?,
                None => parse_or("API_PORT", defaults.port)?,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(OrchestrationError::ConfigError(
                "BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(OrchestrationError::ConfigError(
                "MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }
        if self.fiscal_years.is_empty() {
            return Err(OrchestrationError::ConfigError(
                "FISCAL_YEARS must name at least one year column".to_string(),
            ));
        }
        Ok(())
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match optional(key) {
        Some(raw) => raw.parse().map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has invalid value `{}`", key, raw))
        }),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
