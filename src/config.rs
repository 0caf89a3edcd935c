use std::path::PathBuf;
use std::str::FromStr;

use log::warn;

use crate::quiz::ai_helper::Tone;
use crate::quiz::generate::{DEFAULT_MCQ_COUNT, DEFAULT_TRUE_FALSE_COUNT};
use crate::quiz::source::OcrOptions;

const DEFAULT_ANALYZER_ARGS: &str = "--tokenize --tag --parse english.udpipe";

/// Settings read from the environment (and `.env`). `TELOXIDE_TOKEN` is read by teloxide itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub decks_path: PathBuf,
    pub dialogue_db: String,
    pub analyzer_command: String,
    pub analyzer_args: Vec<String>,
    pub ocr: Option<OcrOptions>,
    pub mcq_count: usize,
    pub true_false_count: usize,
    /// Fixed seed so every generation run gives the same deck
    pub quiz_seed: Option<u64>,
    pub chatgpt_api_key: Option<String>,
    pub tutor_tone: Tone,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ocr_enabled = get("OCR_ENABLED")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);
        let ocr = ocr_enabled.then(|| {
            let defaults = OcrOptions::default();
            OcrOptions {
                lang: get("OCR_LANG").unwrap_or(defaults.lang),
                dpi: parse_or("OCR_DPI", get("OCR_DPI"), defaults.dpi),
                pages: parse_or("OCR_PAGES", get("OCR_PAGES"), defaults.pages),
            }
        });

        let tutor_tone = match get("TUTOR_TONE") {
            Some(name) => Tone::from_name(&name).unwrap_or_else(|| {
                warn!("Unknown TUTOR_TONE '{}', using encouraging", name);
                Tone::Encouraging
            }),
            None => Tone::Encouraging,
        };

        Self {
            decks_path: get("DECKS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("decks.json")),
            dialogue_db: get("DIALOGUE_DB").unwrap_or_else(|| "db.sqlite".to_string()),
            analyzer_command: get("ANALYZER_COMMAND").unwrap_or_else(|| "udpipe".to_string()),
            analyzer_args: get("ANALYZER_ARGS")
                .unwrap_or_else(|| DEFAULT_ANALYZER_ARGS.to_string())
                .split_whitespace()
                .map(|a| a.to_string())
                .collect(),
            ocr,
            mcq_count: parse_or("MCQ_COUNT", get("MCQ_COUNT"), DEFAULT_MCQ_COUNT),
            true_false_count: parse_or(
                "TRUE_FALSE_COUNT",
                get("TRUE_FALSE_COUNT"),
                DEFAULT_TRUE_FALSE_COUNT,
            ),
            quiz_seed: get("QUIZ_SEED").and_then(|raw| match raw.trim().parse() {
                Ok(seed) => Some(seed),
                Err(_) => {
                    warn!("Invalid QUIZ_SEED '{}', drawing a fresh seed per run", raw);
                    None
                }
            }),
            chatgpt_api_key: get("CHATGPT_API_KEY"),
            tutor_tone,
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {} '{}', using {}", key, raw, default);
            default
        }),
        None => default,
    }
}
