pub mod ai_helper;
pub mod analyzer;
pub mod generate;
pub mod profile;
pub mod session;
pub mod source;
pub mod store;
pub mod synth;

use std::collections::BTreeMap;

/// Every deck known to the store, keyed by its user-chosen name.
pub type Decks = BTreeMap<String, Deck>;
pub type Deck = Vec<QuizItem>;

/// One generated question, stored the same way it is written to `decks.json`:
/// options carry their `"A. "` label prefix.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub options: Vec<String>,
    pub answer: char,
    pub explanation: String,
}

impl QuizItem {
    /// Labels `options` sequentially from 'A'. `correct` is the index of the right option.
    pub fn new(question: String, options: Vec<String>, correct: usize, explanation: String) -> Self {
        let options = options
            .into_iter()
            .enumerate()
            .map(|(i, text)| format!("{}. {}", label(i), text))
            .collect();
        Self {
            question,
            options,
            answer: label(correct),
            explanation,
        }
    }

    pub fn answer_index(&self) -> Option<usize> {
        label_index(self.answer).filter(|i| *i < self.options.len())
    }

    pub fn option_text(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(|o| strip_label(o))
    }

    pub fn option_texts(&self) -> Vec<&str> {
        self.options.iter().map(|o| strip_label(o)).collect()
    }

    pub fn correct_text(&self) -> Option<&str> {
        self.answer_index().and_then(|i| self.option_text(i))
    }
}

pub fn label(index: usize) -> char {
    (b'A' + index as u8) as char
}

pub fn label_index(label: char) -> Option<usize> {
    let upper = label.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Some((upper as u8 - b'A') as usize)
    } else {
        None
    }
}

/// `"B. It transports oxygen"` -> `"It transports oxygen"`
pub fn strip_label(option: &str) -> &str {
    let mut chars = option.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(l), Some('.'), Some(' ')) if l.is_ascii_uppercase() => &option[3..],
        _ => option,
    }
}

/// First 30 characters of a sentence, used inside question and explanation templates.
pub fn sentence_prefix(sentence: &str) -> String {
    sentence.chars().take(30).collect()
}
