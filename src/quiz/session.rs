use thiserror::Error;

use super::{label_index, QuizItem};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("The quiz is already finished")]
    Finished,

    #[error("'{0}' is not one of the options")]
    InvalidChoice(String),

    #[error("This action is not available in {0:?} mode")]
    WrongMode(Mode),

    #[error("The deck has no questions")]
    EmptyDeck,
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Mode {
    Answer,
    Flashcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_text: String,
    pub explanation: String,
    pub finished: bool,
}

/// Walks one deck either answering questions or flipping through flashcards.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    pub deck_name: String,
    pub items: Vec<QuizItem>,
    pub mode: Mode,
    cursor: usize,
    score: usize,
    show_answer: bool,
    finished: bool,
}

impl QuizSession {
    pub fn new(deck_name: String, items: Vec<QuizItem>, mode: Mode) -> Result<Self> {
        if items.is_empty() {
            return Err(SessionError::EmptyDeck);
        }
        Ok(Self {
            deck_name,
            items,
            mode,
            cursor: 0,
            score: 0,
            show_answer: false,
            finished: false,
        })
    }

    pub fn current(&self) -> &QuizItem {
        &self.items[self.cursor]
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_flipped(&self) -> bool {
        self.show_answer
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 == self.items.len()
    }

    /// Accepts a label ("B") or the text of an option. Moves on to the next question.
    pub fn submit(&mut self, choice: &str) -> Result<AnswerOutcome> {
        if self.mode != Mode::Answer {
            return Err(SessionError::WrongMode(self.mode));
        }
        if self.finished {
            return Err(SessionError::Finished);
        }

        let item = self.current();
        let chosen = resolve_choice(item, choice)
            .ok_or_else(|| SessionError::InvalidChoice(choice.to_string()))?;
        let correct = item.answer_index() == Some(chosen);
        let outcome = AnswerOutcome {
            correct,
            correct_text: item.correct_text().unwrap_or_default().to_string(),
            explanation: item.explanation.clone(),
            finished: self.is_last(),
        };

        if correct {
            self.score += 1;
        }
        if self.is_last() {
            self.finished = true;
        } else {
            self.cursor += 1;
        }
        Ok(outcome)
    }

    /// Returns false when already at the last card.
    pub fn next(&mut self) -> bool {
        self.show_answer = false;
        if self.is_last() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Returns false when already at the first card.
    pub fn previous(&mut self) -> bool {
        self.show_answer = false;
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn flip(&mut self) -> Result<bool> {
        if self.mode != Mode::Flashcard {
            return Err(SessionError::WrongMode(self.mode));
        }
        self.show_answer = !self.show_answer;
        Ok(self.show_answer)
    }

    pub fn restart(&mut self) {
        self.cursor = 0;
        self.score = 0;
        self.show_answer = false;
        self.finished = false;
    }
}

fn resolve_choice(item: &QuizItem, choice: &str) -> Option<usize> {
    let choice = choice.trim();
    let texts = item.option_texts();
    if let Some(index) = texts.iter().position(|t| t.eq_ignore_ascii_case(choice)) {
        return Some(index);
    }
    if let Some(index) = item.options.iter().position(|o| o.eq_ignore_ascii_case(choice)) {
        return Some(index);
    }
    let mut chars = choice.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => label_index(letter).filter(|i| *i < item.options.len()),
        _ => None,
    }
}
