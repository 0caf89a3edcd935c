use crate::quiz::QuizItem;
use chatgpt::prelude::*;
use chatgpt::types::CompletionResponse;
use log::debug;

/// Elaborates on wrong answers with ChatGPT.
pub struct QuizHelper {
    tone: Tone,
    chat_gpt: ChatGPT,
}

impl QuizHelper {
    pub fn new(chat_gpt: ChatGPT, tone: Tone) -> Self {
        Self { tone, chat_gpt }
    }

    pub async fn generate_reply_to_wrong_answer(
        &self,
        item: &QuizItem,
        given: &str,
    ) -> Result<String> {
        debug!("Generating reply to wrong answer for question: {:?}", item.question);
        let correct_answer = item.correct_text().ok_or(chatgpt::err::Error::BackendError {
            message: "No correct answer found".to_string(),
            error_type: "QuizError".to_string(),
        })?;

        let prompt = format!(
            "You are a study assistant helping a student review material from their course notes.
        The student answered this quiz question:
        {}
        Options:
        {}
        The student answered \"{}\", but the correct answer is \"{}\".
        The generated explanation was: \"{}\".
        Explain in one short paragraph why the correct answer fits better. Write it {}.",
            item.question,
            item.options.join("\n        "),
            given,
            correct_answer,
            item.explanation,
            self.tone.describe()
        );

        let response: CompletionResponse = self.chat_gpt.send_message(&prompt).await?;
        let content = response.message().clone().content;

        debug!("Completion: {:?}", content);

        Ok(content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Encouraging,
    Socratic,
    Concise,
}

impl Tone {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "encouraging" => Some(Tone::Encouraging),
            "socratic" => Some(Tone::Socratic),
            "concise" => Some(Tone::Concise),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Tone::Encouraging => "in a warm, encouraging voice",
            Tone::Socratic => "as a Socratic tutor, ending with a question that leads the student on",
            Tone::Concise => "as concisely as possible, at most two sentences",
        }
    }
}
