mod config;
mod quiz;

use std::sync::Arc;

use chatgpt::{client::ChatGPT, config::ChatGPTEngine};
use dotenv::dotenv;
use log::{debug, error, info, warn};
use quiz::{
    ai_helper::QuizHelper,
    analyzer::CommandAnalyzer,
    generate::{generate, GenerationRequest},
    profile::ProfilePool,
    session::{Mode, QuizSession, SessionError},
    source::{Extraction, PdfTextSource},
    store::DeckStore,
    Decks,
};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    net::Download,
    prelude::*,
    types::{ChatAction, Document, KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode},
    utils::html,
};
use tokio::sync::Mutex;

use crate::config::Config;

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type DialogueStorage = std::sync::Arc<ErasedStorage<State>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveDeckName,
    ReceiveDocuments {
        deck_name: String,
        text: String,
        documents: usize,
    },
    ReceiveModeChoice {
        deck_name: String,
    },
    AnswerMode {
        session: QuizSession,
    },
    FlashcardMode {
        session: QuizSession,
    },
}

/// Everything the handlers share.
struct App {
    config: Config,
    decks: Mutex<Decks>,
    store: DeckStore,
    source: PdfTextSource,
    analyzer: CommandAnalyzer,
    pool: ProfilePool,
    tutor: Option<QuizHelper>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting quiz deck bot...");

    let config = Config::from_env();
    let bot = Bot::from_env();

    info!("Opening dialogue storage at {}", config.dialogue_db);
    let storage: DialogueStorage = SqliteStorage::open(&config.dialogue_db, Json)
        .await
        .expect("Failed to open the dialogue storage")
        .erase();

    let store = DeckStore::new(config.decks_path.clone());
    let decks = store.load().expect("Failed to load decks");
    info!("Loaded {} decks from {:?}", decks.len(), store.path());

    let analyzer = CommandAnalyzer::new(config.analyzer_command.clone(), config.analyzer_args.clone());
    if let Err(e) = analyzer.check() {
        error!("{}. Question generation will fail until it is installed", e);
    }

    let tutor = config.chatgpt_api_key.as_ref().and_then(|key| {
        let mut gpt = match ChatGPT::new(key) {
            Ok(gpt) => gpt,
            Err(e) => {
                warn!("Unable to set up ChatGPT, continuing without the tutor: {}", e);
                return None;
            }
        };
        gpt.config.engine = ChatGPTEngine::Gpt35Turbo;
        gpt.config.timeout = std::time::Duration::from_secs(15);
        Some(QuizHelper::new(gpt, config.tutor_tone))
    });

    let app = Arc::new(App {
        source: PdfTextSource::new(config.ocr.clone()),
        config,
        decks: Mutex::new(decks),
        store,
        analyzer,
        pool: ProfilePool::default(),
        tutor,
    });

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::filter(|msg: Message| msg.text() == Some("/start")).endpoint(start))
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveDeckName].endpoint(receive_deck_name))
            .branch(
                dptree::case![State::ReceiveDocuments {
                    deck_name,
                    text,
                    documents
                }]
                .endpoint(receive_documents),
            )
            .branch(dptree::case![State::ReceiveModeChoice { deck_name }].endpoint(receive_mode_choice))
            .branch(dptree::case![State::AnswerMode { session }].endpoint(answer_mode))
            .branch(dptree::case![State::FlashcardMode { session }].endpoint(flashcard_mode)),
    )
    .dependencies(dptree::deps![storage, app])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

const GREETING_TEXT: &str = "Hi! I turn your course PDFs into quiz decks. \
Send me a name for a new deck, or pick one of your existing decks.";

const GENERATE: &str = "Generate questions";
const STUDY: &str = "Study this deck";
const ANSWER_MODE: &str = "Answer mode";
const FLASHCARD_MODE: &str = "Flashcard mode";
const FLIP: &str = "Flip card";
const PREVIOUS: &str = "Previous";
const NEXT: &str = "Next";
const RESTART: &str = "Restart";
const MENU: &str = "Back to decks";

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message, app: Arc<App>) -> HandlerResult {
    let names = app.decks.lock().await.keys().cloned().collect::<Vec<_>>();
    if names.is_empty() {
        bot.send_message(msg.chat.id, GREETING_TEXT)
            .reply_markup(KeyboardRemove::new())
            .await?;
    } else {
        let keyboard = KeyboardMarkup::new(
            names
                .into_iter()
                .map(|name| vec![KeyboardButton::new(name)])
                .collect::<Vec<_>>(),
        );
        bot.send_message(msg.chat.id, GREETING_TEXT)
            .reply_markup(keyboard)
            .await?;
    }

    dialogue.update(State::ReceiveDeckName).await?;
    Ok(())
}

async fn receive_deck_name(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    let Some(deck_name) = msg.text().map(str::trim).filter(|name| !name.is_empty()) else {
        bot.send_message(msg.chat.id, "Please send the deck name as text")
            .await?;
        return Ok(());
    };

    let existing = {
        let mut decks = app.decks.lock().await;
        match decks.get(deck_name).map(|deck| deck.len()) {
            Some(count) => Ok(Some(count)),
            None => tokio::task::block_in_place(|| {
                app.store.update(&mut decks, |decks| {
                    decks.insert(deck_name.to_string(), Vec::new());
                })
            })
            .map(|()| None),
        }
    };
    let existing = match existing {
        Ok(existing) => existing,
        Err(e) => {
            error!("Saving new deck '{}' failed: {}", deck_name, e);
            bot.send_message(msg.chat.id, format!("I could not create that deck: {}", e))
                .await?;
            return Ok(());
        }
    };
    let reply = match existing {
        Some(count) => format!(
            "Deck \"{}\" has {} questions. Send more PDFs to add to it, or start studying.",
            deck_name, count
        ),
        None => format!(
            "Created new deck \"{}\". Send me one or more PDFs, then press \"{}\".",
            deck_name, GENERATE
        ),
    };
    bot.send_message(msg.chat.id, reply)
        .reply_markup(KeyboardMarkup::new(vec![vec![
            KeyboardButton::new(GENERATE),
            KeyboardButton::new(STUDY),
        ]]))
        .await?;

    dialogue
        .update(State::ReceiveDocuments {
            deck_name: deck_name.to_string(),
            text: String::new(),
            documents: 0,
        })
        .await?;
    Ok(())
}

async fn receive_documents(
    bot: Bot,
    dialogue: QuizDialogue,
    (deck_name, text, documents): (String, String, usize),
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    if let Some(document) = msg.document() {
        let name = document.file_name.clone().unwrap_or_else(|| "document".to_string());
        if !is_pdf(document) {
            bot.send_message(msg.chat.id, format!("\"{}\" is not a PDF", name))
                .await?;
            return Ok(());
        }

        let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
        let file = bot.get_file(document.file.id.clone()).await?;
        let mut bytes = Vec::new();
        bot.download_file(&file.path, &mut bytes).await?;
        debug!("Downloaded {} ({} bytes)", name, bytes.len());

        let worker = app.clone();
        let extraction = tokio::task::spawn_blocking(move || worker.source.extract(&bytes)).await?;
        let extraction = match extraction {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("Could not read {}: {}", name, e);
                bot.send_message(msg.chat.id, format!("I could not read \"{}\": {}", name, e))
                    .await?;
                return Ok(());
            }
        };
        if let Some(reason) = &extraction.degraded {
            bot.send_message(
                msg.chat.id,
                format!(
                    "Image processing skipped ({}). Proceeding with text-based questions only.",
                    reason
                ),
            )
            .await?;
        }

        let mut all = Extraction {
            text,
            degraded: None,
        };
        all.merge(extraction);
        bot.send_message(
            msg.chat.id,
            format!(
                "Got \"{}\". Send more PDFs or press \"{}\".",
                name, GENERATE
            ),
        )
        .await?;
        dialogue
            .update(State::ReceiveDocuments {
                deck_name,
                text: all.text,
                documents: documents + 1,
            })
            .await?;
        return Ok(());
    }

    match msg.text() {
        Some(GENERATE) => {
            if documents == 0 {
                bot.send_message(msg.chat.id, "Send me at least one PDF first")
                    .await?;
                return Ok(());
            }
            let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

            let mut request = GenerationRequest {
                mcq_count: app.config.mcq_count,
                true_false_count: app.config.true_false_count,
                ..GenerationRequest::new(deck_name.clone())
            };
            if let Some(seed) = app.config.quiz_seed {
                request = request.with_seed(seed);
            }
            let worker = app.clone();
            let result = tokio::task::spawn_blocking(move || {
                generate(&text, &worker.analyzer, &worker.pool, &request)
            })
            .await?;
            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    error!("Generation for deck '{}' failed: {}", deck_name, e);
                    bot.send_message(
                        msg.chat.id,
                        format!("I can't generate questions right now: {}", e),
                    )
                    .await?;
                    return Ok(());
                }
            };

            let saved = {
                let mut decks = app.decks.lock().await;
                // Keep the lock while saving so writes land in order
                tokio::task::block_in_place(|| {
                    app.store.update(&mut decks, |decks| result.append_to(decks))
                })
                .map(|()| decks.get(&deck_name).map(|deck| deck.len()).unwrap_or(0))
            };
            let total = match saved {
                Ok(total) => total,
                Err(e) => {
                    error!("Saving deck '{}' failed: {}", deck_name, e);
                    bot.send_message(
                        msg.chat.id,
                        format!("I generated the questions but could not save them: {}", e),
                    )
                    .await?;
                    return Ok(());
                }
            };

            let reply = if result.items.is_empty() && result.keywords == 0 && result.sentences > 0 {
                "I couldn't find any named entities to ask about in these documents.".to_string()
            } else if result.items.is_empty() {
                "I couldn't find anything to ask about in these documents.".to_string()
            } else if result.shortfall() > 0 {
                format!(
                    "Added {} questions to \"{}\" ({} asked for, the documents ran short).",
                    result.items.len(),
                    deck_name,
                    result.requested
                )
            } else {
                format!("Added {} questions to \"{}\".", result.items.len(), deck_name)
            };
            bot.send_message(msg.chat.id, reply).await?;

            if total == 0 {
                return Ok(());
            }
            ask_for_mode(&bot, &msg).await?;
            dialogue.update(State::ReceiveModeChoice { deck_name }).await?;
            Ok(())
        }
        Some(STUDY) => {
            let empty = app
                .decks
                .lock()
                .await
                .get(&deck_name)
                .map(|deck| deck.is_empty())
                .unwrap_or(true);
            if empty {
                bot.send_message(msg.chat.id, "This deck has no questions yet. Send me a PDF first.")
                    .await?;
                return Ok(());
            }
            ask_for_mode(&bot, &msg).await?;
            dialogue.update(State::ReceiveModeChoice { deck_name }).await?;
            Ok(())
        }
        _ => {
            bot.send_message(msg.chat.id, "Please send a PDF or choose one of the options")
                .await?;
            Ok(())
        }
    }
}

async fn ask_for_mode(bot: &Bot, msg: &Message) -> HandlerResult {
    bot.send_message(msg.chat.id, "How would you like to study?")
        .reply_markup(KeyboardMarkup::new(vec![vec![
            KeyboardButton::new(ANSWER_MODE),
            KeyboardButton::new(FLASHCARD_MODE),
        ]]))
        .await?;
    Ok(())
}

async fn receive_mode_choice(
    bot: Bot,
    dialogue: QuizDialogue,
    deck_name: String,
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    let mode = match msg.text() {
        Some(ANSWER_MODE) => Mode::Answer,
        Some(FLASHCARD_MODE) => Mode::Flashcard,
        _ => {
            bot.send_message(msg.chat.id, "Please choose one of the options")
                .await?;
            return Ok(());
        }
    };

    let items = app
        .decks
        .lock()
        .await
        .get(&deck_name)
        .cloned()
        .unwrap_or_default();
    let session = match QuizSession::new(deck_name, items, mode) {
        Ok(session) => session,
        Err(e) => {
            bot.send_message(msg.chat.id, e.to_string()).await?;
            return Ok(());
        }
    };

    match mode {
        Mode::Answer => {
            send_question(&bot, &msg, &session).await?;
            dialogue.update(State::AnswerMode { session }).await?;
        }
        Mode::Flashcard => {
            send_card(&bot, &msg, &session).await?;
            dialogue.update(State::FlashcardMode { session }).await?;
        }
    }
    Ok(())
}

async fn answer_mode(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: QuizSession,
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    let Some(answer) = msg.text() else {
        bot.send_message(msg.chat.id, "Please pick one of the options")
            .await?;
        return Ok(());
    };

    match answer {
        MENU => return back_to_decks(bot, dialogue, msg.clone(), app).await,
        RESTART => {
            session.restart();
            send_question(&bot, &msg, &session).await?;
            dialogue.update(State::AnswerMode { session }).await?;
            return Ok(());
        }
        _ => {}
    }

    let item = session.current().clone();
    let outcome = match session.submit(answer) {
        Ok(outcome) => outcome,
        Err(SessionError::Finished) => {
            send_score(&bot, &msg, &session).await?;
            return Ok(());
        }
        Err(e) => {
            bot.send_message(msg.chat.id, e.to_string()).await?;
            return Ok(());
        }
    };

    if outcome.correct {
        bot.send_message(msg.chat.id, "Correct!").await?;
    } else {
        let mut reply = format!("Wrong! Correct answer is {}", outcome.correct_text);
        if let Some(tutor) = &app.tutor {
            let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
            // The generated explanation below is enough when the tutor times out
            match tutor.generate_reply_to_wrong_answer(&item, answer).await {
                Ok(elaboration) => reply = format!("{}\n\n{}", reply, elaboration),
                Err(e) => warn!("Tutor reply failed: {}", e),
            }
        }
        bot.send_message(msg.chat.id, reply).await?;
    }
    bot.send_message(
        msg.chat.id,
        format!("<b>Explanation:</b> {}", html::escape(&outcome.explanation)),
    )
    .parse_mode(ParseMode::Html)
    .await?;

    if outcome.finished {
        send_score(&bot, &msg, &session).await?;
    } else {
        send_question(&bot, &msg, &session).await?;
    }
    dialogue.update(State::AnswerMode { session }).await?;
    Ok(())
}

async fn flashcard_mode(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: QuizSession,
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    match msg.text() {
        Some(MENU) => return back_to_decks(bot, dialogue, msg.clone(), app).await,
        Some(FLIP) => {
            session.flip()?;
        }
        Some(PREVIOUS) => {
            session.previous();
        }
        Some(NEXT) => {
            if !session.next() {
                bot.send_message(msg.chat.id, "You've reached the end of the deck!")
                    .reply_markup(KeyboardMarkup::new(vec![vec![
                        KeyboardButton::new(PREVIOUS),
                        KeyboardButton::new(RESTART),
                        KeyboardButton::new(MENU),
                    ]]))
                    .await?;
                dialogue.update(State::FlashcardMode { session }).await?;
                return Ok(());
            }
        }
        Some(RESTART) => session.restart(),
        _ => {
            bot.send_message(msg.chat.id, "Please use the buttons below")
                .await?;
            return Ok(());
        }
    }

    send_card(&bot, &msg, &session).await?;
    dialogue.update(State::FlashcardMode { session }).await?;
    Ok(())
}

async fn back_to_decks(bot: Bot, dialogue: QuizDialogue, msg: Message, app: Arc<App>) -> HandlerResult {
    start(bot, dialogue, msg, app).await
}

async fn send_question(bot: &Bot, msg: &Message, session: &QuizSession) -> HandlerResult {
    let item = session.current();
    let text = format!(
        "<b>Q{}.</b> {}\n\n{}",
        session.position() + 1,
        html::escape(&item.question),
        item.options
            .iter()
            .map(|o| html::escape(o))
            .collect::<Vec<_>>()
            .join("\n")
    );
    let mut buttons = item
        .option_texts()
        .into_iter()
        .map(|o| vec![KeyboardButton::new(o)])
        .collect::<Vec<_>>();
    buttons.push(vec![KeyboardButton::new(RESTART), KeyboardButton::new(MENU)]);

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(KeyboardMarkup::new(buttons))
        .await?;
    Ok(())
}

async fn send_score(bot: &Bot, msg: &Message, session: &QuizSession) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        format!(
            "All questions completed! Your score: {}/{}",
            session.score(),
            session.len()
        ),
    )
    .reply_markup(KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(RESTART),
        KeyboardButton::new(MENU),
    ]]))
    .await?;
    Ok(())
}

async fn send_card(bot: &Bot, msg: &Message, session: &QuizSession) -> HandlerResult {
    let item = session.current();
    let mut text = format!(
        "<b>Card {}/{}</b>\n\n<b>Question:</b> {}",
        session.position() + 1,
        session.len(),
        html::escape(&item.question)
    );
    if session.is_flipped() {
        text.push_str(&format!(
            "\n\n<b>Answer:</b> {}\n<b>Explanation:</b> {}",
            html::escape(item.correct_text().unwrap_or_default()),
            html::escape(&item.explanation)
        ));
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(KeyboardMarkup::new(vec![
            vec![KeyboardButton::new(FLIP)],
            vec![KeyboardButton::new(PREVIOUS), KeyboardButton::new(NEXT)],
            vec![KeyboardButton::new(RESTART), KeyboardButton::new(MENU)],
        ]))
        .await?;
    Ok(())
}

fn is_pdf(document: &Document) -> bool {
    let by_mime = document
        .mime_type
        .as_ref()
        .map(|mime| mime.essence_str() == "application/pdf")
        .unwrap_or(false);
    let by_name = document
        .file_name
        .as_deref()
        .map(|name| name.to_lowercase().ends_with(".pdf"))
        .unwrap_or(false);
    by_mime || by_name
}
