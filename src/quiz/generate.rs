use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::quiz::analyzer::{AnalyzerError, LinguisticAnalyzer};
use crate::quiz::profile::{build_profiles, ProfilePool};
use crate::quiz::synth::{synthesize_mcqs, synthesize_true_false, SentenceUsageSet};
use crate::quiz::{Decks, QuizItem};

pub const DEFAULT_MCQ_COUNT: usize = 15;
pub const DEFAULT_TRUE_FALSE_COUNT: usize = 5;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub deck_name: String,
    pub mcq_count: usize,
    pub true_false_count: usize,
    /// Fixed seed for reproducible decks; a fresh one is drawn when `None`
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(deck_name: impl Into<String>) -> Self {
        Self {
            deck_name: deck_name.into(),
            mcq_count: DEFAULT_MCQ_COUNT,
            true_false_count: DEFAULT_TRUE_FALSE_COUNT,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn requested(&self) -> usize {
        self.mcq_count + self.true_false_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub deck_name: String,
    pub items: Vec<QuizItem>,
    pub requested: usize,
    /// Distinct keywords profiled from the text
    pub keywords: usize,
    /// Sentences long enough to ask about
    pub sentences: usize,
}

impl GenerationResult {
    /// How many questions fewer than requested came out of a thin corpus.
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.items.len())
    }

    /// Appends to the named deck, creating it on first reference. Does not persist.
    pub fn append_to(&self, decks: &mut Decks) {
        decks
            .entry(self.deck_name.clone())
            .or_default()
            .extend(self.items.iter().cloned());
    }
}

/// Turns extracted document text into quiz items for one deck.
/// An analyzer failure stops the run; an empty or thin corpus just yields fewer items.
pub fn generate(
    text: &str,
    analyzer: &dyn LinguisticAnalyzer,
    pool: &ProfilePool,
    request: &GenerationRequest,
) -> Result<GenerationResult> {
    let mut rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let analyzed = if text.trim().is_empty() {
        Vec::new()
    } else {
        analyzer.analyze(text)?
    };
    let profiles = build_profiles(&analyzed, pool);
    let sentences = analyzed
        .iter()
        .filter(|s| s.is_meaningful())
        .map(|s| s.text.trim().to_string())
        .collect::<Vec<_>>();

    let mut usage = SentenceUsageSet::new();
    let mut items = synthesize_mcqs(
        &profiles,
        &sentences,
        pool,
        &mut usage,
        request.mcq_count,
        &mut rng,
    );
    items.extend(synthesize_true_false(
        &profiles,
        &sentences,
        &mut usage,
        request.true_false_count,
        &mut rng,
    ));

    if usage.is_empty() && !profiles.is_empty() {
        warn!("Found {} keywords but no sentence long enough to ask about", profiles.len());
    }
    info!(
        "Generated {} of {} questions for deck '{}' ({} keywords, {} of {} sentences used)",
        items.len(),
        request.requested(),
        request.deck_name,
        profiles.len(),
        usage.len(),
        sentences.len()
    );

    Ok(GenerationResult {
        deck_name: request.deck_name.clone(),
        items,
        requested: request.requested(),
        keywords: profiles.len(),
        sentences: sentences.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::analyzer::{DependencyRole, Entity, EntityCategory, Sentence, Token};
    use crate::quiz::store::DeckStore;

    struct FixedAnalyzer(Vec<Sentence>);

    impl LinguisticAnalyzer for FixedAnalyzer {
        fn analyze(&self, _text: &str) -> crate::quiz::analyzer::Result<Vec<Sentence>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenAnalyzer;

    impl LinguisticAnalyzer for BrokenAnalyzer {
        fn analyze(&self, _text: &str) -> crate::quiz::analyzer::Result<Vec<Sentence>> {
            Err(AnalyzerError::Unavailable("model not installed".to_string()))
        }
    }

    fn sentence(text: &str, entity: Option<(&str, usize)>) -> Sentence {
        let tokens = text
            .split_whitespace()
            .map(|w| Token {
                form: w.to_string(),
                lemma: w.to_lowercase(),
                head: None,
                role: DependencyRole::Other,
            })
            .collect();
        let entities = entity
            .map(|(name, start)| Entity {
                text: name.to_string(),
                category: EntityCategory::Organization,
                start,
                end: start + 1,
            })
            .into_iter()
            .collect();
        Sentence {
            text: text.to_string(),
            tokens,
            entities,
        }
    }

    fn corpus() -> Vec<Sentence> {
        (0..25)
            .map(|i| {
                let org = ["Pfizer", "Moderna", "Novartis", "Roche", "Bayer"][i % 5];
                sentence(
                    &format!("{} studies the regulation of pathway number {} today.", org, i),
                    Some((org, 0)),
                )
            })
            .collect()
    }

    #[test]
    fn generates_requested_counts() {
        let analyzer = FixedAnalyzer(corpus());
        let request = GenerationRequest::new("Biology").with_seed(1);
        let result = generate("some text", &analyzer, &ProfilePool::default(), &request).unwrap();
        assert_eq!(result.items.len(), 20);
        assert_eq!(result.shortfall(), 0);
        assert_eq!(result.keywords, 5);
        assert_eq!(result.items.iter().filter(|i| i.options.len() == 4).count(), 15);
        assert_eq!(result.items.iter().filter(|i| i.options.len() == 2).count(), 5);
    }

    #[test]
    fn same_seed_same_deck() {
        let analyzer = FixedAnalyzer(corpus());
        let request = GenerationRequest::new("Biology").with_seed(77);
        let pool = ProfilePool::default();
        let first = generate("text", &analyzer, &pool, &request).unwrap();
        let second = generate("text", &analyzer, &pool, &request).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn corpus_without_entities_yields_no_questions() {
        let analyzer = FixedAnalyzer(vec![
            sentence("Cells divide and grow in warm water every day.", None),
            sentence("Light passes through the glass of the window.", None),
        ]);
        let request = GenerationRequest::new("Empty").with_seed(3);
        let result = generate("text", &analyzer, &ProfilePool::default(), &request).unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.keywords, 0);
        assert_eq!(result.shortfall(), 20);
    }

    #[test]
    fn short_sentences_are_not_question_sources() {
        let analyzer = FixedAnalyzer(vec![
            sentence("Pfizer regulates things.", Some(("Pfizer", 0))),
            sentence("Roche explains the regulation of many pathways.", Some(("Roche", 0))),
        ]);
        let request = GenerationRequest::new("Short").with_seed(4);
        let result = generate("text", &analyzer, &ProfilePool::default(), &request).unwrap();
        assert_eq!(result.sentences, 1);
        assert_eq!(result.keywords, 2);
        // one usable sentence means one question in total
        assert_eq!(result.items.len(), 1);
    }

    #[test]
    fn empty_text_skips_the_analyzer() {
        let request = GenerationRequest::new("Nothing");
        let result = generate("   ", &BrokenAnalyzer, &ProfilePool::default(), &request).unwrap();
        assert!(result.items.is_empty());
    }

    #[test]
    fn analyzer_failure_stops_generation() {
        let request = GenerationRequest::new("Broken");
        let err = generate("Some text.", &BrokenAnalyzer, &ProfilePool::default(), &request).unwrap_err();
        assert!(matches!(err, GenerationError::Analyzer(AnalyzerError::Unavailable(_))));
    }

    #[test]
    fn appends_to_existing_or_new_deck() {
        let analyzer = FixedAnalyzer(corpus());
        let pool = ProfilePool::default();
        let mut decks = Decks::new();
        let first = generate("t", &analyzer, &pool, &GenerationRequest::new("Bio").with_seed(1)).unwrap();
        first.append_to(&mut decks);
        let second = generate("t", &analyzer, &pool, &GenerationRequest::new("Bio").with_seed(2)).unwrap();
        second.append_to(&mut decks);
        assert_eq!(decks.len(), 1);
        assert_eq!(decks["Bio"].len(), 40);
        assert_eq!(decks["Bio"][..20], first.items[..]);
    }

    #[test]
    fn retry_after_failed_save_appends_once() {
        let analyzer = FixedAnalyzer(corpus());
        let request = GenerationRequest::new("Bio").with_seed(5);
        let result = generate("t", &analyzer, &ProfilePool::default(), &request).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut decks = Decks::new();
        let broken = DeckStore::new(blocker.join("decks.json"));
        assert!(broken.update(&mut decks, |decks| result.append_to(decks)).is_err());
        assert!(decks.is_empty());

        let store = DeckStore::new(dir.path().join("decks.json"));
        store.update(&mut decks, |decks| result.append_to(decks)).unwrap();
        assert_eq!(decks["Bio"].len(), 20);
        assert_eq!(store.load().unwrap()["Bio"].len(), 20);
    }
}
