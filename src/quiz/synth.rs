use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::quiz::profile::{third_person, KeywordProfile, ProfilePool};
use crate::quiz::{sentence_prefix, QuizItem};

pub const MCQ_OPTIONS: usize = 4;

const PROCESS_CATEGORIES: [&str; 3] = ["metabolic", "genetic", "cellular"];

/// Sentences already turned into a question during one generation run.
#[derive(Debug, Clone, Default)]
pub struct SentenceUsageSet {
    used: HashSet<String>,
}

impl SentenceUsageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, sentence: &str) -> bool {
        self.used.contains(sentence)
    }

    pub fn mark(&mut self, sentence: &str) {
        self.used.insert(sentence.to_string());
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    Essential,
    Influence,
    Evidence,
    Altering,
}

const TEMPLATES: [Template; 4] = [
    Template::Essential,
    Template::Influence,
    Template::Evidence,
    Template::Altering,
];

impl Template {
    fn question(&self, keyword: &str, prefix: &str) -> String {
        match self {
            Template::Essential => format!(
                "Why might {} be essential for the process described in '{}...'?",
                keyword, prefix
            ),
            Template::Influence => {
                format!("How could {} influence the outcome of '{}...'?", keyword, prefix)
            }
            Template::Evidence => format!(
                "What evidence from '{}...' supports the role of {}?",
                prefix, keyword
            ),
            Template::Altering => format!(
                "How would altering {} affect the process in '{}...'?",
                keyword, prefix
            ),
        }
    }

    fn explanation(&self, keyword: &str, profile: &KeywordProfile, prefix: &str) -> String {
        let does = third_person(&profile.action);
        let object = profile.object_or_fallback();
        match self {
            Template::Essential => format!(
                "{} is essential here because it {} {}, which the process in '{}...' depends on.",
                keyword, does, object, prefix
            ),
            Template::Influence => format!(
                "{} shapes the outcome of '{}...' because it {} {}.",
                keyword, prefix, does, object
            ),
            Template::Evidence => format!(
                "The passage '{}...' points to {} as the part that {} {}.",
                prefix, keyword, does, object
            ),
            Template::Altering => format!(
                "Altering {} would disturb the process in '{}...', since it {} {}.",
                keyword, prefix, does, object
            ),
        }
    }
}

/// Generates up to `count` multiple choice items. Iterations that find no unused
/// sentence are skipped, so fewer items than requested is a normal outcome.
pub fn synthesize_mcqs<R: Rng + ?Sized>(
    profiles: &BTreeMap<String, KeywordProfile>,
    sentences: &[String],
    pool: &ProfilePool,
    usage: &mut SentenceUsageSet,
    count: usize,
    rng: &mut R,
) -> Vec<QuizItem> {
    let keywords = profiles.keys().collect::<Vec<_>>();
    if keywords.is_empty() || sentences.is_empty() {
        debug!("Nothing to ask about, skipping multiple choice questions");
        return Vec::new();
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(keyword) = keywords.choose(rng) else {
            break;
        };
        let profile = &profiles[*keyword];
        let Some(sentence) = pick_sentence(keyword, sentences, usage, rng) else {
            continue;
        };
        usage.mark(sentence);

        let template = TEMPLATES[rng.gen_range(0..TEMPLATES.len())];
        let prefix = sentence_prefix(sentence);

        let Some(mut options) = build_options(profile, pool, rng) else {
            warn!("Could not find {} distinct options for '{}', dropping the question", MCQ_OPTIONS, keyword);
            continue;
        };
        options.shuffle(rng);
        let Some(correct) = options.iter().position(|o| *o == profile.correct) else {
            continue;
        };

        items.push(QuizItem::new(
            template.question(keyword, &prefix),
            options,
            correct,
            template.explanation(keyword, profile, &prefix),
        ));
    }
    items
}

/// Generates up to `count` true/false items. The statement is true exactly when the
/// keyword literally occurs in its source sentence.
pub fn synthesize_true_false<R: Rng + ?Sized>(
    profiles: &BTreeMap<String, KeywordProfile>,
    sentences: &[String],
    usage: &mut SentenceUsageSet,
    count: usize,
    rng: &mut R,
) -> Vec<QuizItem> {
    let keywords = profiles.keys().collect::<Vec<_>>();
    if keywords.is_empty() || sentences.is_empty() {
        debug!("Nothing to ask about, skipping true/false questions");
        return Vec::new();
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(keyword) = keywords.choose(rng) else {
            break;
        };
        let profile = &profiles[*keyword];
        let Some(sentence) = pick_sentence(keyword, sentences, usage, rng) else {
            continue;
        };
        usage.mark(sentence);

        let prefix = sentence_prefix(sentence);
        let category = PROCESS_CATEGORIES[rng.gen_range(0..PROCESS_CATEGORIES.len())];
        let statement = format!(
            "{} is central to the {} process in '{}...'.",
            keyword, category, prefix
        );

        let is_true = sentence.to_lowercase().contains(keyword.as_str());
        let explanation = format!(
            "This is {}true: the sentence '{}...' {} {}, which {} {}.",
            if is_true { "" } else { "not " },
            prefix,
            if is_true { "mentions" } else { "does not mention" },
            keyword,
            third_person(&profile.action),
            profile.object_or_fallback()
        );

        items.push(QuizItem::new(
            statement,
            vec!["True".to_string(), "False".to_string()],
            if is_true { 0 } else { 1 },
            explanation,
        ));
    }
    items
}

/// Prefers an unused sentence mentioning the keyword, then any unused sentence.
fn pick_sentence<'a, R: Rng + ?Sized>(
    keyword: &str,
    sentences: &'a [String],
    usage: &SentenceUsageSet,
    rng: &mut R,
) -> Option<&'a str> {
    let unused = sentences
        .iter()
        .filter(|s| !usage.contains(s))
        .collect::<Vec<_>>();
    let mentioning = unused
        .iter()
        .filter(|s| s.to_lowercase().contains(keyword))
        .copied()
        .collect::<Vec<_>>();

    mentioning
        .choose(rng)
        .or_else(|| unused.choose(rng))
        .copied()
        .map(String::as_str)
}

/// The correct claim first, then shuffled distractors, then shuffled fallbacks,
/// all distinct ignoring case. `None` when the pools can't fill four options.
pub fn build_options<R: Rng + ?Sized>(
    profile: &KeywordProfile,
    pool: &ProfilePool,
    rng: &mut R,
) -> Option<Vec<String>> {
    let mut options = vec![profile.correct.clone()];

    let mut distractors = profile.distractors.clone();
    distractors.shuffle(rng);
    let mut fallbacks = pool.fallbacks.clone();
    fallbacks.shuffle(rng);

    for candidate in distractors.into_iter().chain(fallbacks) {
        if options.len() == MCQ_OPTIONS {
            break;
        }
        let lowered = candidate.to_lowercase();
        if !options.iter().any(|o| o.to_lowercase() == lowered) {
            options.push(candidate);
        }
    }

    if options.len() == MCQ_OPTIONS {
        Some(options)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn profile(correct: &str, distractors: &[&str]) -> KeywordProfile {
        KeywordProfile {
            correct: correct.to_string(),
            distractors: distractors.iter().map(|d| d.to_string()).collect(),
            action: "lower".to_string(),
            object: Some("activation energy".to_string()),
        }
    }

    fn corpus() -> (BTreeMap<String, KeywordProfile>, Vec<String>) {
        let pool = ProfilePool::default();
        let mut profiles = BTreeMap::new();
        for keyword in ["enzyme", "ribosome", "mitochondria"] {
            profiles.insert(
                keyword.to_string(),
                profile(&format!("It helps the {}", keyword), &pool.distractors.iter().map(|s| s.as_str()).collect::<Vec<_>>()),
            );
        }
        let sentences = (0..30)
            .map(|i| {
                let keyword = ["enzyme", "ribosome", "mitochondria"][i % 3];
                format!("Sentence {} says the {} matters in the cell.", i, keyword)
            })
            .collect();
        (profiles, sentences)
    }

    fn distinct(texts: &[&str]) -> bool {
        let set = texts.iter().map(|t| t.to_lowercase()).collect::<HashSet<_>>();
        set.len() == texts.len()
    }

    #[test]
    fn pads_with_exactly_one_fallback() {
        let enzyme = profile(
            "lowers activation energy",
            &["It stores genetic information", "It transports oxygen"],
        );
        let pool = ProfilePool::default();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let options = build_options(&enzyme, &pool, &mut rng).unwrap();
            assert_eq!(options.len(), 4);
            assert_eq!(options[0], "lowers activation energy");
            let padded = options
                .iter()
                .filter(|o| pool.fallbacks.contains(o))
                .collect::<Vec<_>>();
            assert_eq!(padded.len(), 1);
            assert_ne!(padded[0], &enzyme.correct);
            assert!(!enzyme.distractors.contains(padded[0]));
        }
    }

    #[test]
    fn duplicate_distractors_are_ignored() {
        let p = profile(
            "It regulates genes",
            &["It transports oxygen", "it transports oxygen", "It regulates genes"],
        );
        let mut rng = StdRng::seed_from_u64(7);
        let options = build_options(&p, &ProfilePool::default(), &mut rng).unwrap();
        let texts = options.iter().map(|o| o.as_str()).collect::<Vec<_>>();
        assert_eq!(texts.len(), 4);
        assert!(distinct(&texts));
    }

    #[test]
    fn exhausted_pools_give_no_options() {
        let p = profile("It regulates genes", &[]);
        let pool = ProfilePool {
            fallbacks: vec!["It regulates genes".to_string(), "It transports oxygen".to_string()],
            ..ProfilePool::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(build_options(&p, &pool, &mut rng), None);
    }

    #[test]
    fn mcq_items_are_well_formed() {
        let (profiles, sentences) = corpus();
        let mut rng = StdRng::seed_from_u64(42);
        let mut usage = SentenceUsageSet::new();
        let items = synthesize_mcqs(&profiles, &sentences, &ProfilePool::default(), &mut usage, 15, &mut rng);
        assert_eq!(items.len(), 15);
        for item in &items {
            assert_eq!(item.options.len(), 4);
            assert!(distinct(&item.option_texts()));
            let correct = item.correct_text().unwrap();
            assert!(profiles.values().any(|p| p.correct == correct));
            assert!(item.question.contains("..."));
        }
    }

    #[test]
    fn answer_points_at_the_keyword_claim() {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "enzyme".to_string(),
            profile("lowers activation energy", &["It stores genetic information", "It transports oxygen"]),
        );
        let sentences = vec!["An enzyme lowers the activation energy of a reaction.".to_string()];
        let mut rng = StdRng::seed_from_u64(3);
        let mut usage = SentenceUsageSet::new();
        let items = synthesize_mcqs(&profiles, &sentences, &ProfilePool::default(), &mut usage, 1, &mut rng);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].correct_text(), Some("lowers activation energy"));
        assert!(items[0].explanation.contains("enzyme"));
        assert!(items[0].explanation.contains("lowers activation energy"));
    }

    #[test]
    fn sentences_are_not_reused_within_a_run() {
        let (profiles, sentences) = corpus();
        let mut rng = StdRng::seed_from_u64(9);
        let mut usage = SentenceUsageSet::new();
        let mut items = synthesize_mcqs(&profiles, &sentences, &ProfilePool::default(), &mut usage, 20, &mut rng);
        items.extend(synthesize_true_false(&profiles, &sentences, &mut usage, 10, &mut rng));
        assert_eq!(items.len(), 30);
        assert_eq!(usage.len(), 30);

        // Every question embeds the distinct "Sentence <n> " prefix of its source
        let sources = items
            .iter()
            .map(|item| {
                let start = item.question.find("Sentence ").unwrap();
                item.question[start..].split(' ').nth(1).unwrap().to_string()
            })
            .collect::<HashSet<_>>();
        assert_eq!(sources.len(), 30);
    }

    #[test]
    fn runs_short_once_sentences_are_used_up() {
        let (profiles, sentences) = corpus();
        let sentences = sentences.into_iter().take(4).collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(5);
        let mut usage = SentenceUsageSet::new();
        let items = synthesize_mcqs(&profiles, &sentences, &ProfilePool::default(), &mut usage, 15, &mut rng);
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn empty_profiles_yield_nothing() {
        let sentences = vec!["Cells divide by mitosis in many tissues.".to_string()];
        let mut rng = StdRng::seed_from_u64(0);
        let mut usage = SentenceUsageSet::new();
        let profiles = BTreeMap::new();
        assert!(synthesize_mcqs(&profiles, &sentences, &ProfilePool::default(), &mut usage, 15, &mut rng).is_empty());
        assert!(synthesize_true_false(&profiles, &sentences, &mut usage, 5, &mut rng).is_empty());
        assert!(usage.is_empty());
    }

    #[test]
    fn true_when_sentence_mentions_keyword() {
        let mut profiles = BTreeMap::new();
        profiles.insert("atp synthase".to_string(), profile("It makes ATP", &[]));
        let sentences = vec!["The ATP Synthase complex spins in the membrane.".to_string()];
        let mut rng = StdRng::seed_from_u64(11);
        let mut usage = SentenceUsageSet::new();
        let items = synthesize_true_false(&profiles, &sentences, &mut usage, 1, &mut rng);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].options, vec!["A. True", "B. False"]);
        assert_eq!(items[0].answer, 'A');
        assert!(items[0].explanation.starts_with("This is true"));
    }

    #[test]
    fn false_when_only_unrelated_sentences_remain() {
        let mut profiles = BTreeMap::new();
        profiles.insert("golgi".to_string(), profile("It packages proteins", &[]));
        let sentences = vec!["Chloroplasts capture light in plant cells.".to_string()];
        let mut rng = StdRng::seed_from_u64(2);
        let mut usage = SentenceUsageSet::new();
        let items = synthesize_true_false(&profiles, &sentences, &mut usage, 3, &mut rng);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].answer, 'B');
        assert_eq!(items[0].correct_text(), Some("False"));
        assert!(items[0].explanation.starts_with("This is not true"));
    }
}
