use std::collections::BTreeMap;

use log::debug;

use crate::quiz::analyzer::{DependencyRole, Entity, Sentence};

/// Object used when a relation gives us a verb but nothing it acts on.
pub const FALLBACK_OBJECT: &str = "biological processes";

/// A heuristic "fact" about one keyword: what it does (the correct claim)
/// and what it does not (distractors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordProfile {
    pub correct: String,
    pub distractors: Vec<String>,
    pub action: String,
    pub object: Option<String>,
}

impl KeywordProfile {
    pub fn object_or_fallback(&self) -> &str {
        self.object.as_deref().unwrap_or(FALLBACK_OBJECT)
    }
}

/// Domain phrase that, when found in a sentence, decides the claimed function of a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub phrases: Vec<String>,
    pub action: String,
    pub object: String,
    pub correct: String,
}

impl Trigger {
    fn new(phrases: &[&str], action: &str, object: &str, correct: &str) -> Self {
        Self {
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
            action: action.to_string(),
            object: object.to_string(),
            correct: correct.to_string(),
        }
    }

    fn matches(&self, lowercased: &str) -> bool {
        self.phrases.iter().any(|p| lowercased.contains(p.as_str()))
    }
}

/// Canned claims the profile builder and the synthesizer draw from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePool {
    /// Checked in order, first match wins
    pub triggers: Vec<Trigger>,
    pub generic: Trigger,
    pub distractors: Vec<String>,
    /// Pads multiple choice options when a keyword has too few distractors
    pub fallbacks: Vec<String>,
}

impl Default for ProfilePool {
    fn default() -> Self {
        Self {
            triggers: vec![
                Trigger::new(
                    &["regulate", "regulation"],
                    "regulate",
                    "biological processes",
                    "It regulates biological processes",
                ),
                Trigger::new(
                    &["metabolism", "metabolic"],
                    "convert",
                    "nutrients into energy",
                    "It converts nutrients into energy",
                ),
                Trigger::new(
                    &["synthesis", "synthesize"],
                    "synthesize",
                    "proteins or molecules",
                    "It synthesizes proteins or molecules",
                ),
                Trigger::new(
                    &["catalyze", "catalysis"],
                    "catalyze",
                    "chemical reactions",
                    "It catalyzes chemical reactions",
                ),
            ],
            generic: Trigger::new(
                &[],
                "play",
                "a key role in cellular function",
                "It plays a key role in cellular function",
            ),
            distractors: vec![
                "It stores genetic information".to_string(),
                "It transports oxygen".to_string(),
                "It produces ATP passively".to_string(),
            ],
            fallbacks: vec![
                "It synthesizes proteins".to_string(),
                "It regulates genes".to_string(),
                "It catalyzes reactions".to_string(),
            ],
        }
    }
}

/// Builds one profile per distinct lowercased entity text.
/// The first sentence an entity shows up in decides its profile.
pub fn build_profiles(sentences: &[Sentence], pool: &ProfilePool) -> BTreeMap<String, KeywordProfile> {
    let mut profiles = BTreeMap::new();

    for sentence in sentences {
        for entity in &sentence.entities {
            let key = entity.text.to_lowercase();
            if key.trim().is_empty() || profiles.contains_key(&key) {
                continue;
            }

            let (action, object, correct) = match relation_claim(sentence, entity) {
                Some(claim) => claim,
                None => {
                    let context = sentence.text.to_lowercase();
                    let trigger = pool
                        .triggers
                        .iter()
                        .find(|t| t.matches(&context))
                        .unwrap_or(&pool.generic);
                    (
                        trigger.action.clone(),
                        Some(trigger.object.clone()),
                        trigger.correct.clone(),
                    )
                }
            };

            let distractors = pool
                .distractors
                .iter()
                .filter(|d| d.to_lowercase() != correct.to_lowercase())
                .cloned()
                .collect();

            debug!("Profiled {:?} '{}': {}", entity.category, key, correct);
            profiles.insert(
                key,
                KeywordProfile {
                    correct,
                    distractors,
                    action,
                    object,
                },
            );
        }
    }

    profiles
}

/// An entity acting as subject or direct object of a verb yields
/// `(lemma of the verb, what the verb acts on, "It <verb>s <object>")`.
fn relation_claim(sentence: &Sentence, entity: &Entity) -> Option<(String, Option<String>, String)> {
    let (head_index, head) = (entity.start..entity.end)
        .filter_map(|i| sentence.tokens.get(i))
        .filter(|t| matches!(t.role, DependencyRole::Subject | DependencyRole::Object))
        .filter_map(|t| t.head)
        .filter(|head| !entity.contains(*head))
        .find_map(|head| sentence.tokens.get(head).map(|t| (head, t)))?;

    let action = head.lemma.to_lowercase();
    if action.trim().is_empty() {
        return None;
    }
    let object = sentence
        .children(head_index)
        .filter(|(i, _)| !entity.contains(*i))
        .find(|(_, child)| matches!(child.role, DependencyRole::Object | DependencyRole::Attribute))
        .map(|(_, child)| child.form.clone());

    let correct = format!(
        "It {} {}",
        third_person(&action),
        object.as_deref().unwrap_or(FALLBACK_OBJECT)
    );
    Some((action, object, correct))
}

/// `catalyze` -> `catalyzes`, `carry` -> `carries`, `bind` -> `binds`
pub fn third_person(verb: &str) -> String {
    let ends_with_consonant_y = verb.ends_with('y')
        && verb
            .chars()
            .rev()
            .nth(1)
            .map(|c| !"aeiou".contains(c))
            .unwrap_or(false);
    if ends_with_consonant_y {
        format!("{}ies", &verb[..verb.len() - 1])
    } else if ["s", "x", "z", "ch", "sh", "o"].iter().any(|end| verb.ends_with(end)) {
        format!("{}es", verb)
    } else {
        format!("{}s", verb)
    }
}
