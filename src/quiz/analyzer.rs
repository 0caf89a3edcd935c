use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::process::{Command, Stdio};

use log::{debug, warn};
use thiserror::Error;

/// Sentences with this many tokens or fewer are not used as question sources.
pub const MIN_SENTENCE_TOKENS: usize = 5;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Linguistic analyzer unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

pub trait LinguisticAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Result<Vec<Sentence>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityCategory {
    Person,
    Organization,
    /// Nationalities, religious or political groups
    Group,
    Location,
    Product,
    Event,
}

impl EntityCategory {
    /// Maps OntoNotes (spaCy, Stanza) and CoNLL labels onto the categories that
    /// can become quiz keywords. Dates, numbers, MISC and the like are not candidates.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "PERSON" | "PER" => Some(EntityCategory::Person),
            "ORG" | "ORGANIZATION" | "ORGANISATION" => Some(EntityCategory::Organization),
            "NORP" | "NATIONALITY" | "GROUP" => Some(EntityCategory::Group),
            "GPE" | "LOC" | "LOCATION" | "FAC" => Some(EntityCategory::Location),
            "PRODUCT" => Some(EntityCategory::Product),
            "EVENT" => Some(EntityCategory::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRole {
    Subject,
    Object,
    Attribute,
    Other,
}

impl DependencyRole {
    /// Accepts both UD (`nsubj:pass`, `obj`) and spaCy (`nsubjpass`, `dobj`, `attr`) relations.
    pub fn from_deprel(deprel: &str) -> Self {
        let base = deprel.split(':').next().unwrap_or(deprel);
        match base.to_ascii_lowercase().as_str() {
            "nsubj" | "nsubjpass" | "csubj" => DependencyRole::Subject,
            "obj" | "dobj" => DependencyRole::Object,
            "attr" => DependencyRole::Attribute,
            _ => DependencyRole::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub form: String,
    pub lemma: String,
    /// Index of the head token within the sentence, `None` for the root.
    pub head: Option<usize>,
    pub role: DependencyRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub text: String,
    pub category: EntityCategory,
    /// Token span, end exclusive
    pub start: usize,
    pub end: usize,
}

impl Entity {
    pub fn contains(&self, token: usize) -> bool {
        (self.start..self.end).contains(&token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub tokens: Vec<Token>,
    pub entities: Vec<Entity>,
}

impl Sentence {
    pub fn children(&self, head: usize) -> impl Iterator<Item = (usize, &Token)> {
        self.tokens
            .iter()
            .enumerate()
            .filter(move |(_, t)| t.head == Some(head))
    }

    pub fn is_meaningful(&self) -> bool {
        self.tokens.len() > MIN_SENTENCE_TOKENS
    }
}

/// Runs an external tagger/parser (UDPipe, a Stanza or spaCy wrapper script, ...)
/// that reads plain text on stdin and prints CoNLL-U on stdout.
/// Named entities are read from the `ner=` key of the MISC column.
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Only checks that the program can be started at all.
    pub fn check(&self) -> Result<()> {
        Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
            .map_err(|e| {
                AnalyzerError::Unavailable(format!("failed to start `{}`: {}", self.program, e))
            })
    }
}

impl LinguisticAnalyzer for CommandAnalyzer {
    fn analyze(&self, text: &str) -> Result<Vec<Sentence>> {
        debug!("Running analyzer `{}` on {} bytes", self.program, text.len());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AnalyzerError::Unavailable(format!("failed to start `{}`: {}", self.program, e))
            })?;

        // Feed stdin from another thread so a large parse output can't block us.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AnalyzerError::Unavailable("analyzer stdin is closed".to_string()))?;
        let input = text.to_owned();
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child.wait_with_output()?;
        if let Ok(Err(e)) = writer.join() {
            warn!("Analyzer did not read all of its input: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalyzerError::Unavailable(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let mut conllu = tempfile::tempfile()?;
        conllu.write_all(&output.stdout)?;
        conllu.seek(SeekFrom::Start(0))?;
        let sentences = parse_conllu_file(conllu);

        if !sentences.is_empty() && !has_ner_annotations(&String::from_utf8_lossy(&output.stdout)) {
            warn!(
                "`{}` printed no `ner=` annotations, no keywords can be found. \
                 Point ANALYZER_COMMAND at a parser that tags named entities",
                self.program
            );
        }
        Ok(sentences)
    }
}

/// Whether any token line of a CoNLL-U document has a `ner=` key in its MISC column,
/// even if every tag is `O`.
pub fn has_ner_annotations(conllu: &str) -> bool {
    conllu
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split('\t').nth(9))
        .flat_map(|misc| misc.split('|'))
        .filter_map(|field| field.split_once('='))
        .any(|(key, _)| key.trim().eq_ignore_ascii_case("ner"))
}

/// Reads an annotated CoNLL-U document, skipping sentences that fail to parse.
pub fn parse_conllu_file(file: File) -> Vec<Sentence> {
    rs_conllu::parse_file(file)
        .filter_map(|sentence| sentence.ok())
        .map(|sentence| convert_sentence(&sentence))
        .filter(|sentence| !sentence.tokens.is_empty())
        .collect()
}

fn convert_sentence(sentence: &rs_conllu::Sentence) -> Sentence {
    // Multiword ranges and empty nodes carry no dependency edges of their own
    let words = sentence
        .tokens
        .iter()
        .filter_map(|t| match t.id {
            rs_conllu::TokenID::Single(id) => Some((id, t)),
            _ => None,
        })
        .collect::<Vec<_>>();

    let index_of: HashMap<usize, usize> = words
        .iter()
        .enumerate()
        .map(|(index, (id, _))| (*id, index))
        .collect();

    let tokens = words
        .iter()
        .map(|(_, t)| Token {
            form: t.form.clone(),
            lemma: t.lemma.clone().unwrap_or_else(|| t.form.to_lowercase()),
            head: match t.head {
                Some(rs_conllu::TokenID::Single(head)) => index_of.get(&head).copied(),
                _ => None,
            },
            role: t
                .deprel
                .as_deref()
                .map(DependencyRole::from_deprel)
                .unwrap_or(DependencyRole::Other),
        })
        .collect::<Vec<_>>();

    let tags = words
        .iter()
        .map(|(_, t)| t.misc.as_deref().and_then(ner_tag))
        .collect::<Vec<_>>();
    let forms = tokens.iter().map(|t| t.form.as_str()).collect::<Vec<_>>();
    let entities = collect_entities(&forms, &tags);

    let text = sentence
        .meta
        .iter()
        .find(|m| m.starts_with("text = "))
        .map(|m| m.trim_start_matches("text = ").trim().to_string())
        .unwrap_or_else(|| forms.join(" "));

    Sentence {
        text,
        tokens,
        entities,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NerTag {
    prefix: Option<char>,
    label: String,
}

/// `start_char=0|ner=B-ORG` -> `B` + `ORG`. `O` means outside of any entity.
fn ner_tag(misc: &str) -> Option<NerTag> {
    let value = misc
        .split('|')
        .filter_map(|field| field.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("ner"))
        .map(|(_, value)| value.trim())?;
    if value.is_empty() || value == "O" || value == "_" {
        return None;
    }
    match value.split_once('-') {
        Some((prefix, label)) if prefix.len() == 1 => Some(NerTag {
            prefix: prefix.chars().next().map(|c| c.to_ascii_uppercase()),
            label: label.to_string(),
        }),
        _ => Some(NerTag {
            prefix: None,
            label: value.to_string(),
        }),
    }
}

/// Groups BIO/BIOES tags into entity spans. A bare label continues a span of the same label.
fn collect_entities(forms: &[&str], tags: &[Option<NerTag>]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut open: Option<(usize, String)> = None;

    let mut close = |open: &mut Option<(usize, String)>, end: usize| {
        if let Some((start, label)) = open.take() {
            if let Some(category) = EntityCategory::from_label(&label) {
                entities.push(Entity {
                    text: forms[start..end].join(" "),
                    category,
                    start,
                    end,
                });
            }
        }
    };

    for (i, tag) in tags.iter().enumerate() {
        let Some(tag) = tag else {
            close(&mut open, i);
            continue;
        };
        let continues = matches!(&open, Some((_, label)) if *label == tag.label);
        match tag.prefix {
            Some('B') | Some('S') | Some('U') => {
                close(&mut open, i);
                open = Some((i, tag.label.clone()));
            }
            _ if !continues => {
                close(&mut open, i);
                open = Some((i, tag.label.clone()));
            }
            _ => {}
        }
        if matches!(tag.prefix, Some('S') | Some('U') | Some('E') | Some('L')) {
            close(&mut open, i + 1);
        }
    }
    close(&mut open, tags.len());

    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(prefix: Option<char>, label: &str) -> Option<NerTag> {
        Some(NerTag {
            prefix,
            label: label.to_string(),
        })
    }

    #[test]
    fn reads_ner_from_misc() {
        assert_eq!(
            ner_tag("start_char=0|end_char=3|ner=B-ORG"),
            tag(Some('B'), "ORG")
        );
        assert_eq!(ner_tag("NER=PERSON"), tag(None, "PERSON"));
        assert_eq!(ner_tag("ner=O"), None);
        assert_eq!(ner_tag("SpaceAfter=No"), None);
    }

    #[test]
    fn groups_bio_tags_into_spans() {
        let forms = ["The", "World", "Health", "Organization", "met", "Darwin", "on", "Monday"];
        let tags = vec![
            None,
            tag(Some('B'), "ORG"),
            tag(Some('I'), "ORG"),
            tag(Some('E'), "ORG"),
            None,
            tag(Some('S'), "PERSON"),
            None,
            tag(Some('S'), "DATE"),
        ];
        let entities = collect_entities(&forms, &tags);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].text, "World Health Organization");
        assert_eq!(entities[0].category, EntityCategory::Organization);
        assert_eq!((entities[0].start, entities[0].end), (1, 4));
        assert_eq!(entities[1].text, "Darwin");
        assert_eq!(entities[1].category, EntityCategory::Person);
    }

    #[test]
    fn bare_labels_continue_matching_spans() {
        let forms = ["New", "York", "Paris"];
        let tags = vec![tag(None, "GPE"), tag(None, "GPE"), tag(Some('B'), "GPE")];
        let entities = collect_entities(&forms, &tags);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].text, "New York");
        assert_eq!(entities[1].text, "Paris");
    }

    #[test]
    fn maps_dependency_relations() {
        assert_eq!(DependencyRole::from_deprel("nsubj"), DependencyRole::Subject);
        assert_eq!(DependencyRole::from_deprel("nsubj:pass"), DependencyRole::Subject);
        assert_eq!(DependencyRole::from_deprel("dobj"), DependencyRole::Object);
        assert_eq!(DependencyRole::from_deprel("obj"), DependencyRole::Object);
        assert_eq!(DependencyRole::from_deprel("attr"), DependencyRole::Attribute);
        assert_eq!(DependencyRole::from_deprel("amod"), DependencyRole::Other);
    }

    #[test]
    fn category_labels() {
        assert_eq!(EntityCategory::from_label("norp"), Some(EntityCategory::Group));
        assert_eq!(EntityCategory::from_label("GPE"), Some(EntityCategory::Location));
        assert_eq!(EntityCategory::from_label("CARDINAL"), None);
    }

    #[test]
    fn converts_conllu_document() {
        let conllu = "# sent_id = 1\n\
# text = Pfizer produces the vaccine in Belgium.\n\
1\tPfizer\tPfizer\tPROPN\tNNP\t_\t2\tnsubj\t_\tner=S-ORG\n\
2\tproduces\tproduce\tVERB\tVBZ\t_\t0\troot\t_\tner=O\n\
3\tthe\tthe\tDET\tDT\t_\t4\tdet\t_\tner=O\n\
4\tvaccine\tvaccine\tNOUN\tNN\t_\t2\tobj\t_\tner=O\n\
5\tin\tin\tADP\tIN\t_\t6\tcase\t_\tner=O\n\
6\tBelgium\tBelgium\tPROPN\tNNP\t_\t2\tobl\t_\tner=S-GPE|SpaceAfter=No\n\
7\t.\t.\tPUNCT\t.\t_\t2\tpunct\t_\tner=O\n\
\n";
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(conllu.as_bytes()).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let sentences = parse_conllu_file(file);
        assert_eq!(sentences.len(), 1);
        let sentence = &sentences[0];
        assert_eq!(sentence.text, "Pfizer produces the vaccine in Belgium.");
        assert_eq!(sentence.tokens.len(), 7);
        assert!(sentence.is_meaningful());
        assert_eq!(sentence.tokens[0].head, Some(1));
        assert_eq!(sentence.tokens[0].role, DependencyRole::Subject);
        assert_eq!(sentence.tokens[1].head, None);
        assert_eq!(sentence.tokens[1].lemma, "produce");
        assert_eq!(
            sentence.children(1).map(|(i, _)| i).collect::<Vec<_>>(),
            vec![0, 3, 5, 6]
        );
        let names = sentence.entities.iter().map(|e| e.text.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Pfizer", "Belgium"]);
    }

    #[test]
    fn detects_documents_without_ner() {
        let tagged = "# text = Pfizer grows.\n1\tPfizer\tPfizer\tPROPN\t_\t_\t2\tnsubj\t_\tner=O\n";
        let plain = "# text = ner=B-ORG in a comment\n\
1\tPfizer\tPfizer\tPROPN\t_\t_\t2\tnsubj\t_\tSpaceAfter=No\n\
2\tgrows\tgrow\tVERB\t_\t_\t0\troot\t_\t_\n";
        assert!(has_ner_annotations(tagged));
        assert!(!has_ner_annotations(plain));
        assert!(!has_ner_annotations(""));
    }

    #[test]
    fn missing_program_is_unavailable() {
        let analyzer = CommandAnalyzer::new("definitely-not-an-nlp-tool".to_string(), Vec::new());
        assert!(matches!(analyzer.check(), Err(AnalyzerError::Unavailable(_))));
        assert!(matches!(
            analyzer.analyze("Some text."),
            Err(AnalyzerError::Unavailable(_))
        ));
    }
}
