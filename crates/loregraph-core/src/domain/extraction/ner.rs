//! Local named-entity recognition for scenes
//!
//! [`NerExtractor`] turns the typed spans of a [`SpanRecognizer`] into graph
//! candidates. Span labels are mapped onto [`EntityType`] (`PER`, `B-LOC`,
//! `org` and the like), repeated mentions are merged by normalised name with
//! a majority vote on the type, and sentence-level cues propose
//! relationships. Recall and precision are lower than the model-backed
//! extractor; the cost is zero.
//!
//! [`PatternRecognizer`] is the offline default:
//!
//! | Signal | Label |
//! |--------|-------|
//! | name starts with a title (`Captain`, `Lady`, ...) | character |
//! | name ends in an organisation word (`Guild`, `Council`, ...) | organization |
//! | name ends in a place word (`Castle`, `River`, ...) | location |
//! | mention follows a placement cue (`walked to`, `in`, ...) | location |
//! | anything else | character |
//!
//! Relationships: a character followed in the same sentence by a cued
//! location is `located_in` it, a character who `joined` an organisation is
//! `member_of` it, and characters sharing a sentence `know` each other.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use regex::{Match, Regex};
use tracing::debug;

use super::extractor::{ExtractionOutput, Extractor};
use super::job::ExtractorKind;
use crate::domain::graph::{BatchRelationship, Entity, EntityType, normalize_name};
use crate::error::{Error, Result};

const SENTENCE_PATTERN: &str = r#"[^.!?\n]+[.!?]*"#;

/// Words that start capitalised spans but are never names
const SKIP_WORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "What", "Which", "Where", "When", "Why", "How",
    "Who", "Whom", "I", "We", "You", "He", "She", "It", "They", "His", "Her", "Their", "Its",
    "My", "Our", "Your", "A", "An", "But", "And", "Or", "So", "Then", "For", "With", "From",
    "About", "After", "Before", "During", "Until", "If", "As", "At", "In", "On", "To", "Of",
    "Yes", "No", "Not", "Now", "Later", "Soon", "Still", "Once", "There", "Here", "Meanwhile",
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "January",
    "February", "March", "April", "May", "June", "July", "August", "September", "October",
    "November", "December", "Today", "Tomorrow", "Yesterday", "Chapter", "Scene", "Oh", "Ah",
];

/// Trailing words that mark an organisation
const ORGANIZATION_WORDS: &[&str] = &[
    "Guild", "Council", "Order", "Company", "Corporation", "Corp", "Inc", "Army", "Navy",
    "Brotherhood", "Sisterhood", "Alliance", "Federation", "Society", "Club", "Academy",
    "University", "School", "Church", "Bank", "Team", "Clan", "League", "Senate", "Court",
    "Legion", "Syndicate",
];

/// Trailing words that mark a place
const LOCATION_WORDS: &[&str] = &[
    "Castle", "Forest", "River", "Mountain", "Mountains", "Kingdom", "City", "Valley", "Sea",
    "Ocean", "Island", "Islands", "Lake", "Tower", "Street", "Road", "Village", "Town", "Hall",
    "Palace", "Temple", "Desert", "Bay", "Harbor", "Harbour", "Woods", "Hills", "Station",
    "Planet", "Empire", "Realm", "Keep", "Bridge", "Cave", "Caves", "Inn", "Tavern",
];

/// Honorifics that make a span a character
const TITLE_WORDS: &[&str] = &[
    "Mr", "Mrs", "Ms", "Miss", "Dr", "Sir", "Lady", "Lord", "King", "Queen", "Prince",
    "Princess", "Captain", "General", "Professor", "Father", "Mother", "Uncle", "Aunt",
    "Master",
];

const NAME_PATTERN: &str =
    r"\b[A-Z][a-z]+(?:['’-][A-Za-z]+)?\.?(?:\s+(?:of\s+the\s+|of\s+)?[A-Z][a-z]+(?:['’-][A-Za-z]+)?)*";

const PLACEMENT_CUE: &str = r"(?i)(?:\b(?:in|into|inside|near|within|across|through|reached|visited|entered|arrived\s+at|arrived\s+in)\s+|\b(?:walked|went|ran|flew|traveled|travelled|sailed|drove|rode|returned|moved|came|headed|journeyed|fled|hurried|marched|wandered|climbed|teleported)\s+(?:back\s+)?(?:to|into|toward|towards|onto)\s+)(?:the\s+)?$";

const MEMBERSHIP_CUE: &str =
    r"(?i)\b(?:joined|member\s+of|serves|served|leads|led|works\s+for|worked\s+for)\s+(?:the\s+)?$";

/// A labelled range of scene text, in byte offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Recognizer category, e.g. `PER`, `B-LOC` or `character`
    pub label: String,
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(label: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            label: label.into(),
            start,
            end,
        }
    }
}

/// Named-entity recognizer returning typed spans for a text
pub trait SpanRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<Span>;
}

/// Map a recognizer label onto an entity type
///
/// BIO prefixes are ignored. Returns `None` for categories with no
/// narrative counterpart.
pub fn entity_type_for_label(label: &str) -> Option<EntityType> {
    let label = label.trim();
    let label = label
        .strip_prefix("B-")
        .or_else(|| label.strip_prefix("I-"))
        .unwrap_or(label);

    EntityType::parse(label).or_else(|| match label.to_lowercase().as_str() {
        "fac" | "facility" => Some(EntityType::Location),
        "norp" => Some(EntityType::Organization),
        "product" | "work_of_art" => Some(EntityType::Object),
        "misc" => Some(EntityType::Concept),
        _ => None,
    })
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Other(format!("invalid NER pattern: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cue {
    None,
    Placement,
    Membership,
}

#[derive(Debug, Clone)]
struct CuePatterns {
    placement: Regex,
    membership: Regex,
}

impl CuePatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            placement: compile(PLACEMENT_CUE)?,
            membership: compile(MEMBERSHIP_CUE)?,
        })
    }

    /// Cue ending the sentence text that leads up to a mention
    fn classify(&self, before: &str) -> Cue {
        if self.placement.is_match(before) {
            Cue::Placement
        } else if self.membership.is_match(before) {
            Cue::Membership
        } else {
            Cue::None
        }
    }
}

/// Offline recognizer over capitalised spans and cue words
#[derive(Debug, Clone)]
pub struct PatternRecognizer {
    sentences: Regex,
    names: Regex,
    cues: CuePatterns,
}

impl PatternRecognizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sentences: compile(SENTENCE_PATTERN)?,
            names: compile(NAME_PATTERN)?,
            cues: CuePatterns::new()?,
        })
    }

    fn label(&self, name: &str, cue: Cue) -> EntityType {
        let first = name.split_whitespace().next().unwrap_or("");
        let last = name.split_whitespace().last().unwrap_or("");
        if TITLE_WORDS.contains(&first.trim_end_matches('.')) {
            EntityType::Character
        } else if ORGANIZATION_WORDS.contains(&last) {
            EntityType::Organization
        } else if LOCATION_WORDS.contains(&last) || cue == Cue::Placement {
            EntityType::Location
        } else {
            EntityType::Character
        }
    }
}

impl SpanRecognizer for PatternRecognizer {
    fn recognize(&self, text: &str) -> Vec<Span> {
        let mut spans = Vec::new();
        for sentence in self.sentences.find_iter(text) {
            let body = sentence.as_str();
            for m in self.names.find_iter(body) {
                let Some(range) = trim_span(m.as_str()) else {
                    continue;
                };
                let cue = self.cues.classify(&body[..m.start()]);
                let label = self.label(&m.as_str()[range.clone()], cue);
                let start = sentence.start() + m.start() + range.start;
                spans.push(Span::new(label.as_str(), start, start + range.len()));
            }
        }
        spans
    }
}

#[derive(Debug)]
struct Mention {
    key: String,
    start: usize,
}

#[derive(Debug)]
struct Candidate {
    name: String,
    mentions: u64,
    votes: Vec<(EntityType, u32)>,
}

impl Candidate {
    fn vote(&mut self, entity_type: EntityType) {
        match self.votes.iter_mut().find(|(t, _)| *t == entity_type) {
            Some((_, count)) => *count += 1,
            None => self.votes.push((entity_type, 1)),
        }
    }

    /// Most voted type; ties go to the type seen first
    fn entity_type(&self) -> EntityType {
        self.votes
            .iter()
            .fold(None, |best: Option<(EntityType, u32)>, &(t, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((t, n)),
            })
            .map(|(t, _)| t)
            .unwrap_or(EntityType::Character)
    }
}

/// Local extractor over a [`SpanRecognizer`]
#[derive(Clone)]
pub struct NerExtractor {
    recognizer: Arc<dyn SpanRecognizer>,
    sentences: Regex,
    cues: CuePatterns,
    fallback_type: EntityType,
}

impl std::fmt::Debug for NerExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NerExtractor")
            .field("fallback_type", &self.fallback_type)
            .finish()
    }
}

impl NerExtractor {
    /// Extractor over the built-in [`PatternRecognizer`]
    pub fn new() -> Result<Self> {
        Self::with_recognizer(Arc::new(PatternRecognizer::new()?))
    }

    /// Extractor over any span recognizer
    pub fn with_recognizer(recognizer: Arc<dyn SpanRecognizer>) -> Result<Self> {
        Ok(Self {
            recognizer,
            sentences: compile(SENTENCE_PATTERN)?,
            cues: CuePatterns::new()?,
            fallback_type: EntityType::Concept,
        })
    }

    /// Type given to spans whose label has no mapping
    pub fn with_fallback_type(mut self, entity_type: EntityType) -> Self {
        self.fallback_type = entity_type;
        self
    }

    /// Recognise entities and relationships in `text`
    pub fn recognize(&self, text: &str, scene_id: &str) -> ExtractionOutput {
        let mut spans = self.recognizer.recognize(text);
        spans.sort_by_key(|span| (span.start, span.end));

        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut mentions: Vec<Mention> = Vec::new();

        for span in &spans {
            let Some(raw) = text.get(span.start..span.end) else {
                debug!(label = %span.label, start = span.start, end = span.end, "Skipping span outside the scene text");
                continue;
            };
            let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                continue;
            }
            let key = normalize_name(&name);
            let entity_type = entity_type_for_label(&span.label).unwrap_or(self.fallback_type);

            let candidate = candidates.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                Candidate {
                    name,
                    mentions: 0,
                    votes: Vec::new(),
                }
            });
            candidate.mentions += 1;
            candidate.vote(entity_type);
            mentions.push(Mention {
                key,
                start: span.start,
            });
        }

        let types: HashMap<&str, EntityType> = candidates
            .iter()
            .map(|(key, c)| (key.as_str(), c.entity_type()))
            .collect();

        let mut relationships = Vec::new();
        let mut seen: HashSet<(String, String, &'static str)> = HashSet::new();
        let mut propose = |source: &str, target: &str, kind: &'static str| {
            if source == target || !seen.insert((source.to_string(), target.to_string(), kind)) {
                return;
            }
            relationships.push(BatchRelationship {
                source_name: candidates[source].name.clone(),
                target_name: candidates[target].name.clone(),
                relationship_type: kind.to_string(),
                properties: Default::default(),
                source_scene: Some(scene_id.to_string()),
            });
        };

        let mut next = 0;
        for sentence in self.sentences.find_iter(text) {
            let mut characters_so_far: Vec<&str> = Vec::new();
            while next < mentions.len() && mentions[next].start < sentence.end() {
                let mention = &mentions[next];
                next += 1;
                if mention.start < sentence.start() {
                    continue;
                }
                let key = mention.key.as_str();
                let cue = self.cue_before(text, &sentence, mention.start);
                match types[key] {
                    EntityType::Character => {
                        for earlier in &characters_so_far {
                            propose(*earlier, key, "knows");
                        }
                        characters_so_far.push(key);
                    }
                    EntityType::Location if cue == Cue::Placement => {
                        if let Some(subject) = characters_so_far.last() {
                            propose(*subject, key, "located_in");
                        }
                    }
                    EntityType::Organization if cue == Cue::Membership => {
                        if let Some(subject) = characters_so_far.last() {
                            propose(*subject, key, "member_of");
                        }
                    }
                    _ => {}
                }
            }
        }

        let entities = order
            .iter()
            .filter_map(|key| candidates.get(key))
            .map(|c| {
                Entity::new(c.name.clone(), c.entity_type())
                    .with_source_scene(scene_id)
                    .with_mentions(c.mentions)
            })
            .collect::<Vec<_>>();

        debug!(
            scene_id = %scene_id,
            spans = spans.len(),
            entities = entities.len(),
            relationships = relationships.len(),
            "Local recognition finished"
        );

        ExtractionOutput {
            entities,
            relationships,
            usage: None,
        }
    }

    fn cue_before(&self, text: &str, sentence: &Match<'_>, offset: usize) -> Cue {
        text.get(sentence.start()..offset)
            .map(|before| self.cues.classify(before))
            .unwrap_or(Cue::None)
    }
}

#[async_trait]
impl Extractor for NerExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Ner
    }

    async fn extract(&self, scene_text: &str, scene_id: &str) -> Result<ExtractionOutput> {
        Ok(self.recognize(scene_text, scene_id))
    }
}

/// Byte range of a capitalised span without leading skip words or the
/// trailing period
fn trim_span(span: &str) -> Option<Range<usize>> {
    let mut offset = 0;
    let mut start = None;
    for piece in span.split_inclusive(char::is_whitespace) {
        let word = piece.trim_end();
        if !word.is_empty() && !SKIP_WORDS.contains(&word.trim_end_matches('.')) {
            start = Some(offset);
            break;
        }
        offset += piece.len();
    }
    let start = start?;
    let end = span.trim_end().trim_end_matches('.').len();
    if end <= start {
        return None;
    }
    let name = &span[start..end];
    // A span reduced to a lone connective, e.g. "The of Rome", is not a name
    if name.chars().count() < 2 || name.starts_with("of ") {
        return None;
    }
    Some(start..end)
}
