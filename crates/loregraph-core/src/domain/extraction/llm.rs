//! Entity extraction from scenes using a remote language model
//!
//! The model is asked for a strict JSON payload. Responses wrapped in code
//! fences or followed by commentary are tolerated; a response with no
//! recoverable payload is an `ExtractionParse` error, never an empty result.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::extractor::{ExtractionOutput, ExtractionUsage, Extractor};
use super::job::ExtractorKind;
use crate::config::ExtractionConfig;
use crate::domain::graph::{BatchRelationship, Entity, EntityType, Properties};
use crate::error::{Error, Result};
use crate::llm::{CompletionService, Message};

/// Longest scene excerpt sent to the model, in characters
const MAX_SCENE_CHARS: usize = 12_000;

/// Extractor backed by a [`CompletionService`]
#[derive(Clone)]
pub struct LlmExtractor {
    service: Arc<dyn CompletionService>,
    model: Option<String>,
    max_entities: usize,
    max_relationships: usize,
}

impl std::fmt::Debug for LlmExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmExtractor")
            .field("model", &self.model())
            .field("max_entities", &self.max_entities)
            .field("max_relationships", &self.max_relationships)
            .finish()
    }
}

impl LlmExtractor {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        let defaults = ExtractionConfig::default();
        Self {
            service,
            model: None,
            max_entities: defaults.max_entities_per_scene,
            max_relationships: defaults.max_relationships_per_scene,
        }
    }

    /// Apply per-scene caps from configuration
    pub fn with_config(mut self, config: &ExtractionConfig) -> Self {
        self.max_entities = config.max_entities_per_scene;
        self.max_relationships = config.max_relationships_per_scene;
        self
    }

    /// Use a specific model instead of the service default
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.service.default_model())
    }

    fn build_prompt(&self, scene_text: &str, scene_id: &str) -> String {
        let (text, dropped) = truncate_content(scene_text, MAX_SCENE_CHARS);
        if dropped > 0 {
            warn!(
                scene_id = %scene_id,
                kept = MAX_SCENE_CHARS,
                dropped,
                "Scene longer than one prompt allows; extracting from its start"
            );
        }

        format!(
            r#"Extract the narrative knowledge graph from this scene.

## Scene: {scene_id}

{text}

## Entity types
- character: a person, creature or any acting agent
- location: a place, region, building or world
- object: a physical item
- concept: an idea, power or belief
- event: something that happens
- organization: a group, faction or institution
- theme: a recurring motif

## Relationship types
Use short snake_case verbs such as knows, conflicts_with, located_in, owns,
member_of, loves, works_for, parent_of, part_of, participates_in, allied_with.

Return at most {max_entities} entities and {max_relationships} relationships as JSON:
{{
  "entities": [
    {{"name": "...", "type": "character", "properties": {{"key": "value"}}, "mentions": 1}}
  ],
  "relationships": [
    {{"source": "entity name", "target": "entity name", "type": "knows", "properties": {{}}}}
  ]
}}"#,
            scene_id = scene_id,
            text = text,
            max_entities = self.max_entities,
            max_relationships = self.max_relationships,
        )
    }

    /// Turn a model response into candidates for `scene_id`
    pub fn parse_response(&self, response: &str, scene_id: &str) -> Result<ExtractionOutput> {
        let payload = parse_payload(response)?;

        let mut entities = Vec::new();
        for extracted in payload.entities.into_iter().take(self.max_entities) {
            let Some(entity_type) = EntityType::parse(&extracted.entity_type) else {
                debug!(name = %extracted.name, entity_type = %extracted.entity_type, "Dropping entity of unknown type");
                continue;
            };
            if extracted.name.trim().is_empty() {
                continue;
            }
            let mut entity = Entity::new(extracted.name.trim(), entity_type)
                .with_source_scene(scene_id)
                .with_mentions(extracted.mentions.unwrap_or(1).max(1));
            entity.properties = extracted.properties;
            if let Some(description) = extracted.description {
                entity
                    .properties
                    .entry("description".to_string())
                    .or_insert(serde_json::Value::String(description));
            }
            entities.push(entity);
        }

        let relationships = payload
            .relationships
            .into_iter()
            .take(self.max_relationships)
            .filter(|r| !r.source.trim().is_empty() && !r.target.trim().is_empty())
            .map(|r| {
                let mut properties = r.properties;
                if let Some(description) = r.description {
                    properties
                        .entry("description".to_string())
                        .or_insert(serde_json::Value::String(description));
                }
                BatchRelationship {
                    source_name: r.source.trim().to_string(),
                    target_name: r.target.trim().to_string(),
                    relationship_type: r.relationship_type,
                    properties,
                    source_scene: Some(scene_id.to_string()),
                }
            })
            .collect();

        Ok(ExtractionOutput {
            entities,
            relationships,
            usage: None,
        })
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Llm
    }

    async fn extract(&self, scene_text: &str, scene_id: &str) -> Result<ExtractionOutput> {
        info!(scene_id = %scene_id, model = %self.model(), "Extracting entities with language model");

        let messages = vec![
            Message::system(EXTRACTION_SYSTEM_PROMPT),
            Message::user(self.build_prompt(scene_text, scene_id)),
        ];

        let response = self
            .service
            .complete(messages, self.model.as_deref())
            .await?;

        let mut output = self.parse_response(&response.content, scene_id)?;
        output.usage = Some(ExtractionUsage {
            model: response.model.clone(),
            tokens: response.usage(),
        });

        info!(
            scene_id = %scene_id,
            entities = output.entities.len(),
            relationships = output.relationships.len(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Model extraction finished"
        );

        Ok(output)
    }
}

/// Response structure requested from the model
#[derive(Debug, Deserialize)]
struct LlmExtractionResponse {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    properties: Properties,
    description: Option<String>,
    mentions: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelationship {
    source: String,
    target: String,
    #[serde(rename = "type")]
    relationship_type: String,
    #[serde(default)]
    properties: Properties,
    description: Option<String>,
}

/// Recover the JSON payload from a model response
fn parse_payload(response: &str) -> Result<LlmExtractionResponse> {
    let json_str = extract_json_from_response(response);

    let value: serde_json::Value = serde_json::from_str(&json_str).map_err(|e| {
        warn!(error = %e, "Extraction response is not JSON");
        Error::ExtractionParse(format!("invalid JSON: {}", e))
    })?;

    let has_payload = value
        .as_object()
        .is_some_and(|o| o.contains_key("entities") || o.contains_key("relationships"));
    if !has_payload {
        return Err(Error::ExtractionParse(
            "response has no entities or relationships".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| {
        warn!(error = %e, "Extraction payload has the wrong shape");
        Error::ExtractionParse(format!("unexpected payload: {}", e))
    })
}

/// System prompt for scene extraction
const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert literary analyst building a knowledge graph of a story.

Your task is to identify the characters, locations, objects, concepts, events, organizations and themes in a scene, and the relationships between them.

Guidelines:
1. Use the name the story uses most often for each entity
2. Use the most specific entity type that applies
3. Only relate entities that appear in your entity list
4. Record stable facts as properties (e.g. species, title, role)

Return your analysis as valid JSON only, with no additional text or explanation."#;

/// Truncate content to at most `max_chars` characters
/// Cut `content` to `max_chars`, returning the excerpt and the number of
/// characters dropped
fn truncate_content(content: &str, max_chars: usize) -> (String, usize) {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => (
            format!("{}...", &content[..cut]),
            content[cut..].chars().count(),
        ),
        None => (content.to_string(), 0),
    }
}

/// Extract JSON from a response that might contain markdown or other text
fn extract_json_from_response(response: &str) -> String {
    // Fenced ```json block
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim().to_string();
        }
    }

    // Any fenced block
    if let Some(start) = response.find("```") {
        let potential_start = start + 3;
        if let Some(newline) = response[potential_start..].find('\n') {
            let json_start = potential_start + newline + 1;
            if let Some(end) = response[json_start..].find("```") {
                return response[json_start..json_start + end].trim().to_string();
            }
        }
    }

    // Outermost braces
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            return response[start..=end].to_string();
        }
    }

    response.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResponse;
    use std::sync::Mutex;

    struct CannedService {
        reply: String,
        prompts: Mutex<Vec<Vec<Message>>>,
    }

    impl CannedService {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionService for CannedService {
        fn default_model(&self) -> &str {
            "canned/model"
        }

        async fn complete(&self, messages: Vec<Message>, model: Option<&str>) -> Result<LlmResponse> {
            self.prompts.lock().unwrap().push(messages);
            Ok(LlmResponse::text(model.unwrap_or("canned/model"), self.reply.clone())
                .with_tokens(1200, 300))
        }
    }

    const GOOD_REPLY: &str = r#"Here is the graph:
```json
{
  "entities": [
    {"name": "Mickey", "type": "character", "properties": {"species": "mouse"}},
    {"name": "Mars", "type": "place", "description": "The red planet"},
    {"name": "Hyperdrive", "type": "gadget"}
  ],
  "relationships": [
    {"source": "Mickey", "target": "Mars", "type": "traveled to"}
  ]
}
```
Let me know if you need more."#;

    #[tokio::test]
    async fn test_extract_parses_fenced_payload() {
        let service = CannedService::new(GOOD_REPLY);
        let extractor = LlmExtractor::new(service.clone());

        let output = extractor
            .extract("Mickey walked to Mars.", "scene-1")
            .await
            .unwrap();

        assert_eq!(output.entities.len(), 2);
        assert_eq!(output.entities[0].name, "Mickey");
        assert_eq!(output.entities[0].properties["species"], "mouse");
        assert_eq!(output.entities[0].source_scenes, vec!["scene-1"]);
        assert_eq!(output.entities[1].entity_type, EntityType::Location);
        assert_eq!(output.entities[1].properties["description"], "The red planet");
        assert_eq!(output.relationships.len(), 1);
        assert_eq!(output.relationships[0].source_scene.as_deref(), Some("scene-1"));

        let usage = output.usage.unwrap();
        assert_eq!(usage.model, "canned/model");
        assert_eq!(usage.tokens.input_tokens, 1200);

        let prompts = service.prompts.lock().unwrap();
        assert!(prompts[0][1].content.contains("Mickey walked to Mars."));
        assert!(prompts[0][1].content.contains("scene-1"));
    }

    #[tokio::test]
    async fn test_extract_uses_configured_model() {
        let service = CannedService::new(r#"{"entities": []}"#);
        let extractor = LlmExtractor::new(service).with_model("openai/gpt-4o-mini");

        let output = extractor.extract("Nothing happens.", "s").await.unwrap();
        assert!(output.is_empty());
        assert_eq!(output.usage.unwrap().model, "openai/gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_unparseable_response_is_an_error() {
        let service = CannedService::new("I could not find any characters, sorry.");
        let extractor = LlmExtractor::new(service);

        let result = extractor.extract("text", "s").await;
        assert!(matches!(result, Err(Error::ExtractionParse(_))));
    }

    #[test]
    fn test_json_without_payload_keys_is_an_error() {
        let extractor = LlmExtractor::new(CannedService::new(""));
        let result = extractor.parse_response(r#"{"answer": 42}"#, "s");
        assert!(matches!(result, Err(Error::ExtractionParse(_))));
    }

    #[test]
    fn test_caps_are_applied() {
        let config = ExtractionConfig {
            max_entities_per_scene: 1,
            max_relationships_per_scene: 0,
            ..ExtractionConfig::default()
        };
        let extractor = LlmExtractor::new(CannedService::new("")).with_config(&config);
        let output = extractor.parse_response(GOOD_REPLY, "s").unwrap();
        assert_eq!(output.entities.len(), 1);
        assert!(output.relationships.is_empty());
    }

    #[test]
    fn test_extract_json_from_response() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_from_response(fenced), "{\"a\": 1}");

        let generic = "```\n{\"a\": 2}\n```";
        assert_eq!(extract_json_from_response(generic), "{\"a\": 2}");

        let trailing = "{\"a\": 3} and some commentary";
        assert_eq!(extract_json_from_response(trailing), "{\"a\": 3}");

        assert_eq!(extract_json_from_response("no json"), "no json");
    }

    #[test]
    fn test_long_scene_is_cut_in_prompt() {
        let extractor = LlmExtractor::new(CannedService::new(""));
        let scene = format!("{}Epilogue", "a".repeat(MAX_SCENE_CHARS));

        let prompt = extractor.build_prompt(&scene, "long");
        assert!(!prompt.contains("Epilogue"));
        assert!(prompt.contains("aaaa..."));
    }

    #[test]
    fn test_truncate_content_respects_char_boundaries() {
        assert_eq!(truncate_content("short", 10), ("short".to_string(), 0));
        assert_eq!(truncate_content("héllo wörld", 5), ("héllo...".to_string(), 6));
    }
}
