//! Config module tests

use crate::config::{Config, GraphConfig};
use crate::domain::extraction::ExtractorKind;
use crate::domain::graph::RelationshipTypePolicy;

#[test]
fn test_config_default() {
    let config = Config::default();

    // LLM config defaults
    assert!(config.llm.api_key.is_none());
    assert_eq!(config.llm.default_model, "anthropic/claude-sonnet-4-20250514");
    assert_eq!(config.llm.timeout_secs, 60);

    // Extraction config defaults
    assert_eq!(config.extraction.max_concurrent_jobs, 4);
    assert_eq!(config.extraction.job_timeout_secs, 120);
    assert_eq!(config.extraction.default_extractor, ExtractorKind::Llm);

    // Graph config defaults
    assert!(config.graph.relationship_types.contains(&"located_in".to_string()));
    assert!(config.graph.allow_unknown_relationship_types);
    assert_eq!(config.graph.community_seed, 42);
    assert_eq!(config.graph.persist_retry_attempts, 5);

    assert_eq!(config.realtime.channel_capacity, 256);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_uses_defaults() {
    let contents = r#"
[extraction]
max_concurrent_jobs = 8
default_extractor = "ner"

[graph]
allow_unknown_relationship_types = false
"#;
    let config: Config = toml::from_str(contents).expect("Should parse partial config");

    assert_eq!(config.extraction.max_concurrent_jobs, 8);
    assert_eq!(config.extraction.default_extractor, ExtractorKind::Ner);
    assert_eq!(config.extraction.job_timeout_secs, 120);
    assert!(!config.graph.allow_unknown_relationship_types);
    assert_eq!(config.graph.community_seed, 42);
    assert_eq!(config.llm.default_model, Config::default().llm.default_model);
}

#[test]
fn test_toml_round_trip() {
    let mut config = Config::default();
    config.set("graph.community_seed", "7").unwrap();
    config.set("extraction.default_extractor", "ner").unwrap();

    let serialized = toml::to_string_pretty(&config).expect("Should serialize");
    let parsed: Config = toml::from_str(&serialized).expect("Should deserialize");

    assert_eq!(parsed.graph.community_seed, 7);
    assert_eq!(parsed.extraction.default_extractor, ExtractorKind::Ner);
}

#[test]
fn test_set_and_get_values() {
    let mut config = Config::default();

    config.set("llm.temperature", "0.3").unwrap();
    assert_eq!(config.get("llm.temperature").unwrap(), "0.3");

    config.set("extraction.max_concurrent_jobs", "2").unwrap();
    assert_eq!(config.get("extraction.max_concurrent_jobs").unwrap(), "2");

    config
        .set("graph.relationship_types", "Knows, Fights With,located in")
        .unwrap();
    assert_eq!(
        config.graph.relationship_types,
        vec!["knows", "fights_with", "located_in"]
    );

    config.set("storage.database_path", "/tmp/lore.db").unwrap();
    assert_eq!(config.get("storage.database_path").unwrap(), "/tmp/lore.db");
}

#[test]
fn test_set_rejects_invalid_values() {
    let mut config = Config::default();

    assert!(config.set("llm.temperature", "3.5").is_err());
    assert!(config.set("extraction.max_concurrent_jobs", "0").is_err());
    assert!(config.set("extraction.default_extractor", "spacy").is_err());
    assert!(config.set("graph.allow_unknown_relationship_types", "maybe").is_err());
    assert!(config.set("realtime.channel_capacity", "0").is_err());
    assert!(config.set("llm.base_url", "ftp://example.com").is_err());
    assert!(config.set("no.such.key", "1").is_err());
}

#[test]
fn test_api_key_cannot_be_stored() {
    let mut config = Config::default();
    assert!(config.set("llm.api_key", "sk-secret").is_err());

    config.llm.api_key = Some("sk-test-key".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn test_list_contains_every_section() {
    let config = Config::default();
    let listed = config.list().unwrap();
    let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();

    assert!(keys.contains(&"llm.default_model"));
    assert!(keys.contains(&"extraction.job_timeout_secs"));
    assert!(keys.contains(&"graph.community_seed"));
    assert!(keys.contains(&"storage.database_path"));
    assert!(keys.contains(&"realtime.channel_capacity"));
}

#[test]
fn test_relationship_policy_from_config() {
    let mut graph = GraphConfig::default();
    let open = RelationshipTypePolicy::from_config(&graph);
    assert_eq!(open.check("Located In").unwrap(), "located_in");
    assert_eq!(open.check("rivals").unwrap(), "rivals");
    assert!(open.check("   ").is_err());

    graph.allow_unknown_relationship_types = false;
    let restricted = RelationshipTypePolicy::from_config(&graph);
    assert!(restricted.check("rivals").is_err());
    assert_eq!(restricted.check("KNOWS").unwrap(), "knows");
}
