//! Error module tests

use crate::error::{Error, Result};

#[tokio::test]
async fn test_reference_error() {
    let error = Error::Reference("target 'abc' is not in the graph".to_string());
    assert_eq!(error.code(), "E001");
    assert_eq!(error.suggestion(), None);
    assert!(error.to_string().contains("abc"));
}

#[tokio::test]
async fn test_entity_not_found_error() {
    let error = Error::entity_not_found("mickey");
    assert_eq!(error.code(), "E002");
    assert!(error.is_not_found());
    assert_eq!(
        error.suggestion(),
        Some("loregraph entities <project>".to_string())
    );
    assert_eq!(error.to_string(), "Entity 'mickey' not found.");
}

#[tokio::test]
async fn test_job_not_found_error() {
    let error = Error::job_not_found("job-1");
    assert_eq!(error.code(), "E002");
    assert_eq!(
        error.suggestion(),
        Some("loregraph jobs <project>".to_string())
    );
}

#[tokio::test]
async fn test_path_not_found_error() {
    let error = Error::PathNotFound("a".to_string(), "b".to_string());
    assert_eq!(error.code(), "E003");
    assert!(error.is_not_found());
    assert!(error.to_string().contains("'a'"));
    assert!(error.to_string().contains("'b'"));
}

#[tokio::test]
async fn test_validation_error() {
    let error = Error::Validation("name must not be empty".to_string());
    assert_eq!(error.code(), "E004");
    assert!(!error.is_not_found());
    assert!(error.to_string().starts_with("Invalid input"));
}

#[tokio::test]
async fn test_extraction_errors() {
    let parse = Error::ExtractionParse("no JSON object found".to_string());
    assert_eq!(parse.code(), "E100");
    assert!(parse.suggestion().is_some());

    let timeout = Error::ExtractionTimeout(120);
    assert_eq!(timeout.code(), "E101");
    assert!(timeout.to_string().contains("120"));

    let cancelled = Error::JobCancelled("cancelled by request".to_string());
    assert_eq!(cancelled.code(), "E102");
}

#[tokio::test]
async fn test_conflict_error_hides_versions() {
    let error = Error::Conflict("proj-1".to_string());
    assert_eq!(error.code(), "E300");
    let message = error.to_string();
    assert!(message.contains("Please retry"));
    assert!(!message.contains("version"));
}

#[tokio::test]
async fn test_forbidden_error() {
    let error = Error::Forbidden("alice".to_string(), "proj-2".to_string());
    assert_eq!(error.code(), "E400");
    assert!(error.to_string().contains("alice"));
    assert!(error.to_string().contains("proj-2"));
}

#[tokio::test]
async fn test_rate_limited_error() {
    let error = Error::RateLimited(30);
    assert_eq!(error.code(), "E202");
    assert_eq!(error.suggestion(), None);
    assert!(error.to_string().contains("30"));
}

#[tokio::test]
async fn test_serialization_error_conversion() {
    let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
    let error: Error = parse.unwrap_err().into();
    assert_eq!(error.code(), "E302");
}

#[tokio::test]
async fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing scene");
    let error: Error = io.into();
    assert_eq!(error.code(), "E9999");
    assert!(error.to_string().contains("missing scene"));
}

#[tokio::test]
async fn test_result_alias_propagates() {
    fn inner() -> Result<()> {
        Err(Error::Other("boom".to_string()))
    }
    fn outer() -> Result<u32> {
        inner()?;
        Ok(1)
    }
    let error = outer().unwrap_err();
    assert_eq!(error.to_string(), "boom");
}
