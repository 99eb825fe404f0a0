//! SQLite implementation of the GraphDocumentRepository
//!
//! Each project's graph is one JSON document row guarded by a version
//! counter and a last-updated stamp. The attribute index is rewritten in the
//! same transaction as the document it describes.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::domain::graph::repository::{index_entries, normalize_attribute_value};
use crate::domain::graph::{
    AttributeMatch, GraphDocument, GraphDocumentRepository, StoredGraph, VersionToken,
};
use crate::error::{Error, Result};

/// SQLite implementation of the graph document repository
#[derive(Clone)]
pub struct SqliteGraphDocumentRepository {
    pool: SqlitePool,
}

impl SqliteGraphDocumentRepository {
    /// Create a new SQLite graph document repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write_index(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        document: &GraphDocument,
    ) -> Result<()> {
        let project_id = document.project_id();
        sqlx::query("DELETE FROM graph_attribute_index WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut **tx)
            .await?;

        for (entity_id, attribute, value) in index_entries(document) {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO graph_attribute_index (project_id, entity_id, attribute, value)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(project_id)
            .bind(&entity_id)
            .bind(&attribute)
            .bind(&value)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

/// Timestamps are compared as stored text, so they are written at a fixed precision
fn stamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", raw, e)))
}

/// A fresh stamp strictly after the previous one, at stored precision
fn next_stamp(previous: Option<&DateTime<Utc>>) -> Result<DateTime<Utc>> {
    let now = parse_stamp(&stamp(&Utc::now()))?;
    Ok(match previous {
        Some(prev) if now <= *prev => *prev + chrono::Duration::microseconds(1),
        _ => now,
    })
}

#[async_trait]
impl GraphDocumentRepository for SqliteGraphDocumentRepository {
    // ========== Document Operations ==========

    async fn load(&self, project_id: &str) -> Result<Option<StoredGraph>> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT project_id, document, version, revision, last_updated
             FROM graph_documents WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_stored()).transpose()
    }

    async fn current_version(&self, project_id: &str) -> Result<Option<VersionToken>> {
        let row: Option<TokenRow> = sqlx::query_as(
            "SELECT version, revision, last_updated FROM graph_documents WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_token()).transpose()
    }

    async fn save(
        &self,
        document: &GraphDocument,
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken> {
        let project_id = document.project_id().to_string();
        let json = serde_json::to_string(document)?;
        let last_updated = next_stamp(expected.map(|t| &t.last_updated))?;
        let revision = document.metadata.revision;

        let mut tx = self.pool.begin().await?;

        let version = match expected {
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO graph_documents (
                        project_id, document, version, revision,
                        entity_count, relationship_count, last_updated
                    ) VALUES (?, ?, 1, ?, ?, ?, ?)
                    ON CONFLICT(project_id) DO NOTHING
                    "#,
                )
                .bind(&project_id)
                .bind(&json)
                .bind(revision as i64)
                .bind(document.nodes.len() as i64)
                .bind(document.edges.len() as i64)
                .bind(stamp(&last_updated))
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(Error::Conflict(project_id));
                }
                1
            }
            Some(token) => {
                let result = sqlx::query(
                    r#"
                    UPDATE graph_documents SET
                        document = ?,
                        version = version + 1,
                        revision = ?,
                        entity_count = ?,
                        relationship_count = ?,
                        last_updated = ?
                    WHERE project_id = ? AND version = ? AND last_updated = ?
                    "#,
                )
                .bind(&json)
                .bind(revision as i64)
                .bind(document.nodes.len() as i64)
                .bind(document.edges.len() as i64)
                .bind(stamp(&last_updated))
                .bind(&project_id)
                .bind(token.version)
                .bind(stamp(&token.last_updated))
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    debug!(project_id = %project_id, version = token.version, "Stale version token");
                    return Err(Error::Conflict(project_id));
                }
                token.version + 1
            }
        };

        Self::write_index(&mut tx, document).await?;
        tx.commit().await?;

        debug!(
            project_id = %project_id,
            version,
            revision,
            entities = document.nodes.len(),
            "Graph document saved"
        );

        Ok(VersionToken {
            version,
            last_updated,
            revision,
        })
    }

    async fn delete(&self, project_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM graph_attribute_index WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM graph_documents WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(project_id = %project_id, "Graph document deleted");
        }
        Ok(deleted)
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT project_id FROM graph_documents ORDER BY project_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ========== Index Operations ==========

    async fn find_by_attribute(&self, attribute: &str, value: &str) -> Result<Vec<AttributeMatch>> {
        let rows: Vec<AttributeRow> = sqlx::query_as(
            r#"
            SELECT project_id, entity_id, attribute, value
            FROM graph_attribute_index
            WHERE attribute = ? AND value = ?
            ORDER BY project_id, entity_id
            "#,
        )
        .bind(attribute)
        .bind(normalize_attribute_value(value))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| AttributeMatch {
                project_id: r.project_id,
                entity_id: r.entity_id,
                attribute: r.attribute,
                value: r.value,
            })
            .collect())
    }
}

// ========== Database Row Types ==========

#[derive(Debug, FromRow)]
struct DocumentRow {
    project_id: String,
    document: String,
    version: i64,
    revision: i64,
    last_updated: String,
}

impl DocumentRow {
    fn into_stored(self) -> Result<StoredGraph> {
        let document = GraphDocument::from_json(&self.document)?;
        if document.project_id() != self.project_id {
            return Err(Error::Other(format!(
                "Stored document for '{}' names project '{}'",
                self.project_id,
                document.project_id()
            )));
        }
        Ok(StoredGraph {
            document,
            token: VersionToken {
                version: self.version,
                last_updated: parse_stamp(&self.last_updated)?,
                revision: self.revision.max(0) as u64,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct TokenRow {
    version: i64,
    revision: i64,
    last_updated: String,
}

impl TokenRow {
    fn into_token(self) -> Result<VersionToken> {
        Ok(VersionToken {
            version: self.version,
            last_updated: parse_stamp(&self.last_updated)?,
            revision: self.revision.max(0) as u64,
        })
    }
}

#[derive(Debug, FromRow)]
struct AttributeRow {
    project_id: String,
    entity_id: String,
    attribute: String,
    value: String,
}
