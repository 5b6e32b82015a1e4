pub mod supabase;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::prompts::{Prompt, PromptDraft};

/// CRUD access to the remote prompt tables. Every call fails with the
/// transport/auth/validation error of the backend; nothing is retried here.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Cloud sync is enabled and credentials are present. No I/O.
    async fn is_available(&self) -> bool;
    /// Ids of every remote prompt.
    async fn list_ids(&self) -> Result<Vec<String>>;
    /// Every remote prompt with its tags, newest-created first.
    async fn list_all(&self) -> Result<Vec<Prompt>>;
    /// Insert a prompt; the server assigns id and timestamps.
    async fn create(&self, draft: &PromptDraft) -> Result<Prompt>;
    async fn update(&self, id: &str, draft: &PromptDraft) -> Result<Prompt>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Drop every tag link of `id`, then find-or-create each tag and link it.
    /// Not atomic: a failure part way leaves a subset attached.
    async fn replace_tags(&self, id: &str, tags: &[String]) -> Result<()>;
    /// Every tag name in the remote tag table, sorted.
    async fn list_tags(&self) -> Result<Vec<String>>;
}

/// A row of the remote `prompts` table.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRow {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromptRow {
    pub fn into_prompt(self, tags: Vec<String>) -> Prompt {
        Prompt {
            id: self.id.to_string(),
            title: self.title,
            content: self.content,
            tags,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Outcome of the settings page "test connection" action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// Reachable and authorised, but the tables have not been created.
    TablesMissing,
    InvalidKey,
    Unreachable,
    MissingCredentials,
    Failed(String),
}

impl ConnectionStatus {
    pub fn message(&self) -> String {
        match self {
            ConnectionStatus::Connected => "Connection successful".to_string(),
            ConnectionStatus::TablesMissing => {
                "Connected, but the tables do not exist yet. Run `init-schema` to create them".to_string()
            }
            ConnectionStatus::InvalidKey => "Connection failed: the key is invalid".to_string(),
            ConnectionStatus::Unreachable => {
                "Connection failed: the URL may be wrong or the network is down".to_string()
            }
            ConnectionStatus::MissingCredentials => {
                "Fill in the Supabase URL and anon key first".to_string()
            }
            ConnectionStatus::Failed(msg) => format!("Connection failed: {msg}"),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::TablesMissing)
    }
}

/// Idempotent schema for the remote tables.
pub const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS "uuid-ossp";

CREATE TABLE IF NOT EXISTS prompts (
  id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
  title TEXT NOT NULL,
  content TEXT NOT NULL,
  created_at TIMESTAMP WITH TIME ZONE DEFAULT timezone('utc'::text, now()),
  updated_at TIMESTAMP WITH TIME ZONE DEFAULT timezone('utc'::text, now())
);

CREATE TABLE IF NOT EXISTS tags (
  id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS prompt_tags (
  prompt_id UUID REFERENCES prompts(id) ON DELETE CASCADE,
  tag_id UUID REFERENCES tags(id) ON DELETE CASCADE,
  PRIMARY KEY (prompt_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_prompt_tags_prompt_id ON prompt_tags(prompt_id);
CREATE INDEX IF NOT EXISTS idx_prompt_tags_tag_id ON prompt_tags(tag_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_parses_postgrest_timestamps() {
        let row: PromptRow = serde_json::from_value(serde_json::json!({
            "id": "5f1c7a52-3a4b-4a8e-9d2e-1b2c3d4e5f60",
            "title": "A",
            "content": "x",
            "created_at": "2024-03-01T10:00:00.123456+00:00",
            "updated_at": "2024-03-02T10:00:00+00:00"
        }))
        .unwrap();

        let prompt = row.into_prompt(vec!["t1".into()]);
        assert_eq!(prompt.id, "5f1c7a52-3a4b-4a8e-9d2e-1b2c3d4e5f60");
        assert_eq!(prompt.tags, vec!["t1"]);
        assert!(prompt.updated_at > prompt.created_at);
    }

    #[test]
    fn row_rejects_non_uuid_id() {
        let parsed = serde_json::from_value::<PromptRow>(serde_json::json!({
            "id": "1700000000000",
            "title": "A",
            "content": "x",
            "created_at": "2024-03-01T10:00:00+00:00",
            "updated_at": "2024-03-01T10:00:00+00:00"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn schema_is_idempotent() {
        for line in SCHEMA_SQL.lines().filter(|l| l.starts_with("CREATE")) {
            assert!(line.contains("IF NOT EXISTS"), "not idempotent: {line}");
        }
    }

    #[test]
    fn missing_tables_counts_as_reachable() {
        assert!(ConnectionStatus::TablesMissing.is_success());
        assert!(!ConnectionStatus::InvalidKey.is_success());
    }
}
