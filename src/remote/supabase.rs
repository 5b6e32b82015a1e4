use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{ConnectionStatus, PromptRow, RemoteClient, SCHEMA_SQL};
use crate::error::PromptError;
use crate::prompts::{Prompt, PromptDraft};
use crate::settings::CloudSyncSettings;

/// PostgREST codes meaning "relation/row missing" rather than a real failure.
const MISSING_TABLE_CODES: &[&str] = &["PGRST116", "PGRST204", "PGRST205", "42P01"];
const SCHEMA_RPC: &str = "rpc/pgcrypto_extensions";

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct TagName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagLinkRow {
    tags: Option<TagName>,
}

/// `RemoteClient` over a Supabase project's REST endpoint.
pub struct SupabaseClient {
    client: Client,
    settings: CloudSyncSettings,
}

impl SupabaseClient {
    pub fn new(client: Client, settings: CloudSyncSettings) -> Self {
        Self { client, settings }
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.settings.supabase.url.trim().trim_end_matches('/');
        format!("{base}/rest/v1/{path}")
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let key = self.settings.supabase.anon_key.trim();
        self.client
            .request(method, self.endpoint(path))
            .header("apikey", key)
            .bearer_auth(key)
    }

    fn ensure_available(&self) -> Result<()> {
        if !self.settings.is_usable() {
            return Err(PromptError::RemoteUnavailable.into());
        }
        Ok(())
    }

    async fn tags_for(&self, prompt_id: &str) -> Result<Vec<String>> {
        let resp = self
            .request(Method::GET, "prompt_tags")
            .query(&[("select", "tags(name)".to_string()), ("prompt_id", format!("eq.{prompt_id}"))])
            .send()
            .await
            .context("failed to fetch prompt tags")?;
        let resp = ensure_success(resp, &format!("fetching tags of {prompt_id}")).await?;

        let links: Vec<TagLinkRow> = resp.json().await.context("failed to parse prompt tags")?;
        Ok(links
            .into_iter()
            .filter_map(|link| link.tags.map(|t| t.name))
            .collect())
    }

    async fn find_or_create_tag(&self, name: &str) -> Result<Uuid> {
        let resp = self
            .request(Method::GET, "tags")
            .query(&[("select", "id".to_string()), ("name", format!("eq.{name}"))])
            .send()
            .await
            .context("failed to look up tag")?;
        let resp = ensure_success(resp, &format!("looking up tag {name:?}")).await?;
        let existing: Vec<IdRow> = resp.json().await.context("failed to parse tag lookup")?;
        if let Some(row) = existing.into_iter().next() {
            return Ok(row.id);
        }

        let resp = self
            .request(Method::POST, "tags")
            .header("Prefer", "return=representation")
            .json(&json!([{ "name": name }]))
            .send()
            .await
            .context("failed to create tag")?;
        let resp = ensure_success(resp, &format!("creating tag {name:?}")).await?;
        let created: Vec<IdRow> = resp.json().await.context("failed to parse created tag")?;
        created
            .into_iter()
            .next()
            .map(|row| row.id)
            .context("Supabase returned no row for created tag")
    }

    /// Probe the `prompts` table with the configured credentials.
    pub async fn test_connection(&self) -> ConnectionStatus {
        if !self.settings.supabase.has_credentials() {
            return ConnectionStatus::MissingCredentials;
        }

        let resp = match self
            .request(Method::GET, "prompts")
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                tracing::warn!(error = %e, "Supabase unreachable");
                return ConnectionStatus::Unreachable;
            }
            Err(e) => return ConnectionStatus::Failed(e.to_string()),
        };

        let status = resp.status();
        if status.is_success() {
            return ConnectionStatus::Connected;
        }

        let body: Value = resp.json().await.unwrap_or_default();
        let code = body["code"].as_str().unwrap_or_default();
        let message = body["message"].as_str().unwrap_or("unknown error").to_string();

        if MISSING_TABLE_CODES.contains(&code) || status == StatusCode::NOT_FOUND {
            ConnectionStatus::TablesMissing
        } else if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || message.to_lowercase().contains("invalid token")
        {
            ConnectionStatus::InvalidKey
        } else {
            ConnectionStatus::Failed(format!("{status}: {message}"))
        }
    }

    /// Create the remote tables. Tries the schema RPC first and falls back
    /// to posting the SQL to the REST root.
    pub async fn init_schema(&self) -> Result<()> {
        if !self.settings.supabase.has_credentials() {
            bail!("Supabase URL and anon key are required");
        }

        let rpc = self
            .request(Method::POST, SCHEMA_RPC)
            .json(&json!({ "query_text": SCHEMA_SQL }))
            .send()
            .await
            .context("failed to call schema RPC")?;
        if rpc.status().is_success() {
            tracing::info!("remote schema initialized via RPC");
            return Ok(());
        }
        tracing::warn!(status = %rpc.status(), "schema RPC failed, falling back to REST root");

        let resp = self
            .request(Method::POST, "")
            .json(&json!({ "query": SCHEMA_SQL }))
            .send()
            .await
            .context("failed to post schema SQL")?;
        let status = resp.status();
        if status.is_success() {
            tracing::info!("remote schema initialized via REST root");
            return Ok(());
        }

        let body: Value = resp.json().await.unwrap_or_default();
        let msg = body["error"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .unwrap_or("Failed to initialize database");
        if msg.contains("permission denied") {
            bail!(
                "insufficient privileges: the anon key must be allowed to create tables, \
                 or ask a database administrator to create them ({msg})"
            );
        }
        bail!("schema initialization failed with {status}: {msg}")
    }
}

async fn ensure_success(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Supabase API error {status} {what}: {body}");
    }
    Ok(resp)
}

#[async_trait]
impl RemoteClient for SupabaseClient {
    async fn is_available(&self) -> bool {
        self.settings.is_usable()
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        let resp = self
            .request(Method::GET, "prompts")
            .query(&[("select", "id")])
            .send()
            .await
            .context("failed to fetch prompt ids")?;
        let resp = ensure_success(resp, "fetching prompt ids").await?;
        let rows: Vec<IdRow> = resp.json().await.context("failed to parse prompt ids")?;
        Ok(rows.into_iter().map(|row| row.id.to_string()).collect())
    }

    async fn list_all(&self) -> Result<Vec<Prompt>> {
        self.ensure_available()?;
        let resp = self
            .request(Method::GET, "prompts")
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await
            .context("failed to fetch prompts")?;
        let resp = ensure_success(resp, "fetching prompts").await?;
        let rows: Vec<PromptRow> = resp.json().await.context("failed to parse prompts")?;

        let mut prompts = Vec::with_capacity(rows.len());
        for row in rows {
            let tags = self.tags_for(&row.id.to_string()).await?;
            prompts.push(row.into_prompt(tags));
        }
        Ok(prompts)
    }

    async fn create(&self, draft: &PromptDraft) -> Result<Prompt> {
        self.ensure_available()?;
        let resp = self
            .request(Method::POST, "prompts")
            .header("Prefer", "return=representation")
            .json(&json!([{ "title": draft.title, "content": draft.content }]))
            .send()
            .await
            .context("failed to create prompt")?;
        let resp = ensure_success(resp, "creating prompt").await?;
        let row = resp
            .json::<Vec<PromptRow>>()
            .await
            .context("failed to parse created prompt")?
            .into_iter()
            .next()
            .context("Supabase returned no row for created prompt")?;

        let id = row.id.to_string();
        if !draft.tags.is_empty() {
            self.replace_tags(&id, &draft.tags).await?;
        }
        tracing::debug!(id = %id, "created remote prompt");
        Ok(row.into_prompt(draft.tags.clone()))
    }

    async fn update(&self, id: &str, draft: &PromptDraft) -> Result<Prompt> {
        self.ensure_available()?;
        let resp = self
            .request(Method::PATCH, "prompts")
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({
                "title": draft.title,
                "content": draft.content,
                "updated_at": Utc::now().to_rfc3339(),
            }))
            .send()
            .await
            .context("failed to update prompt")?;
        let resp = ensure_success(resp, &format!("updating prompt {id}")).await?;
        let row = resp
            .json::<Vec<PromptRow>>()
            .await
            .context("failed to parse updated prompt")?
            .into_iter()
            .next()
            .with_context(|| format!("remote prompt {id} not found"))?;

        self.replace_tags(id, &draft.tags).await?;
        Ok(row.into_prompt(draft.tags.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_available()?;
        let resp = self
            .request(Method::DELETE, "prompts")
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await
            .context("failed to delete prompt")?;
        ensure_success(resp, &format!("deleting prompt {id}")).await?;
        Ok(())
    }

    async fn replace_tags(&self, id: &str, tags: &[String]) -> Result<()> {
        self.ensure_available()?;
        let resp = self
            .request(Method::DELETE, "prompt_tags")
            .query(&[("prompt_id", format!("eq.{id}"))])
            .send()
            .await
            .context("failed to clear prompt tags")?;
        ensure_success(resp, &format!("clearing tags of {id}")).await?;

        for name in tags {
            let tag_id = self.find_or_create_tag(name).await?;
            let resp = self
                .request(Method::POST, "prompt_tags")
                .json(&json!([{ "prompt_id": id, "tag_id": tag_id }]))
                .send()
                .await
                .context("failed to link tag")?;
            ensure_success(resp, &format!("linking tag {name:?} to {id}")).await?;
        }
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        let resp = self
            .request(Method::GET, "tags")
            .query(&[("select", "name"), ("order", "name")])
            .send()
            .await
            .context("failed to fetch tags")?;
        let resp = ensure_success(resp, "fetching tags").await?;
        let rows: Vec<TagName> = resp.json().await.context("failed to parse tags")?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }
}
