use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PromptError;

/// Titles derived from captured selections are cut to this many characters.
const CAPTURE_TITLE_CHARS: usize = 50;

/// A stored snippet as it lives in the local `prompts` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prompt {
    /// Build a prompt that only exists locally, stamped with `now`.
    pub fn local(id: String, draft: PromptDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title,
            content: draft.content,
            tags: draft.tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Turn a text selection into a prompt: title is the first 50 characters
    /// (with an ellipsis when cut), content is the whole selection, no tags.
    pub fn from_selection(id: String, selection: &str, now: DateTime<Utc>) -> Result<Self, PromptError> {
        if selection.trim().is_empty() {
            return Err(PromptError::validation("content", "selection is empty"));
        }

        let mut title: String = selection.chars().take(CAPTURE_TITLE_CHARS).collect();
        if selection.chars().count() > CAPTURE_TITLE_CHARS {
            title.push_str("...");
        }

        Ok(Self {
            id,
            title,
            content: selection.to_string(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite the editable fields and bump `updated_at`; id and
    /// `created_at` are kept.
    pub fn apply_local_edit(&mut self, draft: PromptDraft, now: DateTime<Utc>) {
        self.title = draft.title;
        self.content = draft.content;
        self.tags = draft.tags;
        self.updated_at = now;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// The user-editable part of a prompt. Construction validates it, so a
/// `PromptDraft` always has a non-empty trimmed title and content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDraft {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl PromptDraft {
    pub fn new(
        title: impl AsRef<str>,
        content: impl AsRef<str>,
        tags: Vec<String>,
    ) -> Result<Self, PromptError> {
        let title = title.as_ref().trim();
        let content = content.as_ref().trim();

        if title.is_empty() {
            return Err(PromptError::validation("title", "title and content are required"));
        }
        if content.is_empty() {
            return Err(PromptError::validation("content", "title and content are required"));
        }

        Ok(Self {
            title: title.to_string(),
            content: content.to_string(),
            tags,
        })
    }

    /// Build a draft from raw form fields, where tags are a comma-separated
    /// string.
    pub fn from_form(title: &str, content: &str, tags_input: &str) -> Result<Self, PromptError> {
        Self::new(title, content, parse_tags(tags_input))
    }
}

impl From<&Prompt> for PromptDraft {
    fn from(prompt: &Prompt) -> Self {
        Self {
            title: prompt.title.clone(),
            content: prompt.content.clone(),
            tags: prompt.tags.clone(),
        }
    }
}

/// Split a comma-separated tag field. Order and duplicates are preserved;
/// blank entries are dropped.
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

/// Every distinct tag across `prompts`, in sorted order.
pub fn derive_tags(prompts: &[Prompt]) -> BTreeSet<String> {
    prompts
        .iter()
        .flat_map(|prompt| prompt.tags.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn prompt(id: &str, tags: &[&str]) -> Prompt {
        Prompt {
            id: id.to_string(),
            title: format!("title {id}"),
            content: format!("content {id}"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: ts(1_700_000_000),
            updated_at: ts(1_700_000_000),
        }
    }

    #[test]
    fn parse_tags_trims_and_drops_blanks() {
        assert_eq!(parse_tags(" rust, ,cli ,, rust "), vec!["rust", "cli", "rust"]);
        assert!(parse_tags("").is_empty());
        assert!(parse_tags(" , ").is_empty());
    }

    #[test]
    fn draft_rejects_blank_title() {
        let err = PromptDraft::new("   ", "body", vec![]).unwrap_err();
        assert!(matches!(err, PromptError::Validation { ref field, .. } if field == "title"));
    }

    #[test]
    fn draft_rejects_blank_content() {
        let err = PromptDraft::new("Title", "\n\t", vec![]).unwrap_err();
        assert!(matches!(err, PromptError::Validation { ref field, .. } if field == "content"));
    }

    #[test]
    fn draft_trims_fields() {
        let draft = PromptDraft::from_form("  Title ", " body\n", "a, b").unwrap();
        assert_eq!(draft.title, "Title");
        assert_eq!(draft.content, "body");
        assert_eq!(draft.tags, vec!["a", "b"]);
    }

    #[test]
    fn derive_tags_is_union_without_duplicates() {
        let prompts = vec![
            prompt("1", &["t1", "t2"]),
            prompt("2", &["t2", "t3", "t3"]),
            prompt("3", &[]),
        ];
        let tags: Vec<_> = derive_tags(&prompts).into_iter().collect();
        assert_eq!(tags, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn derive_tags_empty_list() {
        assert!(derive_tags(&[]).is_empty());
    }

    #[test]
    fn selection_title_is_cut_at_fifty_chars() {
        let text = "x".repeat(60);
        let prompt = Prompt::from_selection("1".into(), &text, ts(0)).unwrap();
        assert_eq!(prompt.title, format!("{}...", "x".repeat(50)));
        assert_eq!(prompt.content, text);
        assert!(prompt.tags.is_empty());
    }

    #[test]
    fn short_selection_keeps_full_title() {
        let prompt = Prompt::from_selection("1".into(), "short text", ts(0)).unwrap();
        assert_eq!(prompt.title, "short text");
    }

    #[test]
    fn blank_selection_is_rejected() {
        assert!(Prompt::from_selection("1".into(), "  ", ts(0)).is_err());
    }

    #[test]
    fn local_edit_keeps_identity() {
        let mut p = prompt("1", &["old"]);
        let draft = PromptDraft::new("New", "Body", vec!["new".into()]).unwrap();
        p.apply_local_edit(draft, ts(1_800_000_000));
        assert_eq!(p.id, "1");
        assert_eq!(p.created_at, ts(1_700_000_000));
        assert_eq!(p.updated_at, ts(1_800_000_000));
        assert_eq!(p.tags, vec!["new"]);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let value = serde_json::to_value(prompt("1", &["t1"])).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert!(value.get("created_at").is_none());
    }

    #[test]
    fn missing_field_is_rejected() {
        let raw = serde_json::json!({"id": "1", "title": "A", "content": "x"});
        assert!(serde_json::from_value::<Prompt>(raw).is_err());
    }
}
