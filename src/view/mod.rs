use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};

use crate::prompts::Prompt;

/// Label of the facet that clears the tag filter.
pub const ALL_TAGS_LABEL: &str = "All";

/// The two places prompts are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewVariant {
    /// Compact list in stored order.
    Popup,
    /// Full list, most recently edited first, with timestamps.
    Manager,
}

impl ViewVariant {
    /// Characters of content shown per prompt before cutting.
    pub fn content_limit(self) -> usize {
        match self {
            ViewVariant::Popup => 400,
            ViewVariant::Manager => 600,
        }
    }
}

/// Active tag filter plus free-text search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptQuery {
    pub active_tag: Option<String>,
    pub search: Option<String>,
}

impl PromptQuery {
    pub fn new(active_tag: Option<String>, search: Option<String>) -> Self {
        Self {
            active_tag: active_tag.filter(|t| !t.is_empty()),
            search: search.filter(|q| !q.is_empty()),
        }
    }

    /// Tag is an exact inclusion test; search is a case-insensitive substring
    /// of the title, the content or any tag.
    pub fn matches(&self, prompt: &Prompt) -> bool {
        if let Some(tag) = &self.active_tag {
            if !prompt.has_tag(tag) {
                return false;
            }
        }

        match &self.search {
            Some(query) => {
                let query = query.to_lowercase();
                prompt.title.to_lowercase().contains(&query)
                    || prompt.content.to_lowercase().contains(&query)
                    || prompt.tags.iter().any(|t| t.to_lowercase().contains(&query))
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFacet {
    pub label: String,
    pub active: bool,
}

/// Prompts to show, in display order.
pub fn visible_prompts<'a>(
    prompts: &'a [Prompt],
    query: &PromptQuery,
    variant: ViewVariant,
) -> Vec<&'a Prompt> {
    let mut visible: Vec<&Prompt> = prompts.iter().filter(|p| query.matches(p)).collect();
    if variant == ViewVariant::Manager {
        // Stable, so equal timestamps keep list order.
        visible.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
    visible
}

/// Cut `content` to `limit` characters, appending `...` when anything was cut.
pub fn truncate_content(content: &str, limit: usize) -> String {
    match content.char_indices().nth(limit) {
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
        None => content.to_string(),
    }
}

/// "All" followed by every tag alphabetically. Exactly one entry is active.
pub fn tag_facets(tags: &BTreeSet<String>, active_tag: Option<&str>) -> Vec<TagFacet> {
    let mut facets = Vec::with_capacity(tags.len() + 1);
    facets.push(TagFacet {
        label: ALL_TAGS_LABEL.to_string(),
        active: active_tag.is_none(),
    });
    facets.extend(tags.iter().map(|tag| TagFacet {
        label: tag.clone(),
        active: active_tag == Some(tag.as_str()),
    }));
    facets
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn render_facets(facets: &[TagFacet]) -> String {
    facets
        .iter()
        .map(|f| if f.active { format!("[{}]", f.label) } else { f.label.clone() })
        .collect::<Vec<_>>()
        .join("  ")
}

/// Plain-text listing of the visible prompts.
pub fn render_prompts(prompts: &[Prompt], query: &PromptQuery, variant: ViewVariant) -> String {
    let visible = visible_prompts(prompts, query, variant);
    if visible.is_empty() {
        return "No prompts found\n".to_string();
    }

    let mut out = String::new();
    for prompt in visible {
        let _ = writeln!(out, "{}  ({})", prompt.title, prompt.id);
        if !prompt.tags.is_empty() {
            let _ = writeln!(out, "  tags: {}", prompt.tags.join(", "));
        }
        if variant == ViewVariant::Manager {
            let _ = writeln!(
                out,
                "  created {}  updated {}",
                local_time(prompt.created_at),
                local_time(prompt.updated_at)
            );
        }
        for line in truncate_content(&prompt.content, variant.content_limit()).lines() {
            let _ = writeln!(out, "  | {line}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prompt(id: &str, title: &str, content: &str, tags: &[&str], updated: i64) -> Prompt {
        Prompt {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            updated_at: Utc.timestamp_opt(updated, 0).unwrap(),
        }
    }

    fn sample() -> Vec<Prompt> {
        vec![
            prompt("1", "Summarise", "Summarise this text", &["writing"], 100),
            prompt("2", "Refactor", "Refactor the function", &["code", "rust"], 300),
            prompt("3", "Review", "Review the diff", &["code"], 200),
        ]
    }

    fn ids(prompts: &[&Prompt]) -> Vec<String> {
        prompts.iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn tag_filter_is_exact_inclusion() {
        let prompts = sample();
        let query = PromptQuery::new(Some("code".into()), None);
        assert_eq!(ids(&visible_prompts(&prompts, &query, ViewVariant::Popup)), vec!["2", "3"]);

        let partial = PromptQuery::new(Some("cod".into()), None);
        assert!(visible_prompts(&prompts, &partial, ViewVariant::Popup).is_empty());
    }

    #[test]
    fn search_matches_tag_case_insensitively() {
        let p = prompt("1", "Title", "Body", &["FOO-bar"], 0);
        assert!(PromptQuery::new(None, Some("foo".into())).matches(&p));
    }

    #[test]
    fn search_covers_title_and_content() {
        let prompts = sample();
        let by_title = PromptQuery::new(None, Some("REVIEW".into()));
        assert_eq!(ids(&visible_prompts(&prompts, &by_title, ViewVariant::Popup)), vec!["3"]);
        let by_content = PromptQuery::new(None, Some("function".into()));
        assert_eq!(ids(&visible_prompts(&prompts, &by_content, ViewVariant::Popup)), vec!["2"]);
    }

    #[test]
    fn tag_and_search_combine() {
        let prompts = sample();
        let query = PromptQuery::new(Some("code".into()), Some("diff".into()));
        assert_eq!(ids(&visible_prompts(&prompts, &query, ViewVariant::Popup)), vec!["3"]);
    }

    #[test]
    fn empty_strings_mean_no_filter() {
        let query = PromptQuery::new(Some(String::new()), Some(String::new()));
        assert_eq!(query, PromptQuery::default());
    }

    #[test]
    fn manager_sorts_by_updated_desc_popup_keeps_order() {
        let prompts = sample();
        let all = PromptQuery::default();
        assert_eq!(ids(&visible_prompts(&prompts, &all, ViewVariant::Manager)), vec!["2", "3", "1"]);
        assert_eq!(ids(&visible_prompts(&prompts, &all, ViewVariant::Popup)), vec!["1", "2", "3"]);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_content("abcdef", 3), "abc...");
        assert_eq!(truncate_content("abc", 3), "abc");
        assert_eq!(truncate_content("ééééé", 2), "éé...");
    }

    #[test]
    fn content_limits_per_variant() {
        let long = "x".repeat(700);
        let popup = truncate_content(&long, ViewVariant::Popup.content_limit());
        let manager = truncate_content(&long, ViewVariant::Manager.content_limit());
        assert_eq!(popup.chars().count(), 403);
        assert_eq!(manager.chars().count(), 603);
    }

    #[test]
    fn facets_start_with_all_then_alphabetical() {
        let tags: BTreeSet<String> = ["rust", "code", "writing"].iter().map(|s| s.to_string()).collect();
        let facets = tag_facets(&tags, Some("rust"));
        let labels: Vec<_> = facets.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["All", "code", "rust", "writing"]);
        assert_eq!(facets.iter().filter(|f| f.active).count(), 1);
        assert!(facets[2].active);

        assert!(tag_facets(&tags, None)[0].active);
        assert_eq!(render_facets(&tag_facets(&tags, None)), "[All]  code  rust  writing");
    }

    #[test]
    fn render_reports_empty_result() {
        let query = PromptQuery::new(None, Some("nothing matches".into()));
        assert_eq!(render_prompts(&sample(), &query, ViewVariant::Manager), "No prompts found\n");
    }

    #[test]
    fn manager_render_shows_timestamps() {
        let out = render_prompts(&sample(), &PromptQuery::default(), ViewVariant::Manager);
        assert!(out.contains("created "));
        assert!(out.starts_with("Refactor  (2)"));

        let popup = render_prompts(&sample(), &PromptQuery::default(), ViewVariant::Popup);
        assert!(!popup.contains("created "));
        assert!(popup.starts_with("Summarise  (1)"));
    }
}
