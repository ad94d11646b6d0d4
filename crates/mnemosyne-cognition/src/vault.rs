//! Wikilink augmentation against a local vault of notes.
//!
//! The vault scan keeps note names (file stems) in memory; augmentation
//! wraps known entities in `[[...]]`, longest entity first so partial names
//! never shadow full ones, without touching text that is already linked.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static WIKILINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("static wikilink pattern"));

pub struct VaultIndex {
    /// Entities sorted longest-first, each with its case-insensitive matcher.
    entities: Vec<(Regex, String)>,
}

impl VaultIndex {
    /// Index with no known entities; augmentation is a no-op.
    pub fn empty() -> Self {
        Self { entities: Vec::new() }
    }

    /// Scan a vault directory recursively for `*.md` note names.
    pub fn load(vault_path: &Path) -> Self {
        if !vault_path.exists() {
            tracing::warn!(path = %vault_path.display(), "vault not found");
            return Self::empty();
        }

        let mut names: Vec<String> = walkdir::WalkDir::new(vault_path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "md"))
            .filter_map(|entry| {
                entry
                    .path()
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();

        names.sort_by_key(|name| std::cmp::Reverse(name.len()));
        names.dedup();

        let entities = names
            .into_iter()
            .filter_map(|name| {
                Regex::new(&format!("(?i){}", regex::escape(&name)))
                    .ok()
                    .map(|re| (re, name))
            })
            .collect::<Vec<_>>();

        tracing::info!(entities = entities.len(), "loaded vault entities");
        Self { entities }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Wrap known entities in `[[...]]`. Existing links and text inside
    /// freshly inserted links are left alone.
    pub fn augment(&self, text: &str) -> String {
        if self.entities.is_empty() {
            return text.to_string();
        }

        // (segment, frozen): frozen segments are links and never re-matched.
        let mut segments: Vec<(String, bool)> = split_on_links(text);

        for (pattern, entity) in &self.entities {
            let mut next = Vec::with_capacity(segments.len());
            for (segment, frozen) in segments {
                if frozen {
                    next.push((segment, true));
                    continue;
                }

                let mut last = 0;
                for found in pattern.find_iter(&segment) {
                    if found.start() > last {
                        next.push((segment[last..found.start()].to_string(), false));
                    }
                    next.push((format!("[[{entity}]]"), true));
                    last = found.end();
                }
                if last < segment.len() {
                    next.push((segment[last..].to_string(), false));
                }
            }
            segments = next;
        }

        segments.into_iter().map(|(s, _)| s).collect()
    }
}

fn split_on_links(text: &str) -> Vec<(String, bool)> {
    let mut segments = Vec::new();
    let mut last = 0;
    for found in WIKILINK.find_iter(text) {
        if found.start() > last {
            segments.push((text[last..found.start()].to_string(), false));
        }
        segments.push((found.as_str().to_string(), true));
        last = found.end();
    }
    if last < text.len() {
        segments.push((text[last..].to_string(), false));
    }
    segments
}

/// Deduplicated `[[...]]` terms in first-occurrence order.
pub fn extract_wikilinks(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    WIKILINK
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_with(names: &[&str]) -> VaultIndex {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(format!("{name}.md")), "note").unwrap();
        }
        VaultIndex::load(dir.path())
    }

    #[test]
    fn missing_vault_is_empty() {
        let index = VaultIndex::load(Path::new("/nonexistent/vault"));
        assert!(index.is_empty());
        assert_eq!(index.augment("anything"), "anything");
    }

    #[test]
    fn augments_known_entity_case_insensitively() {
        let index = vault_with(&["Redis Streams"]);
        assert_eq!(
            index.augment("reading about redis streams today"),
            "reading about [[Redis Streams]] today"
        );
    }

    #[test]
    fn longest_entity_wins_over_prefix() {
        let index = vault_with(&["Redis", "Redis Streams"]);
        let out = index.augment("learning Redis Streams and Redis basics");
        assert_eq!(out, "learning [[Redis Streams]] and [[Redis]] basics");
    }

    #[test]
    fn already_linked_text_is_untouched() {
        let index = vault_with(&["Redis"]);
        assert_eq!(
            index.augment("already [[Redis]] linked"),
            "already [[Redis]] linked"
        );
    }

    #[test]
    fn extract_wikilinks_dedups_in_order() {
        let links = extract_wikilinks("[[b]] then [[a]] then [[b]] again");
        assert_eq!(links, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn extract_wikilinks_empty_text() {
        assert!(extract_wikilinks("no links here").is_empty());
    }
}
