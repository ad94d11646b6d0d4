use serde::{Deserialize, Serialize};

/// Derived fields attached to an event; at most one row per event id.
///
/// Any subset may be null: the stream path stores intent and tags only,
/// the store path fills whatever the perception chain produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedContext {
    /// JSON-serialized accessibility tree.
    pub accessibility_tree: Option<String>,
    pub ocr_content: Option<String>,
    pub vlm_description: Option<String>,
    pub user_intent: Option<String>,
    pub wikilinks: Vec<String>,
    pub tags: Vec<String>,
}

impl EnrichedContext {
    /// Context carrying only group-level inference output (stream path).
    pub fn intent_only(intent: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            user_intent: Some(intent.into()),
            wikilinks: tags.clone(),
            tags,
            ..Self::default()
        }
    }
}
