use rusqlite::{OptionalExtension, params};

use mnemosyne_types::EnrichedContext;

use crate::db::Storage;
use crate::error::Result;

const UPSERT_CONTEXT: &str = "INSERT OR REPLACE INTO context_enrichment \
     (event_id, accessibility_tree_json, ocr_content, \
      vlm_description, user_intent, generated_wikilinks, generated_tags) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// Repository for `context_enrichment` operations.
pub struct ContextRepo<'a> {
    storage: &'a Storage,
}

impl<'a> ContextRepo<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Upsert the enrichment row for a single event.
    pub async fn update_event_context(
        &self,
        event_id: i64,
        context: &EnrichedContext,
    ) -> Result<()> {
        let wikilinks_json = if context.wikilinks.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&context.wikilinks)?)
        };
        let tags_json = if context.tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&context.tags)?)
        };

        let conn = self.storage.lock().await;
        conn.execute(
            UPSERT_CONTEXT,
            params![
                event_id,
                context.accessibility_tree,
                context.ocr_content,
                context.vlm_description,
                context.user_intent,
                wikilinks_json,
                tags_json,
            ],
        )?;

        tracing::debug!(event_id, "updated event context");
        Ok(())
    }

    /// Apply one group-level intent and tag set to every event id.
    pub async fn batch_insert_context(
        &self,
        event_ids: &[i64],
        user_intent: &str,
        tags: &[String],
    ) -> Result<usize> {
        if event_ids.is_empty() {
            return Ok(0);
        }

        let tags_json = serde_json::to_string(tags)?;
        let mut conn = self.storage.lock().await;
        let tx = conn.transaction()?;
        for event_id in event_ids {
            tx.execute(
                UPSERT_CONTEXT,
                params![event_id, None::<String>, None::<String>, None::<String>, user_intent, tags_json, tags_json],
            )?;
        }
        tx.commit()?;

        tracing::debug!(count = event_ids.len(), "batch inserted context");
        Ok(event_ids.len())
    }

    /// Fetch the enrichment row for an event, if present.
    pub async fn get(&self, event_id: i64) -> Result<Option<EnrichedContext>> {
        let conn = self.storage.lock().await;
        let row = conn
            .query_row(
                "SELECT accessibility_tree_json, ocr_content, vlm_description, \
                        user_intent, generated_wikilinks, generated_tags \
                 FROM context_enrichment WHERE event_id = ?1",
                params![event_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((tree, ocr, vlm, intent, wikilinks, tags)) = row else {
            return Ok(None);
        };

        Ok(Some(EnrichedContext {
            accessibility_tree: tree,
            ocr_content: ocr,
            vlm_description: vlm,
            user_intent: intent,
            wikilinks: decode_list(wikilinks),
            tags: decode_list(tags),
        }))
    }
}

fn decode_list(json: Option<String>) -> Vec<String> {
    json.and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}
