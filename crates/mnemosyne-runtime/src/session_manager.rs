//! Session archival: summary generation, persistence, screenshot cleanup,
//! and knowledge-graph indexing for closed sessions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use mnemosyne_cognition::{IntentClient, extract_wikilinks};
use mnemosyne_graph::KnowledgeGraph;
use mnemosyne_store::Storage;
use mnemosyne_types::Session;

const MAX_CONCEPT_RELATIONSHIPS: usize = 5;
const SECONDARY_ANALYSIS_MIN_SUMMARY: usize = 30;

pub struct SessionManager {
    storage: Arc<Storage>,
    intent: Arc<IntentClient>,
    graph: Option<Arc<Mutex<KnowledgeGraph>>>,
    graph_path: PathBuf,
    min_session_sec: i64,
}

impl SessionManager {
    pub fn new(
        storage: Arc<Storage>,
        intent: Arc<IntentClient>,
        graph: Option<Arc<Mutex<KnowledgeGraph>>>,
        graph_path: PathBuf,
        min_session_sec: i64,
    ) -> Self {
        Self {
            storage,
            intent,
            graph,
            graph_path,
            min_session_sec,
        }
    }

    /// Archive a closed session. Micro-sessions are discarded outright: no
    /// row, no screenshot cleanup, no graph write.
    pub async fn archive(&self, mut session: Session) {
        if session.duration_seconds() < self.min_session_sec {
            tracing::debug!(
                duration = session.duration_seconds(),
                min = self.min_session_sec,
                "skipping micro-session"
            );
            return;
        }

        let summary = self
            .intent
            .summarize_session(
                session.duration_seconds() as f64 / 60.0,
                &session.primary_process,
                &session.primary_window,
                &session.window_transitions,
                session.avg_input_intensity,
                session.event_count(),
            )
            .await;
        session.tags = extract_wikilinks(&summary);
        session.activity_summary = Some(summary.clone());

        if let Err(err) = self.storage.sessions().insert(&session).await {
            tracing::error!(%err, "failed to archive session");
            return;
        }
        tracing::info!(
            process = %session.primary_process,
            duration = session.duration_seconds(),
            preview = mnemosyne_types::truncate_chars(&summary, 50),
            "session archived"
        );

        let cleaned = cleanup_screenshots(&session);
        if cleaned > 0 {
            tracing::debug!(cleaned, "removed screenshots after archival");
        }

        if let Some(graph) = &self.graph {
            if let Ok(mut graph) = graph.lock() {
                graph.record_session(&session);
            }
            self.run_secondary_analysis(&session, &summary).await;
        }
    }

    /// Deeper concept extraction for substantial sessions. Best-effort: any
    /// failure is logged and ignored.
    async fn run_secondary_analysis(&self, session: &Session, summary: &str) {
        if summary.len() <= SECONDARY_ANALYSIS_MIN_SUMMARY {
            return;
        }
        let Some(graph) = &self.graph else {
            return;
        };

        let Some(insights) = self
            .intent
            .secondary_analysis(
                summary,
                &session.primary_process,
                session.event_count(),
                session.duration_seconds() as f64 / 60.0,
            )
            .await
        else {
            return;
        };

        let mut added = 0;
        if let Ok(mut graph) = graph.lock() {
            for triple in insights
                .concept_relationships
                .iter()
                .take(MAX_CONCEPT_RELATIONSHIPS)
            {
                if let [a, relation, b] = triple.as_slice() {
                    graph.add_relationship(a, relation, b);
                    added += 1;
                }
            }
        }

        if added > 0 {
            tracing::info!(added, "added concept relationships from secondary analysis");
        }
    }

    /// Persist the knowledge graph next to the database.
    pub fn save_graph(&self) {
        let Some(graph) = &self.graph else {
            return;
        };

        let Ok(graph) = graph.lock() else {
            return;
        };
        match graph.save(&self.graph_path) {
            Ok(()) => {}
            Err(err) => tracing::warn!(%err, "failed to save knowledge graph"),
        }
    }
}

/// Unlink every screenshot referenced by the session's events. Failures are
/// logged at debug and ignored.
fn cleanup_screenshots(session: &Session) -> usize {
    let mut cleaned = 0;
    for event in &session.events {
        let Some(path) = &event.screenshot_path else {
            continue;
        };
        let path = Path::new(path);
        if path.exists() {
            match std::fs::remove_file(path) {
                Ok(()) => cleaned += 1,
                Err(err) => {
                    tracing::debug!(path = %path.display(), %err, "could not delete screenshot");
                }
            }
        }
    }
    cleaned
}
