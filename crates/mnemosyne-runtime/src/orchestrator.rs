//! Lifecycle owner: initialization in leaves-first order, the 30-second
//! periodic loop, and the reverse-order shutdown path.
//!
//! The cycle is the error boundary. Nothing thrown inside a cycle escapes
//! the loop; per-group failures leave the group unacknowledged so the next
//! cycle replays it.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::sync::watch;

use mnemosyne_cognition::{EventContext, IntentClient, VaultIndex};
use mnemosyne_core::{Sanitizer, graph_path};
use mnemosyne_engine::{FingerprintSuppressor, SessionTracker};
use mnemosyne_graph::KnowledgeGraph;
use mnemosyne_perception::{
    ImageSource, NullUiTreeSource, OcrEngine, OllamaVisionBackend, PerceptionPipeline,
    UiTreeExtractor, VRAM_LIMIT_SKIPPED, VisionAgent, VisionRequest,
};
use mnemosyne_store::Storage;
use mnemosyne_stream::{StreamConsumer, StreamProvider};
use mnemosyne_types::{EnrichedContext, EventGroup, SessionEvent, truncate_chars};

use crate::config::Config;
use crate::guard::SystemGuard;
use crate::session_manager::SessionManager;

const HISTORY_WINDOW_SEC: i64 = 60;
const HISTORY_TAIL: usize = 3;
const GROUP_VISION_PROMPT: &str = "Describe this user interface";
// With the 30s cycle period this saves the graph roughly every 10 minutes.
const GRAPH_SAVE_INTERVAL_CYCLES: u64 = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleReport {
    pub groups: usize,
    pub events_processed: usize,
    pub skipped_by_guard: bool,
}

pub struct Orchestrator {
    config: Config,
    guard: SystemGuard,
    storage: Arc<Storage>,
    stream: Option<StreamConsumer>,
    pipeline: PerceptionPipeline,
    intent: Arc<IntentClient>,
    tracker: SessionTracker,
    suppressor: FingerprintSuppressor,
    session_manager: SessionManager,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    /// Bring every subsystem up, leaves first. Only the row store is fatal;
    /// broker, model endpoint, and graph degrade with a warning.
    pub async fn initialize(config: Config, shutdown: watch::Receiver<bool>) -> Result<Self> {
        tracing::info!("initializing mnemosyne brain");

        let guard = SystemGuard::new(config.vram_threshold_mb);

        std::fs::create_dir_all(&config.screenshots_dir)
            .with_context(|| format!("creating {}", config.screenshots_dir.display()))?;

        let stream = match &config.redis_host {
            Some(host) => connect_stream(host, config.redis_port).await,
            None => None,
        };

        let storage = Arc::new(
            Storage::open(&config.db_path)
                .with_context(|| format!("opening row store at {}", config.db_path.display()))?,
        );
        storage.sessions().ensure_table().await?;

        let vault = match &config.vault_path {
            Some(path) => VaultIndex::load(path),
            None => VaultIndex::empty(),
        };
        let intent = Arc::new(IntentClient::new(&config.llm_host, &config.model_heavy, vault)?);
        if intent.check_connection().await {
            tracing::info!("model endpoint verified");
        } else {
            tracing::warn!(host = %config.llm_host, "model endpoint unreachable, running in fallback mode");
        }

        let pipeline = PerceptionPipeline::new(
            Sanitizer::new(),
            UiTreeExtractor::new(Box::new(NullUiTreeSource)),
            OcrEngine::new(&config.ocr_languages),
            VisionAgent::new(Box::new(OllamaVisionBackend::new(
                &config.vlm_host,
                &config.vlm_model,
            )?)),
            config.screenshots_dir.clone(),
        );

        let tracker = SessionTracker::new(config.idle_threshold_sec, config.max_session_sec);

        let graph_file = graph_path(&config.db_path);
        let graph = match KnowledgeGraph::load(&graph_file) {
            Ok(graph) => Some(Arc::new(Mutex::new(graph))),
            Err(err) => {
                tracing::warn!(%err, "knowledge graph unavailable");
                None
            }
        };

        let session_manager = SessionManager::new(
            storage.clone(),
            intent.clone(),
            graph,
            graph_file,
            config.min_session_sec,
        );

        match storage.stats().get_stats().await {
            Ok(stats) => tracing::info!(
                total = stats.total_events,
                pending = stats.pending_events,
                enriched = stats.enriched_events,
                "database stats"
            ),
            Err(err) => tracing::warn!(%err, "could not read database stats"),
        }

        Ok(Self {
            suppressor: FingerprintSuppressor::new(config.dedup_window_sec),
            config,
            guard,
            storage,
            stream,
            pipeline,
            intent,
            tracker,
            session_manager,
            shutdown,
        })
    }

    /// Replace the resource guard (platform injection and tests).
    pub fn set_guard(&mut self, guard: SystemGuard) {
        self.guard = guard;
    }

    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// The periodic loop. Returns after a shutdown signal, having run the
    /// reverse-order shutdown path.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            period_sec = self.config.cycle_period.as_secs(),
            mode = if self.stream.is_some() { "stream" } else { "store" },
            "starting event loop"
        );

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_period) => {}
                _ = self.shutdown.changed() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
            if *self.shutdown.borrow() {
                break;
            }

            cycles += 1;
            if cycles % GRAPH_SAVE_INTERVAL_CYCLES == 0 {
                self.session_manager.save_graph();
            }

            match self.run_cycle().await {
                Ok(report) if report.skipped_by_guard => {
                    tracing::info!("resource guard denied cycle, skipping");
                }
                Ok(report) if report.groups > 0 => {
                    tracing::info!(
                        groups = report.groups,
                        events = report.events_processed,
                        "cycle complete"
                    );
                }
                Ok(_) => tracing::debug!("no pending events this cycle"),
                Err(err) => {
                    tracing::error!(%err, "error in event loop");
                    tokio::time::sleep(self.config.error_cooldown).await;
                }
            }
        }

        self.shutdown_components().await;
        Ok(())
    }

    /// One fetch-and-process cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        if !self.guard.safe_to_run() {
            return Ok(CycleReport {
                skipped_by_guard: true,
                ..Default::default()
            });
        }

        let groups = self.fetch_groups().await?;
        if groups.is_empty() {
            return Ok(CycleReport::default());
        }

        let total: usize = groups.iter().map(|g| g.event_count).sum();
        tracing::info!(groups = groups.len(), events = total, "processing unique groups");

        let mut processed = 0;
        let fetched = groups.len();
        for group in &groups {
            if *self.shutdown.borrow() {
                break;
            }

            match self.process_group(group).await {
                Ok(count) => processed += count,
                Err(err) => {
                    tracing::error!(
                        %err,
                        process = %group.process_name,
                        "error processing group"
                    );
                }
            }
        }

        Ok(CycleReport {
            groups: fetched,
            events_processed: processed,
            skipped_by_guard: false,
        })
    }

    async fn fetch_groups(&self) -> Result<Vec<EventGroup>> {
        if let Some(stream) = &self.stream {
            return Ok(stream.fetch_and_group(self.config.batch_limit).await?);
        }
        Ok(self
            .storage
            .events()
            .fetch_unique_groups(self.config.batch_limit)
            .await?)
    }

    async fn process_group(&mut self, group: &EventGroup) -> Result<usize> {
        // Session tracking first: a group is one synthesized tracker event,
        // so session boundaries are group-granular in both modes.
        let tracker_event = SessionEvent {
            process_name: group.process_name.clone(),
            window_title: group.window_title.clone(),
            unix_time: if group.tracking_time() > 0 {
                group.tracking_time()
            } else {
                unix_now()
            },
            intensity: group.avg_intensity,
            screenshot_path: group.screenshot_path.clone(),
        };
        if let Some(closed) = self.tracker.process_event(tracker_event) {
            self.session_manager.archive(closed).await;
        }

        // Duplicate fingerprint inside the suppression window: count as
        // handled, acknowledge in stream mode, never reprocess.
        if self.suppressor.should_skip(&group.process_name, unix_now()) {
            if let Some(stream) = &self.stream {
                stream.ack_groups(std::slice::from_ref(group)).await?;
            }
            return Ok(group.event_count);
        }

        if self.stream.is_some() {
            self.process_stream_group(group).await
        } else {
            self.process_store_group(group).await
        }
    }

    /// Stream path: perception is bypassed (the raw payload has no live
    /// window or stored screenshot), so the context row carries intent and
    /// tags only. Acknowledge strictly after archival.
    async fn process_stream_group(&mut self, group: &EventGroup) -> Result<usize> {
        let vision_description = self.describe_group_screenshot(group).await;

        let context = EventContext {
            window_title: non_empty_or(&group.window_title, "Unknown"),
            input_intensity: group.avg_intensity as i64,
            vision_description,
            ..Default::default()
        };
        let inference = self.intent.synthesize(&context).await;

        self.storage
            .events()
            .archive_enriched_group(group, &inference.intent, &inference.tags)
            .await?;

        let stream = self.stream.as_ref().expect("stream mode checked by caller");
        stream.ack_groups(std::slice::from_ref(group)).await?;

        tracing::debug!(
            process = truncate_chars(&group.process_name, 20),
            events = group.event_count,
            "processed stream group"
        );
        Ok(group.event_count)
    }

    /// Store path: per-event perception in event order, one group-level
    /// inference applied to every member, then a single batch mark.
    async fn process_store_group(&mut self, group: &EventGroup) -> Result<usize> {
        let events = self.storage.events().fetch_by_ids(&group.event_ids).await?;
        let admitted = self.guard.check_available(self.config.vram_threshold_mb);
        let perceived = self.pipeline.process_batch(&events, admitted).await;

        let history = self
            .storage
            .events()
            .get_history_tail(group.last_seen, HISTORY_WINDOW_SEC)
            .await
            .unwrap_or_default();
        let history: Vec<String> = history
            .iter()
            .rev()
            .take(HISTORY_TAIL)
            .rev()
            .map(|entry| {
                format!(
                    "{}: {}",
                    entry.process_name,
                    truncate_chars(&entry.window_title, 30)
                )
            })
            .collect();

        // The richest member represents the group in the prompt.
        let representative = perceived
            .iter()
            .find(|p| {
                p.accessibility_tree.is_some()
                    || p.ocr_content.is_some()
                    || p.vlm_description.is_some()
            })
            .or_else(|| perceived.first());

        let context = EventContext {
            window_title: non_empty_or(&group.window_title, "Unknown"),
            ui_tree: representative.and_then(|p| p.accessibility_tree.clone()),
            ocr_text: representative.and_then(|p| p.ocr_content.clone()),
            vision_description: representative.and_then(|p| p.vlm_description.clone()),
            input_intensity: group.avg_intensity as i64,
            history,
            timestamp: None,
        };
        let inference = self.intent.synthesize(&context).await;

        // Member rows can vanish between grouping and fetch (maintenance
        // pruning); the ids still get the group-level intent applied.
        if perceived.is_empty() {
            self.storage
                .context()
                .batch_insert_context(&group.event_ids, &inference.intent, &inference.tags)
                .await?;
            self.storage
                .events()
                .batch_mark_processed(&group.event_ids)
                .await?;
            return Ok(group.event_count);
        }

        for p in &perceived {
            let row = EnrichedContext {
                accessibility_tree: p.accessibility_tree.clone(),
                ocr_content: p.ocr_content.clone(),
                vlm_description: p.vlm_description.clone(),
                user_intent: Some(inference.intent.clone()),
                wikilinks: inference.tags.clone(),
                tags: inference.tags.clone(),
            };
            self.storage.context().update_event_context(p.event_id, &row).await?;
        }
        self.storage
            .events()
            .batch_mark_processed(&group.event_ids)
            .await?;

        tracing::debug!(
            process = truncate_chars(&group.process_name, 20),
            events = group.event_count,
            "processed store group"
        );
        Ok(group.event_count)
    }

    /// One-shot vision call for a group that carries its own screenshot.
    async fn describe_group_screenshot(&self, group: &EventGroup) -> Option<String> {
        let path = group.screenshot_path.as_ref()?;
        let path = std::path::Path::new(path);
        if !path.exists() {
            return None;
        }
        if !self.guard.check_available(self.config.vram_threshold_mb) {
            tracing::info!("vision skipped by guard for group screenshot");
            return None;
        }

        let request = VisionRequest {
            source: ImageSource::Path(path.to_path_buf()),
            prompt: GROUP_VISION_PROMPT.to_string(),
            roi: None,
        };
        match self.pipeline.vision().describe_screenshot(&request).await {
            Ok(description) if description != VRAM_LIMIT_SKIPPED && !description.is_empty() => {
                Some(description)
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(%err, "group vision analysis failed");
                None
            }
        }
    }

    /// Reverse-order shutdown. Every step is best-effort and isolated.
    async fn shutdown_components(&mut self) {
        tracing::info!("shutting down mnemosyne brain");

        if let Some(session) = self.tracker.force_close() {
            self.session_manager.archive(session).await;
            tracing::info!("active session archived on shutdown");
        }

        self.pipeline.vision().release().await;
        tracing::debug!("vision backend released");

        // The intent client and the storage connection close on drop; the
        // guard and graph need explicit farewells.
        self.guard.shutdown();
        self.session_manager.save_graph();

        tracing::info!("shutdown complete");
    }
}

async fn connect_stream(host: &str, port: u16) -> Option<StreamConsumer> {
    match StreamProvider::connect(host, port).await {
        Ok(provider) => match StreamConsumer::new(provider).await {
            Ok(consumer) => {
                tracing::info!("running in stream mode");
                Some(consumer)
            }
            Err(err) => {
                tracing::warn!(%err, "consumer group unavailable, falling back to store mode");
                None
            }
        },
        Err(err) => {
            tracing::warn!(%err, "broker connection failed, falling back to store mode");
            None
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{GpuTelemetry, ProcessScanner};
    use mnemosyne_types::CaptureEvent;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedTelemetry(Option<u64>);
    impl GpuTelemetry for FixedTelemetry {
        fn free_bytes(&self) -> Option<u64> {
            self.0
        }
    }

    struct NoProcesses;
    impl ProcessScanner for NoProcesses {
        fn running_names(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn permissive_guard() -> SystemGuard {
        SystemGuard::with_backends(
            Box::new(FixedTelemetry(Some(8 * 1024 * 1024 * 1024))),
            Box::new(NoProcesses),
            4096,
        )
    }

    fn starved_guard() -> SystemGuard {
        SystemGuard::with_backends(
            Box::new(FixedTelemetry(Some(3 * 1024 * 1024 * 1024))),
            Box::new(NoProcesses),
            4096,
        )
    }

    async fn mock_llm(server: &MockServer, response: &str) {
        Mock::given(method("POST"))
            .and(url_path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": response})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})),
            )
            .mount(server)
            .await;
    }

    fn test_config(dir: &std::path::Path, llm: &str) -> Config {
        Config {
            db_path: dir.join("activity.db"),
            llm_host: llm.to_string(),
            vlm_host: llm.to_string(),
            screenshots_dir: dir.join("screenshots"),
            ..Config::default()
        }
    }

    fn pending_event(t: i64, process: &str, title: &str) -> CaptureEvent {
        CaptureEvent {
            id: 0,
            session_uuid: None,
            timestamp_utc: "2026-01-01T00:00:00Z".into(),
            unix_time: t,
            process_name: process.into(),
            window_title: title.into(),
            window_hwnd: None,
            roi: None,
            input_idle_ms: 0,
            input_intensity: 55,
            is_processed: false,
            has_screenshot: false,
            screenshot_hash: None,
            screenshot_path: None,
            screenshot_data: None,
        }
    }

    #[tokio::test]
    async fn store_cycle_enriches_and_marks_processed() {
        let server = MockServer::start().await;
        mock_llm(&server, "Editing [[main.rs]] in the editor").await;

        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut orchestrator =
            Orchestrator::initialize(test_config(dir.path(), &server.uri()), rx)
                .await
                .unwrap();
        orchestrator.set_guard(permissive_guard());

        let storage = orchestrator.storage();
        storage
            .events()
            .insert(&pending_event(100, "code.exe", "main.rs"))
            .await
            .unwrap();
        storage
            .events()
            .insert(&pending_event(110, "code.exe", "main.rs"))
            .await
            .unwrap();

        let report = orchestrator.run_cycle().await.unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.events_processed, 2);

        let stats = storage.stats().get_stats().await.unwrap();
        assert_eq!(stats.pending_events, 0);
        assert_eq!(stats.enriched_events, 2);

        let ctx = storage.context().get(1).await.unwrap().unwrap();
        assert_eq!(
            ctx.user_intent.as_deref(),
            Some("Editing [[main.rs]] in the editor")
        );
        assert!(ctx.tags.contains(&"main.rs".to_string()));
    }

    #[tokio::test]
    async fn guard_denial_skips_the_cycle() {
        let server = MockServer::start().await;
        mock_llm(&server, "anything").await;

        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut orchestrator =
            Orchestrator::initialize(test_config(dir.path(), &server.uri()), rx)
                .await
                .unwrap();
        orchestrator.set_guard(starved_guard());

        let storage = orchestrator.storage();
        storage
            .events()
            .insert(&pending_event(100, "code.exe", "main.rs"))
            .await
            .unwrap();

        let report = orchestrator.run_cycle().await.unwrap();
        assert!(report.skipped_by_guard);
        assert_eq!(
            storage.stats().get_stats().await.unwrap().pending_events,
            1
        );
    }

    #[tokio::test]
    async fn duplicate_fingerprint_group_is_counted_not_enriched() {
        let server = MockServer::start().await;
        mock_llm(&server, "Reading documentation").await;

        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut orchestrator =
            Orchestrator::initialize(test_config(dir.path(), &server.uri()), rx)
                .await
                .unwrap();
        orchestrator.set_guard(permissive_guard());

        let storage = orchestrator.storage();
        storage
            .events()
            .insert(&pending_event(100, "vscode.exe", "a.rs"))
            .await
            .unwrap();
        let first = orchestrator.run_cycle().await.unwrap();
        assert_eq!(first.events_processed, 1);

        // Same process again within the suppression window: handled but not
        // enriched, and left pending for a later cycle.
        storage
            .events()
            .insert(&pending_event(200, "vscode.exe", "b.rs"))
            .await
            .unwrap();
        let second = orchestrator.run_cycle().await.unwrap();
        assert_eq!(second.events_processed, 1);
        assert_eq!(
            storage.stats().get_stats().await.unwrap().enriched_events,
            1
        );
    }

    #[tokio::test]
    async fn window_change_across_cycles_archives_session() {
        let server = MockServer::start().await;
        mock_llm(&server, "Switched between editor and browser work").await;

        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut orchestrator =
            Orchestrator::initialize(test_config(dir.path(), &server.uri()), rx)
                .await
                .unwrap();
        orchestrator.set_guard(permissive_guard());

        let storage = orchestrator.storage();
        storage
            .events()
            .insert(&pending_event(1000, "code.exe", "main.rs"))
            .await
            .unwrap();
        orchestrator.run_cycle().await.unwrap();

        // A different window 20+ seconds later closes the first session
        // (duration 300s, above the archive floor).
        storage
            .events()
            .insert(&pending_event(1300, "firefox.exe", "docs"))
            .await
            .unwrap();
        orchestrator.run_cycle().await.unwrap();

        let sessions = storage.sessions().get_recent(10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].primary_process, "code.exe");
        assert_eq!(sessions[0].duration_seconds, 300);
    }
}
