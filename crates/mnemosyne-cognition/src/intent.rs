//! Intent synthesis: collapse the signal sources attached to an event into
//! one human-readable description of what the user is doing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use mnemosyne_core::Sanitizer;
use mnemosyne_types::truncate_chars;

use crate::error::Result;
use crate::vault::{VaultIndex, extract_wikilinks};

pub const DEFAULT_LLM_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "deepseek-r1:1.5b";

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(60);
const UI_TREE_PROMPT_LIMIT: usize = 2000;
const OCR_PROMPT_LIMIT: usize = 1500;

const SYSTEM_PROMPT: &str = "You are an expert digital activity analyst. Your task is to \
synthesize multiple signal sources into a DETAILED, insightful description of what the user \
is actually doing.

INPUT SIGNALS (use ALL available):
1. Window Title: Application and document context
2. UI Tree: Interactive elements (buttons, menus, tabs)
3. OCR Text: Visible text content on screen
4. Vision Description: Visual analysis of the screenshot
5. Input Intensity: 0-30=passive viewing, 30-70=light interaction, 70-100=active work
6. History: Recent activity for workflow context

ANALYSIS REQUIREMENTS:
- NEVER just repeat the window title. Infer the actual activity.
- Be SPECIFIC about what the user is working on (file names, topics, tools used).
- Use Input Intensity to distinguish: reading docs (low) vs coding (high)
- Generate WikiLinks [[like this]] for: files, projects, technologies, concepts

OUTPUT FORMAT:
Return a single line describing the intent. Be specific. No explanations needed.
If limited info, still provide your best inference based on app type and title keywords.";

const SESSION_SUMMARY_TEMPLATE: &str = "Summarize this user activity session:

Session Details:
- Duration: {duration_minutes} minutes
- Primary Application: {primary_process}
- Primary Window: {primary_window}
- Window Transitions: {transitions}
- Activity Level: {intensity_level} (avg intensity: {avg_intensity}/100)
- Event Count: {event_count}

Requirements:
- Provide a 1-2 sentence summary of what the user accomplished.
- Be SPECIFIC about the work done (not just \"worked in an editor\").
- Generate WikiLinks [[like this]] for key files, projects, or concepts.
- Focus on the outcome, not the process.

Summary:";

/// Signal sources attached to one event (or one collapsed group).
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub window_title: String,
    pub ui_tree: Option<String>,
    pub ocr_text: Option<String>,
    pub vision_description: Option<String>,
    pub input_intensity: i64,
    pub history: Vec<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub intent: String,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub raw_response: Option<String>,
}

/// Concept triples extracted by the secondary analysis pass.
#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryInsights {
    #[serde(default)]
    pub concept_relationships: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Intent inference over a local LLM endpoint.
pub struct IntentClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    sanitizer: Sanitizer,
    vault: VaultIndex,
}

impl IntentClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, vault: VaultIndex) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()?;
        let base_url = base_url.into();
        let model = model.into();
        tracing::info!(host = %base_url, model = %model, "intent client initialized");

        Ok(Self {
            client,
            base_url,
            model,
            sanitizer: Sanitizer::new(),
            vault,
        })
    }

    /// Synthesize intent from the context layer cake.
    ///
    /// On model failure the intent degrades to a template over the sanitized
    /// title with confidence 0.3 and tags derived from the application name.
    pub async fn synthesize(&self, context: &EventContext) -> InferenceResult {
        let prompt = self.build_prompt(context);

        match self.call_generate(&prompt, Some(SYSTEM_PROMPT), 0.3, 200).await {
            Ok(raw) if !raw.is_empty() => {
                let intent = self.vault.augment(&raw);
                let tags = extract_tags_from_text(&raw);
                InferenceResult {
                    intent,
                    tags,
                    confidence: 0.8,
                    raw_response: Some(raw),
                }
            }
            Ok(_) | Err(_) => {
                tracing::warn!("intent inference failed, using title fallback");
                let safe_title = self.sanitizer.clean_text(&context.window_title);
                InferenceResult {
                    intent: format!("Activity in {safe_title}"),
                    tags: extract_tags_from_title(&safe_title),
                    confidence: 0.3,
                    raw_response: None,
                }
            }
        }
    }

    /// Generate a summary for a closed session. Falls back to a template
    /// string when the model is unreachable.
    pub async fn summarize_session(
        &self,
        duration_minutes: f64,
        primary_process: &str,
        primary_window: &str,
        transitions: &[String],
        avg_intensity: f64,
        event_count: usize,
    ) -> String {
        let intensity_level = if avg_intensity < 30.0 {
            "low (passive viewing/reading)"
        } else if avg_intensity < 70.0 {
            "medium (light interaction)"
        } else {
            "high (active work/coding)"
        };

        let mut transitions_str = transitions
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if transitions.len() > 5 {
            transitions_str.push_str(&format!(" (+{} more)", transitions.len() - 5));
        }

        let prompt = SESSION_SUMMARY_TEMPLATE
            .replace("{duration_minutes}", &format!("{duration_minutes:.1}"))
            .replace("{primary_process}", primary_process)
            .replace("{primary_window}", truncate_chars(primary_window, 100))
            .replace("{transitions}", &transitions_str)
            .replace("{intensity_level}", intensity_level)
            .replace("{avg_intensity}", &format!("{avg_intensity:.0}"))
            .replace("{event_count}", &event_count.to_string());

        match self.call_generate(&prompt, None, 0.4, 150).await {
            Ok(summary) if !summary.is_empty() => {
                let summary = self.vault.augment(&summary);
                tracing::debug!(preview = truncate_chars(&summary, 50), "session summary generated");
                summary
            }
            Ok(_) | Err(_) => {
                format!(
                    "Activity in {} - {}",
                    primary_process,
                    truncate_chars(primary_window, 50)
                )
            }
        }
    }

    /// Second LLM pass asking for up to five concept relationship triples.
    /// Best-effort: any failure returns `None`.
    pub async fn secondary_analysis(
        &self,
        summary: &str,
        process: &str,
        event_count: usize,
        duration_minutes: f64,
    ) -> Option<SecondaryInsights> {
        let prompt = format!(
            "Analyze this activity session and extract up to 5 concept relationships.\n\n\
             Session: {process}, {duration_minutes:.1} minutes, {event_count} events\n\
             Summary: {summary}\n\n\
             Reply with JSON only, in the form:\n\
             {{\"concept_relationships\": [[\"concept_a\", \"RELATION\", \"concept_b\"]]}}"
        );

        let raw = self.call_generate(&prompt, None, 0.3, 300).await.ok()?;
        let insights = parse_insights(&raw)?;
        if insights.concept_relationships.is_empty() {
            return None;
        }
        Some(insights)
    }

    /// True when the endpoint answers the model listing route.
    pub async fn check_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            self.client.get(&url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    fn build_prompt(&self, context: &EventContext) -> String {
        let mut parts = Vec::new();

        let safe_title = self.sanitizer.clean_text(&context.window_title);
        parts.push(format!("Window Title: {safe_title}"));

        if let Some(ui_tree) = &context.ui_tree {
            let safe = self.sanitizer.clean_text(ui_tree);
            parts.push(format!("UI Tree: {}", ellipsize(&safe, UI_TREE_PROMPT_LIMIT)));
        }

        if let Some(ocr) = &context.ocr_text {
            let safe = self.sanitizer.clean_text(ocr);
            parts.push(format!("OCR Text: {}", ellipsize(&safe, OCR_PROMPT_LIMIT)));
        }

        if let Some(vision) = &context.vision_description {
            let safe = self.sanitizer.clean_text(vision);
            parts.push(format!("Vision Description: {safe}"));
        }

        parts.push(format!("Input Intensity: {}/100", context.input_intensity));

        if !context.history.is_empty() {
            let safe_history: Vec<String> = context
                .history
                .iter()
                .map(|entry| self.sanitizer.clean_text(entry))
                .collect();
            parts.push(format!("Recent Events: {}", safe_history.join(", ")));
        }

        parts.join("\n\n")
    }

    async fn call_generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f64,
        num_predict: u32,
    ) -> Result<String> {
        let payload = GenerateRequest {
            model: &self.model,
            system,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature,
                num_predict,
            },
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let body: GenerateResponse = response.json().await?;
        Ok(body.response.trim().to_string())
    }
}

fn ellipsize(text: &str, max: usize) -> String {
    let truncated = truncate_chars(text, max);
    if truncated.len() < text.len() {
        format!("{truncated}...")
    } else {
        truncated.to_string()
    }
}

/// Extract the first JSON object embedded in the model output.
fn parse_insights(raw: &str) -> Option<SecondaryInsights> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }

    let mut insights: SecondaryInsights = serde_json::from_str(&raw[start..=end]).ok()?;
    insights.concept_relationships.retain(|triple| triple.len() == 3);
    Some(insights)
}

static ACTIVITY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\b(editing|coding|programming|debugging)\b", "coding"),
        (r"(?i)\b(reading|viewing|browsing)\b", "reading"),
        (r"(?i)\b(writing|typing|composing)\b", "writing"),
        (r"(?i)\b(debugging|fixing|troubleshooting)\b", "debugging"),
        (r"(?i)\b(reviewing|analyzing)\b", "reviewing"),
        (r"(?i)\b(meeting|call|video)\b", "meeting"),
        (r"(?i)\b(email|message|chat)\b", "communication"),
    ]
    .into_iter()
    .map(|(pattern, tag)| (Regex::new(pattern).expect("static activity pattern"), tag))
    .collect()
});

static APP_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)VS Code", "vscode"),
        (r"(?i)Visual Studio", "visualstudio"),
        (r"(?i)Chrome", "browser"),
        (r"(?i)Firefox", "browser"),
        (r"(?i)Edge", "browser"),
        (r"(?i)Word", "office"),
        (r"(?i)Excel", "office"),
        (r"(?i)PowerPoint", "office"),
        (r"(?i)Outlook", "email"),
        (r"(?i)Terminal", "terminal"),
        (r"(?i)PowerShell", "terminal"),
        (r"(?i)GitHub", "github"),
        (r"(?i)Git", "git"),
        (r"(?i)Discord", "communication"),
        (r"(?i)Slack", "communication"),
        (r"(?i)Teams", "communication"),
    ]
    .into_iter()
    .map(|(pattern, tag)| (Regex::new(pattern).expect("static app pattern"), tag))
    .collect()
});

/// Tags from a model response: activity keywords plus wikilinked terms.
fn extract_tags_from_text(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for (pattern, tag) in ACTIVITY_PATTERNS.iter() {
        if pattern.is_match(text) && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    for link in extract_wikilinks(text) {
        if !tags.contains(&link) {
            tags.push(link);
        }
    }
    tags
}

/// Fallback tags from well-known application names in the title.
fn extract_tags_from_title(title: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for (pattern, tag) in APP_PATTERNS.iter() {
        if pattern.is_match(title) && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}
