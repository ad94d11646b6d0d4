//! Tiered chat client: heavy model for quality, light model as the fallback
//! when the heavy one fails or is overloaded.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

pub const DEFAULT_HEAVY_MODEL: &str = "deepseek-r1:1.5b";
pub const DEFAULT_LIGHT_MODEL: &str = "phi3:mini";

const REASONING_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tier {
    Heavy,
    Light,
    /// Try the heavy model, retry once on the light model.
    #[default]
    Auto,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize, Default)]
struct ChatReplyMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

pub struct ReasoningClient {
    client: reqwest::Client,
    base_url: String,
    model_heavy: String,
    model_light: String,
}

impl ReasoningClient {
    pub fn new(
        base_url: impl Into<String>,
        model_heavy: impl Into<String>,
        model_light: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REASONING_TIMEOUT)
            .build()?;
        let base_url = base_url.into();
        let model_heavy = model_heavy.into();
        let model_light = model_light.into();
        tracing::info!(
            host = %base_url,
            heavy = %model_heavy,
            light = %model_light,
            "reasoning client initialized"
        );

        Ok(Self {
            client,
            base_url,
            model_heavy,
            model_light,
        })
    }

    fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Light => &self.model_light,
            Tier::Heavy | Tier::Auto => &self.model_heavy,
        }
    }

    /// Generate a response, retrying once on the light model when an Auto
    /// request fails on the heavy one. `None` means both attempts failed.
    pub async fn reason(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        tier: Tier,
        temperature: f64,
        max_tokens: u32,
    ) -> Option<String> {
        let model = self.model_for(tier);

        match self
            .call_chat(model, prompt, system_prompt, temperature, max_tokens)
            .await
        {
            Ok(content) => Some(content),
            Err(err) => {
                tracing::error!(model, %err, "reasoning call failed");

                if tier == Tier::Auto && model != self.model_light {
                    tracing::info!(model = %self.model_light, "falling back to light model");
                    match self
                        .call_chat(&self.model_light, prompt, system_prompt, temperature, max_tokens)
                        .await
                    {
                        Ok(content) => return Some(content),
                        Err(fallback_err) => {
                            tracing::error!(%fallback_err, "light model fallback failed");
                        }
                    }
                }
                None
            }
        }
    }

    /// Summarize an activity log: what was done, main goals, patterns.
    pub async fn analyze_activity(&self, activity_log: &str, tier: Tier) -> Option<String> {
        let system_prompt = "You are an AI assistant analyzing user activity logs.\n\
            Your task is to:\n\
            1. Summarize what the user was doing\n\
            2. Identify the main goals or tasks\n\
            3. Note any patterns or focus areas\n\
            4. Keep the summary concise (2-3 sentences)\n\n\
            Respond in the same language as the activity log.";

        self.reason(
            &format!("Analyze this activity log:\n\n{activity_log}"),
            Some(system_prompt),
            tier,
            0.5,
            256,
        )
        .await
    }

    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            self.client.get(&url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    /// Names of the models served by the endpoint.
    pub async fn list_models(&self) -> Vec<String> {
        let url = format!("{}/api/tags", self.base_url);
        let result: Result<ModelList> = async {
            let response = self.client.get(&url).send().await?.error_for_status()?;
            Ok(response.json().await?)
        }
        .await;

        match result {
            Ok(list) => list.models.into_iter().map(|m| m.name).collect(),
            Err(err) => {
                tracing::error!(%err, "failed to list models");
                Vec::new()
            }
        }
    }

    async fn call_chat(
        &self,
        model: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let payload = ChatRequest {
            model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature,
                num_predict: max_tokens,
            },
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let reply: ChatReply = response.json().await?;

        tracing::debug!(model, chars = reply.message.content.len(), "chat response");
        Ok(reply.message.content)
    }
}
