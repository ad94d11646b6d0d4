mod error;
mod intent;
mod reasoning;
mod vault;

pub use error::{Error, Result};
pub use intent::{
    DEFAULT_LLM_HOST, DEFAULT_MODEL, EventContext, InferenceResult, IntentClient,
    SecondaryInsights,
};
pub use reasoning::{ReasoningClient, Tier};
pub use vault::{VaultIndex, extract_wikilinks};
