mod consumer;
mod error;
mod provider;

pub use consumer::{GROUP_NAME, STREAM_KEY, StreamConsumer, group_events};
pub use error::{Error, Result};
pub use provider::StreamProvider;
