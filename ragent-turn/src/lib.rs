#![deny(missing_docs)]
//! Shared provider and message types for the research agent's reasoning loop.
//!
//! This crate defines the internal lingua franca that sits between
//! [`layer0::Operator`] implementations (like `ragent-agent-loop`'s
//! `ReactOperator`) and concrete LLM backends (like
//! `ragent-provider-anthropic`).
//!
//! Key traits defined here:
//! - [`Provider`] — LLM provider interface (not object-safe, uses RPITIT)
//! - [`ContextStrategy`] — context window management

pub mod config;
pub mod context;
pub mod convert;
pub mod provider;
pub mod types;

// Re-exports
pub use config::RagentTurnConfig;
pub use context::{ContextStrategy, NoCompaction};
pub use convert::{
    content_block_to_part, content_part_to_block, content_to_parts, content_to_user_message,
    parts_to_content,
};
pub use provider::{Provider, ProviderError};
pub use types::*;
