//! mail-extract — structured message extraction from raw email conversations.
//!
//! Takes free-form email conversation text and pulls out the individual
//! messages (author, content, timestamp) plus forwarding metadata, using a
//! generative model behind a strict validator and a tiered fallback chain.
//! Model output is unreliable by nature; the job of this crate is to turn
//! that unreliability into a bounded number of structured retries and a
//! fail-soft answer the caller can always use.

pub mod config;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod prompt;
pub mod schema;
pub mod server;
pub mod validate;
