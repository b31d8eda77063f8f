//! Model backend implementations for Hacxgent.
//!
//! All backends implement the `hacxgent_core::Backend` trait.
//! The router hands each model the backend of its provider.

pub mod openai_compat;
pub mod rate_limit;
pub mod router;

pub use openai_compat::{OpenAiCompatBackend, RetryPolicy};
pub use rate_limit::RateLimiter;
pub use router::{BackendRouter, build_backend, build_from_config};
