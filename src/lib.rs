//! Render Worker: asynchronous AI render job pipeline
//!
//! Accepts texture render jobs from a queue, screens prompts, deduplicates identical
//! concurrent work, generates through a primary provider with a local fallback behind
//! circuit breakers, enforces per-tenant concurrency and per-job token budgets, and
//! persists and publishes each result exactly once.

pub mod admission;
pub mod assets;
pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod safety;
pub mod status;
pub mod types;
