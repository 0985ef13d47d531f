//! tokengate - Atomic multi-scope token budget enforcement
//!
//! Reserves estimated LLM token usage against global, org, user, provider
//! and model budgets in one atomic step, then settles the reservation with
//! actual usage. Counters live in Redis (or in process for development) so
//! every replica of a service sees the same budgets.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokengate::degradation::DegradationPolicy;
//! use tokengate::engine::ReservationEngine;
//! use tokengate::lifecycle::run_with_budget;
//! use tokengate::policy::{BudgetPolicy, PolicyStrictness};
//! use tokengate::store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = BudgetPolicy::load(std::path::Path::new("policy.json"), PolicyStrictness::Strict)?;
//! let engine = Arc::new(ReservationEngine::new(
//!     Arc::new(MemoryStore::default()),
//!     policy,
//!     DegradationPolicy::fail_closed(),
//! ));
//!
//! let scopes = engine.scopes("acme", "alice", "openai", "gpt-4o")?;
//! let reply = run_with_budget(&engine, scopes, 1_500, |actual| async move {
//!     // call the model, then report what it really consumed
//!     actual.set(1_234);
//!     Ok::<_, std::io::Error>("response")
//! })
//! .await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod degradation;
pub mod engine;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod scope;
pub mod store;
