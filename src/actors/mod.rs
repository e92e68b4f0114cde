//! Actor-based collection pipeline
//!
//! Each collector pairs one remote alert feed with one log file. Its fetcher
//! and writer run as independent tokio tasks, connected by an unbounded
//! channel that the collector controller owns.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌───────────────────┐
//!                 │ ServiceController │
//!                 └─────────┬─────────┘
//!                           │ owns N
//!              ┌────────────▼────────────┐
//!              │   CollectorController   │
//!              └──┬───────────────────┬──┘
//!        spawns   │                   │   spawns
//!      ┌──────────▼───┐           ┌───▼──────────┐
//!      │ StreamFetcher│──records─►│  LogWriter   │──► log_path (JSON lines)
//!      └──────────────┘  channel  └──────────────┘
//! ```
//!
//! ## Cancellation
//!
//! Every worker instance gets its own `CancellationToken` and races it
//! against each suspension point. Stopping a worker cancels the token and
//! joins with a deadline; a worker that misses it is aborted.

pub mod channel;
pub mod collector;
pub mod fetcher;
pub mod service;
pub mod state;
pub mod worker;
pub mod writer;
