//! fanin: fan N asynchronous sources into one merged result per round.
//!
//! A [`Resolver`] subscribes to every registered [`Source`], tracks one slot
//! per source for the current round, and settles the caller's
//! [`RoundWait`] with the merge of all slots once each source has emitted.
//! Rounds re-arm automatically, so the caller keeps awaiting without
//! re-subscribing.
//!
//! ```rust,ignore
//! let resolver = Resolver::new();
//! resolver.register(block_source);
//! resolver.register(account_source);
//! resolver.begin_listening()?;
//!
//! loop {
//!     let merged = resolver.await_round_within(Duration::from_secs(3)).await?;
//!     handle(merged);
//! }
//! ```

pub mod barrier;
pub mod cancel;
pub mod config;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod obs;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod telemetry;
pub mod testing;

pub use barrier::{Fulfillment, RoundBarrier};
pub use cancel::{CancellationGate, WaitId};
pub use config::ResolverConfig;
pub use error::{CancelReason, ResolverError, Result, SourceError};
pub use merge::{merge_in_order, MergedResult, PartialResult};
pub use metrics::{Metrics, MetricsSnapshot};
pub use obs::{
    emit_listening_started, emit_listening_stopped, emit_round_armed, emit_round_cancelled,
    emit_round_completed, emit_source_failed, emit_source_registered, ResolverSpan,
};
pub use registry::SourceRegistry;
pub use resolver::{CancelHandle, Resolver, RoundWait};
pub use source::{Source, SourceId, SourceSink, StreamSource, Subscription};
pub use telemetry::init_tracing;

/// fanin version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
