//! Source contract: asynchronous emitters of partial results.
//!
//! A [`Source`] is handed a [`SourceSink`] when listening begins and returns
//! a [`Subscription`] that tears the wiring down again. The sink exposes both
//! channels a source can fire:
//! - `emit(partial)` routes a partial result into the current round's slot
//! - `fail(error)` fails the round's waiter with `SourceFailure`
//!
//! [`StreamSource`] adapts any `futures::Stream` into a source by driving it
//! on a spawned tokio task.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::SourceError;
use crate::merge::PartialResult;

/// Stable identity of a registered source, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(u64);

impl SourceId {
    pub const fn from_raw(raw: u64) -> Self {
        SourceId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// An asynchronous emitter of partial results.
///
/// Implementations must not call back into the sink from inside
/// `subscribe` while holding their own locks that `emit` also takes.
pub trait Source: Send + Sync {
    /// Human-readable name used in logs and `SourceFailure` errors.
    fn name(&self) -> &str {
        "source"
    }

    /// Start delivering emissions into `sink` until the returned
    /// subscription is torn down.
    fn subscribe(&self, sink: SourceSink) -> Subscription;
}

/// Receiving side of a sink; implemented by the resolver.
pub(crate) trait EmissionRouter: Send + Sync {
    fn route_emit(&self, source: SourceId, session: u64, partial: PartialResult) -> bool;
    fn route_fail(&self, source: SourceId, session: u64, error: SourceError) -> bool;
}

/// Handle a source uses to deliver emissions for one listening session.
///
/// Emissions from a session that has ended, or from a sink whose resolver
/// has been dropped, are discarded and reported as `false`.
#[derive(Clone)]
pub struct SourceSink {
    router: Weak<dyn EmissionRouter>,
    source: SourceId,
    session: u64,
}

impl SourceSink {
    pub(crate) fn new(router: Weak<dyn EmissionRouter>, source: SourceId, session: u64) -> Self {
        Self {
            router,
            source,
            session,
        }
    }

    /// The source this sink belongs to.
    pub fn source_id(&self) -> SourceId {
        self.source
    }

    /// Deliver a partial result. Returns whether the resolver accepted it.
    pub fn emit(&self, partial: PartialResult) -> bool {
        match self.router.upgrade() {
            Some(router) => router.route_emit(self.source, self.session, partial),
            None => {
                trace!(source = %self.source, "resolver dropped, emission discarded");
                false
            }
        }
    }

    /// Report a failure on the source's error channel.
    pub fn fail(&self, error: SourceError) -> bool {
        match self.router.upgrade() {
            Some(router) => router.route_fail(self.source, self.session, error),
            None => {
                trace!(source = %self.source, "resolver dropped, failure discarded");
                false
            }
        }
    }
}

impl fmt::Debug for SourceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSink")
            .field("source", &self.source)
            .field("session", &self.session)
            .finish()
    }
}

/// Live subscription to a source.
///
/// Teardown runs at most once, either via [`Subscription::unsubscribe`] or
/// when the subscription is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

type StreamFactory =
    dyn Fn() -> BoxStream<'static, std::result::Result<PartialResult, SourceError>> + Send + Sync;

/// Source backed by a stream of partial results.
///
/// Every subscription calls the factory for a fresh stream and drives it on a
/// spawned tokio task; `Ok` items are emitted and `Err` items are reported as
/// failures. Unsubscribing aborts the task. Subscribing outside a tokio
/// runtime panics, as `tokio::spawn` does.
pub struct StreamSource {
    name: String,
    factory: Arc<StreamFactory>,
}

impl StreamSource {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> BoxStream<'static, std::result::Result<PartialResult, SourceError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }
}

impl Source for StreamSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, sink: SourceSink) -> Subscription {
        let mut stream = (self.factory)();
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(partial) => {
                        sink.emit(partial);
                    }
                    Err(error) => {
                        sink.fail(error);
                    }
                }
            }
            debug!(source = %name, "stream source exhausted");
        });

        Subscription::new(move || task.abort())
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("name", &self.name)
            .finish()
    }
}
