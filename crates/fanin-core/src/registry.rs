//! Ordered collection of sources and their live subscriptions.
//!
//! Each registered source gets one record keyed by its [`SourceId`], holding
//! the source handle and, while listening, its subscription. Records are kept
//! in registration order, which is also the merge order.
//!
//! The registry never calls into a source itself: `begin_listening` hands back
//! the sources to subscribe and `attach` stores the resulting subscriptions,
//! so the caller can subscribe without holding its own state lock.

use std::fmt;
use std::sync::Arc;

use crate::error::{ResolverError, Result};
use crate::source::{Source, SourceId, Subscription};

struct SourceEntry {
    id: SourceId,
    name: String,
    source: Arc<dyn Source>,
    subscription: Option<Subscription>,
}

/// A source that needs subscribing for the current session.
pub struct PendingSubscribe {
    pub id: SourceId,
    pub source: Arc<dyn Source>,
}

#[derive(Default)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
    next_id: u64,
    listening: bool,
    session: u64,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `source` and return its identity.
    pub fn register(&mut self, source: Arc<dyn Source>) -> SourceId {
        self.next_id += 1;
        let id = SourceId::from_raw(self.next_id);
        self.entries.push(SourceEntry {
            id,
            name: source.name().to_string(),
            source,
            subscription: None,
        });
        id
    }

    /// Open a listening session and list every source to subscribe.
    pub fn begin_listening(&mut self) -> Result<(u64, Vec<PendingSubscribe>)> {
        if self.listening {
            return Err(ResolverError::AlreadyListening);
        }
        self.listening = true;
        self.session += 1;

        let pending = self
            .entries
            .iter()
            .map(|entry| PendingSubscribe {
                id: entry.id,
                source: Arc::clone(&entry.source),
            })
            .collect();
        Ok((self.session, pending))
    }

    /// Store `subscription` for `id` if `session` is still the live one.
    ///
    /// A subscription for a stale session, or for an unknown source, is handed
    /// back so the caller can tear it down.
    pub fn attach(
        &mut self,
        session: u64,
        id: SourceId,
        subscription: Subscription,
    ) -> Option<Subscription> {
        if !self.accepts(session) {
            return Some(subscription);
        }
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => entry.subscription.replace(subscription),
            None => Some(subscription),
        }
    }

    /// Close the session and hand back every subscription for teardown.
    ///
    /// Returns nothing when not listening.
    pub fn end_listening(&mut self) -> Vec<Subscription> {
        if !self.listening {
            return Vec::new();
        }
        self.listening = false;
        self.entries
            .iter_mut()
            .filter_map(|entry| entry.subscription.take())
            .collect()
    }

    /// Whether emissions tagged with `session` should be routed.
    pub fn accepts(&self, session: u64) -> bool {
        self.listening && self.session == session
    }

    pub fn has_sources(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Source identities in registration order.
    pub fn ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    pub fn name_of(&self, id: SourceId) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.name.as_str())
    }

    pub fn subscribed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.subscription.is_some())
            .count()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<(SourceId, &str)> = self
            .entries
            .iter()
            .map(|entry| (entry.id, entry.name.as_str()))
            .collect();
        f.debug_struct("SourceRegistry")
            .field("sources", &names)
            .field("listening", &self.listening)
            .field("session", &self.session)
            .finish()
    }
}
