//! # Notification Registry
//!
//! Process-wide mapping from batch id to the set of live notification
//! channels that care about it. Channel connections register themselves on
//! connect and unregister on every disconnect path; the batch processor only
//! ever takes a transient snapshot of the current targets at broadcast time,
//! so clients that connect mid-batch receive all subsequent events.
//!
//! All operations lock the same mutex, which makes each of them atomic with
//! respect to the others. The registry never keeps a recipient beyond its
//! connection's lifetime: removal is unconditional, and a broadcast that
//! races a disconnect fails on the send, not here.

use crate::notify::events::BatchEvent;
use actix::Recipient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Handle identifying one registered channel, unique for the process lifetime.
pub type ChannelId = usize;

pub struct NotificationRegistry {
    channels: Mutex<HashMap<Uuid, HashMap<ChannelId, Recipient<BatchEvent>>>>,
    next_channel_id: AtomicUsize,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_channel_id: AtomicUsize::new(0),
        }
    }

    /// Add a channel to a batch's target set, creating the set if absent.
    /// Returns the id the caller must pass back to [`unregister`](Self::unregister).
    pub fn register(&self, batch_uuid: Uuid, recipient: Recipient<BatchEvent>) -> ChannelId {
        let channel_id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(batch_uuid)
            .or_default()
            .insert(channel_id, recipient);
        channel_id
    }

    /// Remove a channel from a batch's target set. A no-op when either the
    /// batch or the channel is unknown. The batch entry itself is dropped
    /// once its set becomes empty.
    pub fn unregister(&self, batch_uuid: Uuid, channel_id: ChannelId) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(batch) = channels.get_mut(&batch_uuid) {
            batch.remove(&channel_id);
            if batch.is_empty() {
                channels.remove(&batch_uuid);
            }
        }
    }

    /// Snapshot of the channels currently registered for a batch. Looked up
    /// fresh for every event, never cached across a batch's lifetime.
    pub fn broadcast_targets(&self, batch_uuid: Uuid) -> Vec<Recipient<BatchEvent>> {
        let channels = self.channels.lock().unwrap();
        channels
            .get(&batch_uuid)
            .map(|batch| batch.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of channels currently registered for a batch.
    pub fn channel_count(&self, batch_uuid: Uuid) -> usize {
        let channels = self.channels.lock().unwrap();
        channels.get(&batch_uuid).map_or(0, |batch| batch.len())
    }

    /// Number of batches with at least one registered channel.
    pub fn batch_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    /// Drop every registration. Used at process shutdown.
    pub fn clear(&self) {
        let mut channels = self.channels.lock().unwrap();
        if !channels.is_empty() {
            debug!("Dropping registrations for {} batches", channels.len());
        }
        channels.clear();
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::prelude::*;

    /// Actor that accepts batch events and drops them.
    struct Sink;

    impl Actor for Sink {
        type Context = Context<Self>;
    }

    impl Handler<BatchEvent> for Sink {
        type Result = ();

        fn handle(&mut self, _event: BatchEvent, _ctx: &mut Context<Self>) {}
    }

    fn sink() -> Recipient<BatchEvent> {
        Sink.start().recipient()
    }

    #[actix_web::test]
    async fn test_register_and_broadcast_targets() {
        let registry = NotificationRegistry::new();
        let batch = Uuid::new_v4();

        assert!(registry.broadcast_targets(batch).is_empty());

        registry.register(batch, sink());
        registry.register(batch, sink());
        assert_eq!(registry.broadcast_targets(batch).len(), 2);
        assert_eq!(registry.channel_count(batch), 2);

        // A different batch id sees nothing.
        assert!(registry.broadcast_targets(Uuid::new_v4()).is_empty());
    }

    #[actix_web::test]
    async fn test_unregister_removes_only_that_channel() {
        let registry = NotificationRegistry::new();
        let batch = Uuid::new_v4();

        let first = registry.register(batch, sink());
        let _second = registry.register(batch, sink());

        registry.unregister(batch, first);
        assert_eq!(registry.channel_count(batch), 1);
    }

    #[actix_web::test]
    async fn test_empty_batch_entry_is_dropped() {
        let registry = NotificationRegistry::new();
        let batch = Uuid::new_v4();

        let channel_id = registry.register(batch, sink());
        assert_eq!(registry.batch_count(), 1);

        registry.unregister(batch, channel_id);
        assert_eq!(registry.batch_count(), 0);
    }

    #[actix_web::test]
    async fn test_unregister_unknown_is_noop() {
        let registry = NotificationRegistry::new();
        let batch = Uuid::new_v4();

        registry.unregister(batch, 42);

        let channel_id = registry.register(batch, sink());
        registry.unregister(Uuid::new_v4(), channel_id);
        assert_eq!(registry.channel_count(batch), 1);
    }

    #[actix_web::test]
    async fn test_clear_drops_everything() {
        let registry = NotificationRegistry::new();
        let one = Uuid::new_v4();
        let two = Uuid::new_v4();

        registry.register(one, sink());
        registry.register(two, sink());
        registry.clear();

        assert_eq!(registry.batch_count(), 0);
        assert!(registry.broadcast_targets(one).is_empty());
        assert!(registry.broadcast_targets(two).is_empty());
    }

    #[actix_web::test]
    async fn test_concurrent_registration_is_not_lost() {
        let registry = std::sync::Arc::new(NotificationRegistry::new());
        let batch = Uuid::new_v4();

        let recipients: Vec<_> = (0..16).map(|_| sink()).collect();
        let mut handles = Vec::new();
        for recipient in recipients {
            let registry = std::sync::Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry.register(batch, recipient)
            }));
        }
        let ids: Vec<ChannelId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.channel_count(batch), 16);

        // Ids are unique, so concurrent unregistration removes exactly one each.
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 16);
    }
}
