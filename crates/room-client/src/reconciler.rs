//! Subscription reconciler.
//!
//! Keeps the client's consumers and remote streams in line with the
//! producers the server reports. `newProducer` events are only acted on
//! once the recv transport and the device capabilities exist; earlier
//! events are dropped, not queued. The later `listProducers` call picks
//! those producers up.

use crate::device::LocalTransport;
use crate::errors::ClientError;
use crate::remote::{RemoteStreams, RemoteTrack};
use crate::signaling::SignalingClient;
use common::types::{ConsumerId, PeerId, ProducerId};
use signaling_protocol::{Capabilities, NewProducer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What subscribing needs: the connection, the recv transport and the
/// device capabilities.
#[derive(Clone, Copy)]
pub struct RecvContext<'a> {
    pub signaling: &'a SignalingClient,
    pub transport: &'a Arc<dyn LocalTransport>,
    pub capabilities: &'a Capabilities,
}

/// Why a `newProducer` event was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Recv transport or capabilities not ready yet
    NotReady,
    /// Producer belongs to this client
    OwnProducer,
    /// Producer is already consumed
    AlreadyConsuming,
}

/// Outcome of a `newProducer` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Subscribed(ConsumerId),
    Dropped(DropReason),
}

pub struct SubscriptionReconciler {
    self_peer: PeerId,
    consumers: HashMap<ConsumerId, ProducerId>,
    streams: RemoteStreams,
}

impl SubscriptionReconciler {
    #[must_use]
    pub fn new(self_peer: PeerId) -> Self {
        Self {
            self_peer,
            consumers: HashMap::new(),
            streams: RemoteStreams::new(),
        }
    }

    /// Subscribe to `producer` and attach the resulting track.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or the device's failure; nothing is
    /// recorded in that case. A device failure after the server accepted
    /// the subscribe leaves that consumer on the server until leave.
    pub async fn subscribe(
        &mut self,
        ctx: &RecvContext<'_>,
        producer: &NewProducer,
    ) -> Result<ConsumerId, ClientError> {
        let params = ctx
            .signaling
            .subscribe(producer.producer_id, ctx.capabilities.clone())
            .await?;
        let track = match ctx.transport.consume(&params) {
            Ok(track) => track,
            Err(e) => {
                // No unsubscribe request exists; the server keeps this
                // consumer until the producer closes or the peer leaves.
                warn!(
                    target: "room_client.reconciler",
                    consumer_id = %params.id,
                    producer_id = %params.producer_id,
                    error = %e,
                    "Local consume failed, server-side consumer left orphaned"
                );
                return Err(e);
            }
        };

        self.consumers.insert(params.id, params.producer_id);
        self.streams.add_track(
            params.peer_id,
            &params.name,
            RemoteTrack {
                consumer_id: params.id,
                producer_id: params.producer_id,
                track,
            },
        );

        info!(
            target: "room_client.reconciler",
            consumer_id = %params.id,
            producer_id = %params.producer_id,
            peer_id = %params.peer_id,
            kind = %params.kind,
            "Subscribed"
        );
        Ok(params.id)
    }

    /// React to a `newProducer` notification.
    ///
    /// `ctx` is `None` while the recv transport or device capabilities are
    /// missing.
    pub async fn on_new_producer(
        &mut self,
        ctx: Option<RecvContext<'_>>,
        event: NewProducer,
    ) -> Result<Reaction, ClientError> {
        if event.peer_id == self.self_peer {
            return Ok(Reaction::Dropped(DropReason::OwnProducer));
        }
        if self.is_consuming(&event.producer_id) {
            debug!(target: "room_client.reconciler", producer_id = %event.producer_id, "Already consuming producer");
            return Ok(Reaction::Dropped(DropReason::AlreadyConsuming));
        }
        let Some(ctx) = ctx else {
            debug!(
                target: "room_client.reconciler",
                producer_id = %event.producer_id,
                peer_id = %event.peer_id,
                "Dropping newProducer, recv transport not ready"
            );
            return Ok(Reaction::Dropped(DropReason::NotReady));
        };

        let consumer_id = self.subscribe(&ctx, &event).await?;
        Ok(Reaction::Subscribed(consumer_id))
    }

    /// React to a `producerClosed` notification; returns the number of
    /// consumers removed.
    pub fn on_producer_closed(&mut self, producer_id: &ProducerId) -> usize {
        self.consumers.retain(|_, source| source != producer_id);
        let removed = self.streams.remove_producer(producer_id);
        if !removed.is_empty() {
            info!(
                target: "room_client.reconciler",
                producer_id = %producer_id,
                consumers = removed.len(),
                "Producer closed, consumers removed"
            );
        }
        removed.len()
    }

    #[must_use]
    pub fn is_consuming(&self, producer_id: &ProducerId) -> bool {
        self.consumers.values().any(|source| source == producer_id)
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn streams(&self) -> &RemoteStreams {
        &self.streams
    }

    /// Stop every track and forget all consumers.
    pub fn clear(&mut self) {
        self.consumers.clear();
        self.streams.clear();
    }
}
