//! Remote stream assembly.
//!
//! Consumed tracks are grouped into one bundle per source peer. Removing a
//! producer stops and drops only the tracks consumed from it; the peer's
//! other tracks stay attached.

use crate::device::MediaTrack;
use common::types::{ConsumerId, PeerId, ProducerId};
use signaling_protocol::MediaKind;
use std::collections::HashMap;
use std::sync::Arc;

/// One consumed track.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub track: Arc<dyn MediaTrack>,
}

/// The tracks received from one peer.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    name: String,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Display name of the source peer.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<MediaKind> {
        self.tracks.iter().map(|t| t.track.kind()).collect()
    }
}

/// Remote streams keyed by source peer.
#[derive(Debug, Default)]
pub struct RemoteStreams {
    streams: HashMap<PeerId, RemoteStream>,
}

impl RemoteStreams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track to `peer_id`'s bundle, creating the bundle if needed.
    pub fn add_track(&mut self, peer_id: PeerId, name: &str, track: RemoteTrack) {
        self.streams
            .entry(peer_id)
            .or_insert_with(|| RemoteStream {
                name: name.to_string(),
                tracks: Vec::new(),
            })
            .tracks
            .push(track);
    }

    /// Stop and remove every track consumed from `producer_id`.
    ///
    /// Bundles left without tracks are removed. Returns the consumers whose
    /// tracks were removed.
    pub fn remove_producer(&mut self, producer_id: &ProducerId) -> Vec<ConsumerId> {
        let mut removed = Vec::new();
        for stream in self.streams.values_mut() {
            stream.tracks.retain(|remote| {
                if remote.producer_id == *producer_id {
                    remote.track.stop();
                    removed.push(remote.consumer_id);
                    false
                } else {
                    true
                }
            });
        }
        self.streams.retain(|_, stream| !stream.tracks.is_empty());
        removed
    }

    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&RemoteStream> {
        self.streams.get(peer_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.streams.keys()
    }

    /// Number of bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Total number of tracks across all bundles.
    #[must_use]
    pub fn track_count(&self) -> usize {
        self.streams.values().map(|s| s.tracks.len()).sum()
    }

    /// Stop every track and drop all bundles.
    pub fn clear(&mut self) {
        for stream in self.streams.values() {
            for remote in &stream.tracks {
                remote.track.stop();
            }
        }
        self.streams.clear();
    }
}
