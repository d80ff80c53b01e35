//! Pre-configured test data fixtures for RC testing.
//!
//! Provides builders and test data for:
//! - Router and device capability descriptors
//! - Media and DTLS parameters the engines accept
//! - Test peers and their join requests

use common::types::RoomId;
use serde_json::{json, Value};
use signaling_protocol::{
    Capabilities, DtlsParameters, JoinRequest, MediaKind, MediaParameters, Request,
};
use uuid::Uuid;

fn codec(mime_type: &str) -> Value {
    let lower = mime_type.to_ascii_lowercase();
    if lower.starts_with("audio/") {
        json!({ "kind": "audio", "mimeType": mime_type, "clockRate": 48000, "channels": 2 })
    } else {
        json!({ "kind": "video", "mimeType": mime_type, "clockRate": 90000 })
    }
}

/// Router capabilities with Opus and VP8, matching the simulated engine.
#[must_use]
pub fn router_capabilities() -> Capabilities {
    capabilities_with(&["audio/opus", "video/VP8"])
}

/// Capability descriptor listing exactly `mime_types`.
#[must_use]
pub fn capabilities_with(mime_types: &[&str]) -> Capabilities {
    let codecs: Vec<Value> = mime_types.iter().map(|mime| codec(mime)).collect();
    Capabilities(json!({ "codecs": codecs, "headerExtensions": [] }))
}

/// Media parameters for a track of `kind` in the default codec.
#[must_use]
pub fn media_params(kind: MediaKind) -> MediaParameters {
    let mime_type = match kind {
        MediaKind::Audio => "audio/opus",
        MediaKind::Video => "video/VP8",
    };
    MediaParameters(json!({
        "codecs": [codec(mime_type)],
        "encodings": [{ "ssrc": 1111 }],
        "rtcp": { "cname": "test" }
    }))
}

/// Client DTLS parameters.
#[must_use]
pub fn dtls_params() -> DtlsParameters {
    DtlsParameters(json!({
        "role": "client",
        "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB" }]
    }))
}

/// Test peer fixture.
#[derive(Debug, Clone)]
pub struct TestPeer {
    /// Display name.
    pub name: String,
    /// Room the peer joins.
    pub room_id: RoomId,
}

impl TestPeer {
    /// Create a test peer joining room "r1".
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            room_id: RoomId::from("r1"),
        }
    }

    /// Set the room.
    #[must_use]
    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = RoomId::new(room_id);
        self
    }

    /// Put the peer in a room with a random ID.
    #[must_use]
    pub fn in_random_room(self) -> Self {
        let room = format!("room-{}", Uuid::new_v4());
        self.in_room(room)
    }

    /// The peer's join request.
    #[must_use]
    pub fn join_request(&self) -> Request {
        Request::Join(JoinRequest {
            room_id: self.room_id.clone(),
            name: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_fixture() {
        let caps = router_capabilities();
        assert_eq!(caps.codec_mime_types(), vec!["audio/opus", "video/vp8"]);
        assert!(caps.supports_kind(MediaKind::Audio));
        assert!(caps.supports_kind(MediaKind::Video));

        let audio_only = capabilities_with(&["audio/opus"]);
        assert!(!audio_only.supports_kind(MediaKind::Video));
    }

    #[test]
    fn test_media_params_fixture() {
        assert_eq!(
            media_params(MediaKind::Video).codec_mime_types(),
            vec!["video/vp8"]
        );
    }

    #[test]
    fn test_peer_fixture() {
        let peer = TestPeer::new("alice").in_room("r2");
        assert_eq!(peer.room_id.as_str(), "r2");
        assert!(matches!(peer.join_request(), Request::Join(j) if j.name == "alice"));

        let a = TestPeer::new("a").in_random_room();
        let b = TestPeer::new("b").in_random_room();
        assert_ne!(a.room_id, b.room_id);
    }
}
