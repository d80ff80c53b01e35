//! Local media device abstraction.
//!
//! The device is the client-side counterpart of the server's media engine:
//! it derives its own capability descriptor from the router's, builds the
//! local ends of the send and recv transports, describes outgoing tracks
//! for `publish` and turns subscribe results into playable tracks.
//!
//! [`SimulatedDevice`] backs the demo binary and the tests. It moves no
//! media but keeps track state, so teardown can be observed.

use crate::errors::ClientError;
use common::types::TransportId;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use signaling_protocol::{
    Capabilities, ConsumerParams, DtlsParameters, MediaKind, MediaParameters, TransportDirection,
    TransportParams,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Client media device.
pub trait MediaDevice: Send + Sync {
    /// Load the router capabilities; returns the device's own descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Device`] if device and router share no codec.
    fn load(&self, router_capabilities: &Capabilities) -> Result<Capabilities, ClientError>;

    /// Whether the loaded device can send media of `kind`.
    fn can_produce(&self, kind: MediaKind) -> bool;

    /// Kinds of the local tracks available for publishing.
    fn local_track_kinds(&self) -> Vec<MediaKind>;

    /// Build the local end of a server-created transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] before [`MediaDevice::load`].
    fn create_transport(
        &self,
        direction: TransportDirection,
        params: &TransportParams,
    ) -> Result<Arc<dyn LocalTransport>, ClientError>;
}

/// Local end of a transport.
pub trait LocalTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn direction(&self) -> TransportDirection;

    /// DTLS parameters presented to the server in `connectTransport`.
    fn dtls_parameters(&self) -> DtlsParameters;

    /// Media parameters for publishing a local track of `kind`.
    fn prepare_produce(&self, kind: MediaKind) -> Result<MediaParameters, ClientError>;

    /// Attach a subscribed track.
    fn consume(&self, params: &ConsumerParams) -> Result<Arc<dyn MediaTrack>, ClientError>;

    /// Close the transport and stop every track consumed on it. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A playable media track.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Stop playback. Idempotent.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// In-process media device.
pub struct SimulatedDevice {
    mime_types: Vec<String>,
    track_kinds: Vec<MediaKind>,
    loaded: RwLock<Option<Capabilities>>,
    ssrc: Arc<AtomicU32>,
}

impl SimulatedDevice {
    /// Device with Opus and VP8 and one local audio and video track.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mime_types: vec!["audio/opus".to_string(), "video/vp8".to_string()],
            track_kinds: vec![MediaKind::Audio, MediaKind::Video],
            loaded: RwLock::new(None),
            ssrc: Arc::new(AtomicU32::new(1000)),
        }
    }

    /// Replace the supported codec list (MIME types, case-insensitive).
    #[must_use]
    pub fn with_codecs<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mime_types = mime_types
            .into_iter()
            .map(|mime| mime.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    /// Replace the local track kinds.
    #[must_use]
    pub fn with_track_kinds(mut self, kinds: Vec<MediaKind>) -> Self {
        self.track_kinds = kinds;
        self
    }

    /// Descriptor computed by the last successful `load`.
    #[must_use]
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.loaded.read().clone()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDevice for SimulatedDevice {
    fn load(&self, router_capabilities: &Capabilities) -> Result<Capabilities, ClientError> {
        let codecs: Vec<Value> = router_capabilities
            .0
            .get("codecs")
            .and_then(Value::as_array)
            .map(|codecs| {
                codecs
                    .iter()
                    .filter(|codec| {
                        codec
                            .get("mimeType")
                            .and_then(Value::as_str)
                            .is_some_and(|mime| self.mime_types.contains(&mime.to_ascii_lowercase()))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if codecs.is_empty() {
            return Err(ClientError::Device(
                "no codec in common with the router".to_string(),
            ));
        }

        let capabilities = Capabilities(json!({
            "codecs": codecs,
            "headerExtensions": []
        }));
        *self.loaded.write() = Some(capabilities.clone());
        Ok(capabilities)
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        self.loaded
            .read()
            .as_ref()
            .is_some_and(|capabilities| capabilities.supports_kind(kind))
    }

    fn local_track_kinds(&self) -> Vec<MediaKind> {
        self.track_kinds.clone()
    }

    fn create_transport(
        &self,
        direction: TransportDirection,
        params: &TransportParams,
    ) -> Result<Arc<dyn LocalTransport>, ClientError> {
        let capabilities = self
            .loaded
            .read()
            .clone()
            .ok_or(ClientError::NotReady("device not loaded"))?;

        let fingerprint = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        Ok(Arc::new(SimulatedTransport {
            id: params.id,
            direction,
            dtls_parameters: DtlsParameters(json!({
                "role": "client",
                "fingerprints": [{ "algorithm": "sha-256", "value": fingerprint }]
            })),
            capabilities,
            ssrc: Arc::clone(&self.ssrc),
            closed: AtomicBool::new(false),
            tracks: Mutex::new(Vec::new()),
        }))
    }
}

struct SimulatedTransport {
    id: TransportId,
    direction: TransportDirection,
    dtls_parameters: DtlsParameters,
    capabilities: Capabilities,
    ssrc: Arc<AtomicU32>,
    closed: AtomicBool,
    tracks: Mutex<Vec<Arc<SimulatedTrack>>>,
}

impl LocalTransport for SimulatedTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    fn dtls_parameters(&self) -> DtlsParameters {
        self.dtls_parameters.clone()
    }

    fn prepare_produce(&self, kind: MediaKind) -> Result<MediaParameters, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Device("transport closed".to_string()));
        }
        if self.direction != TransportDirection::Send {
            return Err(ClientError::Device(
                "cannot produce on a recv transport".to_string(),
            ));
        }

        let prefix = format!("{kind}/");
        let codecs: Vec<Value> = self
            .capabilities
            .0
            .get("codecs")
            .and_then(Value::as_array)
            .map(|codecs| {
                codecs
                    .iter()
                    .filter(|codec| {
                        codec
                            .get("mimeType")
                            .and_then(Value::as_str)
                            .is_some_and(|mime| mime.to_ascii_lowercase().starts_with(&prefix))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if codecs.is_empty() {
            return Err(ClientError::Device(format!("cannot produce {kind}")));
        }

        Ok(MediaParameters(json!({
            "codecs": codecs,
            "encodings": [{ "ssrc": self.ssrc.fetch_add(1, Ordering::Relaxed) }],
            "rtcp": { "cname": self.id.to_string() }
        })))
    }

    fn consume(&self, params: &ConsumerParams) -> Result<Arc<dyn MediaTrack>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Device("transport closed".to_string()));
        }
        if self.direction != TransportDirection::Recv {
            return Err(ClientError::Device(
                "cannot consume on a send transport".to_string(),
            ));
        }

        let track = Arc::new(SimulatedTrack {
            id: params.id.to_string(),
            kind: params.kind,
            live: AtomicBool::new(true),
        });
        self.tracks.lock().push(Arc::clone(&track));
        Ok(track)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for track in self.tracks.lock().drain(..) {
            track.stop();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct SimulatedTrack {
    id: String,
    kind: MediaKind,
    live: AtomicBool,
}

impl MediaTrack for SimulatedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::{ConsumerId, PeerId, ProducerId};

    fn router_capabilities() -> Capabilities {
        Capabilities(json!({
            "codecs": [
                { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
            ]
        }))
    }

    fn transport_params() -> TransportParams {
        TransportParams {
            id: TransportId::new(),
            ice_parameters: json!({}),
            ice_candidates: json!([]),
            dtls_parameters: DtlsParameters(json!({ "role": "auto" })),
            sctp_parameters: None,
        }
    }

    fn consumer_params(kind: MediaKind) -> ConsumerParams {
        ConsumerParams {
            id: ConsumerId::new(),
            kind,
            media_params: MediaParameters(json!({ "codecs": [] })),
            producer_id: ProducerId::new(),
            peer_id: PeerId::new(),
            name: "bob".to_string(),
        }
    }

    #[test]
    fn test_load_intersects_codecs() {
        let device = SimulatedDevice::new().with_codecs(["audio/opus"]);

        let capabilities = device.load(&router_capabilities()).unwrap();

        assert_eq!(capabilities.codec_mime_types(), vec!["audio/opus"]);
        assert!(device.can_produce(MediaKind::Audio));
        assert!(!device.can_produce(MediaKind::Video));
    }

    #[test]
    fn test_load_without_common_codec_fails() {
        let device = SimulatedDevice::new().with_codecs(["video/h264"]);

        let result = device.load(&router_capabilities());

        assert!(matches!(result, Err(ClientError::Device(_))));
        assert!(device.capabilities().is_none());
        assert!(!device.can_produce(MediaKind::Video));
    }

    #[test]
    fn test_transport_requires_load() {
        let device = SimulatedDevice::new();

        let result = device.create_transport(TransportDirection::Send, &transport_params());

        assert!(matches!(result, Err(ClientError::NotReady(_))));
    }

    #[test]
    fn test_prepare_produce_lists_codecs_of_kind() {
        let device = SimulatedDevice::new();
        device.load(&router_capabilities()).unwrap();
        let params = transport_params();
        let transport = device
            .create_transport(TransportDirection::Send, &params)
            .unwrap();

        assert_eq!(transport.id(), params.id);
        let media = transport.prepare_produce(MediaKind::Video).unwrap();
        assert_eq!(media.codec_mime_types(), vec!["video/vp8"]);
        assert!(transport.consume(&consumer_params(MediaKind::Audio)).is_err());
    }

    #[test]
    fn test_close_stops_consumed_tracks() {
        let device = SimulatedDevice::new();
        device.load(&router_capabilities()).unwrap();
        let transport = device
            .create_transport(TransportDirection::Recv, &transport_params())
            .unwrap();

        let audio = transport.consume(&consumer_params(MediaKind::Audio)).unwrap();
        let video = transport.consume(&consumer_params(MediaKind::Video)).unwrap();
        assert!(audio.is_live() && video.is_live());
        assert!(transport.prepare_produce(MediaKind::Audio).is_err());

        transport.close();
        transport.close();

        assert!(transport.is_closed());
        assert!(!audio.is_live());
        assert!(!video.is_live());
        assert!(transport.consume(&consumer_params(MediaKind::Audio)).is_err());
    }
}
