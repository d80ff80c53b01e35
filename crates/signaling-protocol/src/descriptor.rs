//! Media descriptors exchanged during negotiation.
//!
//! The descriptors are produced and interpreted by the media engine and the
//! client media device. Signaling only carries them, so they are kept as
//! opaque JSON. The `codec_mime_types` helpers read the one field the
//! simulated collaborators need for compatibility checks.

use common::types::TransportId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a transport, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// Outbound: carries the peer's producers
    Send,
    /// Inbound: carries the peer's consumers
    Recv,
}

impl TransportDirection {
    /// Returns the direction as a string for logs and error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability descriptor: the media formats a router or device supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(pub Value);

impl Capabilities {
    /// Lower-cased `mimeType` of every entry in `codecs`.
    #[must_use]
    pub fn codec_mime_types(&self) -> Vec<String> {
        codec_mime_types(&self.0)
    }

    /// Whether any listed codec carries media of the given kind.
    #[must_use]
    pub fn supports_kind(&self, kind: MediaKind) -> bool {
        let prefix = format!("{}/", kind.as_str());
        self.codec_mime_types()
            .iter()
            .any(|mime| mime.starts_with(&prefix))
    }
}

/// DTLS parameters a client presents when connecting a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

/// RTP parameters of a produced or consumed track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaParameters(pub Value);

impl MediaParameters {
    /// Lower-cased `mimeType` of every entry in `codecs`.
    #[must_use]
    pub fn codec_mime_types(&self) -> Vec<String> {
        codec_mime_types(&self.0)
    }
}

/// Connection parameters the engine issues for a new transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: DtlsParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
}

fn codec_mime_types(value: &Value) -> Vec<String> {
    value
        .get("codecs")
        .and_then(Value::as_array)
        .map(|codecs| {
            codecs
                .iter()
                .filter_map(|codec| codec.get("mimeType").and_then(Value::as_str))
                .map(str::to_ascii_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codec_mime_types_lowercased() {
        let caps = Capabilities(json!({
            "codecs": [
                { "kind": "audio", "mimeType": "audio/opus" },
                { "kind": "video", "mimeType": "video/VP8" }
            ]
        }));
        assert_eq!(caps.codec_mime_types(), vec!["audio/opus", "video/vp8"]);
        assert!(caps.supports_kind(MediaKind::Audio));
        assert!(caps.supports_kind(MediaKind::Video));
    }

    #[test]
    fn test_codec_mime_types_missing_codecs() {
        let caps = Capabilities(json!({ "headerExtensions": [] }));
        assert!(caps.codec_mime_types().is_empty());
        assert!(!caps.supports_kind(MediaKind::Audio));

        let params = MediaParameters(json!("garbage"));
        assert!(params.codec_mime_types().is_empty());
    }

    #[test]
    fn test_kind_and_direction_wire_names() {
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
        assert_eq!(
            serde_json::from_str::<TransportDirection>("\"recv\"").unwrap(),
            TransportDirection::Recv
        );
        assert!(serde_json::from_str::<TransportDirection>("\"sideways\"").is_err());
    }

    #[test]
    fn test_transport_params_omit_missing_sctp() {
        let params = TransportParams {
            id: TransportId::new(),
            ice_parameters: json!({}),
            ice_candidates: json!([]),
            dtls_parameters: DtlsParameters(json!({ "role": "auto" })),
            sctp_parameters: None,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert!(value.get("sctpParameters").is_none());
        assert_eq!(value["dtlsParameters"]["role"], "auto");
    }
}
