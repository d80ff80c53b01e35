//! Request, ack and notification types.

use crate::codec::ProtocolError;
use crate::descriptor::{
    Capabilities, DtlsParameters, MediaKind, MediaParameters, TransportDirection, TransportParams,
};
use common::types::{ConsumerId, PeerId, ProducerId, RoomId, TransportId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Request kinds, used for dispatch, logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Join,
    GetCapabilities,
    CreateTransport,
    ConnectTransport,
    Publish,
    ListProducers,
    Subscribe,
    Leave,
}

impl Method {
    /// All request kinds.
    pub const ALL: [Method; 8] = [
        Method::Join,
        Method::GetCapabilities,
        Method::CreateTransport,
        Method::ConnectTransport,
        Method::Publish,
        Method::ListProducers,
        Method::Subscribe,
        Method::Leave,
    ];

    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Join => "join",
            Method::GetCapabilities => "getCapabilities",
            Method::CreateTransport => "createTransport",
            Method::ConnectTransport => "connectTransport",
            Method::Publish => "publish",
            Method::ListProducers => "listProducers",
            Method::Subscribe => "subscribe",
            Method::Leave => "leave",
        }
    }

    /// Failure text for a request naming an id this server never issued.
    /// Matches the answer for an issued id that no longer exists.
    #[must_use]
    pub const fn unknown_id_message(&self) -> &'static str {
        match self {
            Method::ConnectTransport => "transport not found",
            Method::Publish => "send transport not found",
            Method::Subscribe => "producer not found",
            _ => "unknown id",
        }
    }

    /// Look up a method by wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: TransportId,
    pub dtls_params: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub media_params: MediaParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub producer_id: ProducerId,
    pub capabilities: Capabilities,
}

/// A client request. Serialized as `{"method": ..., "data": ...}`; the
/// field-less kinds carry no `data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum Request {
    Join(JoinRequest),
    GetCapabilities,
    CreateTransport(CreateTransportRequest),
    ConnectTransport(ConnectTransportRequest),
    Publish(PublishRequest),
    ListProducers,
    Subscribe(SubscribeRequest),
    Leave,
}

impl Request {
    /// The request kind.
    #[must_use]
    pub const fn method(&self) -> Method {
        match self {
            Request::Join(_) => Method::Join,
            Request::GetCapabilities => Method::GetCapabilities,
            Request::CreateTransport(_) => Method::CreateTransport,
            Request::ConnectTransport(_) => Method::ConnectTransport,
            Request::Publish(_) => Method::Publish,
            Request::ListProducers => Method::ListProducers,
            Request::Subscribe(_) => Method::Subscribe,
            Request::Leave => Method::Leave,
        }
    }

    /// Build a request from its wire method name and raw `data` value.
    ///
    /// Field-less kinds ignore `data`. Structural problems are reported
    /// per kind; `join` reports missing fields the same way it reports
    /// blank ones.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownMethod`] for unrecognised methods and
    /// [`ProtocolError::Validation`] / [`ProtocolError::InvalidRequest`] for
    /// bad payloads. A transport or producer id that cannot have been issued
    /// by the server gives [`ProtocolError::UnknownId`].
    pub fn from_parts(method: &str, data: Option<Value>) -> Result<Self, ProtocolError> {
        let method = Method::from_wire(method)
            .ok_or_else(|| ProtocolError::UnknownMethod(method.to_string()))?;
        let data = data.unwrap_or(Value::Null);

        let request = match method {
            Method::Join => Request::Join(
                serde_json::from_value(data)
                    .map_err(|_| ProtocolError::Validation(JOIN_FIELDS_REQUIRED.to_string()))?,
            ),
            Method::GetCapabilities => Request::GetCapabilities,
            Method::CreateTransport => Request::CreateTransport(parse_fields(method, data)?),
            Method::ConnectTransport => {
                check_id::<TransportId>(method, &data, "transportId")?;
                Request::ConnectTransport(parse_fields(method, data)?)
            }
            Method::Publish => {
                check_id::<TransportId>(method, &data, "transportId")?;
                Request::Publish(parse_fields(method, data)?)
            }
            Method::ListProducers => Request::ListProducers,
            Method::Subscribe => {
                check_id::<ProducerId>(method, &data, "producerId")?;
                Request::Subscribe(parse_fields(method, data)?)
            }
            Method::Leave => Request::Leave,
        };

        request.validate()?;
        Ok(request)
    }

    /// Check the field-level constraints that types alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Validation`] when a required string is blank.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Request::Join(join) if join.room_id.is_blank() || join.name.trim().is_empty() => {
                Err(ProtocolError::Validation(JOIN_FIELDS_REQUIRED.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Error text for a join without a room id or display name.
pub const JOIN_FIELDS_REQUIRED: &str = "roomId and name required";

/// Ids are plain strings on the wire. A non-blank id that does not parse
/// names nothing this server issued and is reported as [`ProtocolError::UnknownId`].
/// Missing or non-string ids are left to the typed parse.
fn check_id<T: FromStr>(
    method: Method,
    data: &Value,
    field: &'static str,
) -> Result<(), ProtocolError> {
    let Some(value) = data.get(field).and_then(Value::as_str) else {
        return Ok(());
    };
    if value.trim().is_empty() {
        return Err(ProtocolError::Validation(format!("{field} required")));
    }
    if value.parse::<T>().is_err() {
        return Err(ProtocolError::UnknownId {
            method,
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_fields<T: DeserializeOwned>(method: Method, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidRequest {
        method: method.as_str(),
        reason: e.to_string(),
    })
}

/// A request paired with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCreated {
    pub transport_params: TransportParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub producer_id: ProducerId,
}

/// One entry of a room's producer list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub peer_id: PeerId,
    pub kind: MediaKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerList {
    pub producers: Vec<ProducerInfo>,
}

/// Successful subscribe result: everything the client needs to attach the
/// consumed track and label it with its source peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: ConsumerId,
    pub kind: MediaKind,
    pub media_params: MediaParameters,
    pub producer_id: ProducerId,
    pub peer_id: PeerId,
    pub name: String,
}

/// Ack for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Successful ack carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Serialization`] if the payload cannot be
    /// represented as JSON.
    pub fn success(id: u64, payload: &impl Serialize) -> Result<Self, ProtocolError> {
        let data = serde_json::to_value(payload)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        })
    }

    /// Successful ack without payload.
    #[must_use]
    pub fn empty(id: u64) -> Self {
        Self {
            id,
            ok: true,
            data: None,
            error: None,
        }
    }

    /// Failure ack.
    #[must_use]
    pub fn failure(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Decode the payload of a successful ack.
    ///
    /// A missing payload decodes as JSON `null`, which lets unit-like
    /// results (`()`) through.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Rejected`] for `ok: false` acks and
    /// [`ProtocolError::InvalidResponse`] if the payload has the wrong shape.
    pub fn into_payload<T: DeserializeOwned>(self) -> Result<T, ProtocolError> {
        if !self.ok {
            return Err(ProtocolError::Rejected(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        serde_json::from_value(self.data.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProducer {
    pub producer_id: ProducerId,
    pub peer_id: PeerId,
    pub kind: MediaKind,
    pub name: String,
}

impl From<ProducerInfo> for NewProducer {
    fn from(info: ProducerInfo) -> Self {
        Self {
            producer_id: info.producer_id,
            peer_id: info.peer_id,
            kind: info.kind,
            name: info.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerClosed {
    pub producer_id: ProducerId,
}

/// Unsolicited server-to-client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum Notification {
    NewProducer(NewProducer),
    ProducerClosed(ProducerClosed),
}

impl Notification {
    /// Wire name of the notification.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Notification::NewProducer(_) => "newProducer",
            Notification::ProducerClosed(_) => "producerClosed",
        }
    }
}

/// Everything the server writes to a client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Response(Response),
    Notification(Notification),
}
