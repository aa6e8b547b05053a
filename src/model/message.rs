//! Colibri wire messages
//!
//! Every frame on the channel is a JSON object whose `colibriClass` field
//! names its type. Decoding happens in two steps: the discriminator is pulled
//! out first, then the rest of the object is parsed into the matching struct.
//! Classes this client does not model land in [`ColibriMessage::Unknown`]
//! instead of failing.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Name of the discriminator field.
pub const DISCRIMINATOR: &str = "colibriClass";

/// A decoded Colibri message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "colibriClass")]
pub enum ColibriMessage {
    ServerHello(ServerHello),
    ClientHello(ClientHello),
    EndpointMessage(EndpointMessage),
    DominantSpeakerEndpointChangeEvent(DominantSpeakerChange),
    EndpointConnectivityStatusChangeEvent(ConnectivityStatusChange),
    SenderVideoConstraints(SenderVideoConstraints),
    ReceiverVideoConstraints(ReceiverVideoConstraints),
    /// Any class this client does not model. Never encoded.
    #[serde(skip)]
    Unknown { colibri_class: String, body: Value },
}

/// Greeting sent by the bridge once the channel is open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerHello {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Handshake reply to [`ServerHello`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {}

/// Free-form data relayed between conference participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DominantSpeakerChange {
    pub dominant_speaker_endpoint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_speakers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityStatusChange {
    pub endpoint: String,
    /// Sent by the bridge as `"true"` / `"false"`.
    #[serde(
        deserialize_with = "flag_from_bool_or_string",
        serialize_with = "flag_as_string"
    )]
    pub active: bool,
}

/// Constraints the bridge applies to what this endpoint sends. Ignored here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderVideoConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_constraints: Option<Value>,
}

/// Declares how much video this endpoint wants forwarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverVideoConstraints {
    pub last_n: i32,
    #[serde(default)]
    pub default_constraints: Map<String, Value>,
}

impl ReceiverVideoConstraints {
    /// `lastN = 0`: no video streams needed.
    pub fn no_video() -> Self {
        Self {
            last_n: 0,
            default_constraints: Map::new(),
        }
    }
}

impl ColibriMessage {
    /// Decodes one text frame.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw).map_err(DecodeError::Json)?;
        let Value::Object(mut object) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let colibri_class = match object.remove(DISCRIMINATOR) {
            Some(Value::String(class)) => class,
            _ => return Err(DecodeError::MissingDiscriminator),
        };
        let body = Value::Object(object);

        let message = match colibri_class.as_str() {
            "ServerHello" => Self::ServerHello(typed_body(&colibri_class, body)?),
            "ClientHello" => Self::ClientHello(typed_body(&colibri_class, body)?),
            "EndpointMessage" => Self::EndpointMessage(typed_body(&colibri_class, body)?),
            "DominantSpeakerEndpointChangeEvent" => {
                Self::DominantSpeakerEndpointChangeEvent(typed_body(&colibri_class, body)?)
            }
            "EndpointConnectivityStatusChangeEvent" => {
                Self::EndpointConnectivityStatusChangeEvent(typed_body(&colibri_class, body)?)
            }
            "SenderVideoConstraints" => {
                Self::SenderVideoConstraints(typed_body(&colibri_class, body)?)
            }
            "ReceiverVideoConstraints" => {
                Self::ReceiverVideoConstraints(typed_body(&colibri_class, body)?)
            }
            _ => Self::Unknown {
                colibri_class,
                body,
            },
        };

        Ok(message)
    }

    /// Serialises the message as a text frame.
    pub fn encode(&self) -> Result<String, DecodeError> {
        serde_json::to_string(self).map_err(DecodeError::Encode)
    }

    /// The discriminator value of this message.
    pub fn colibri_class(&self) -> &str {
        match self {
            Self::ServerHello(_) => "ServerHello",
            Self::ClientHello(_) => "ClientHello",
            Self::EndpointMessage(_) => "EndpointMessage",
            Self::DominantSpeakerEndpointChangeEvent(_) => "DominantSpeakerEndpointChangeEvent",
            Self::EndpointConnectivityStatusChangeEvent(_) => {
                "EndpointConnectivityStatusChangeEvent"
            }
            Self::SenderVideoConstraints(_) => "SenderVideoConstraints",
            Self::ReceiverVideoConstraints(_) => "ReceiverVideoConstraints",
            Self::Unknown { colibri_class, .. } => colibri_class,
        }
    }
}

fn typed_body<T: DeserializeOwned>(colibri_class: &str, body: Value) -> Result<T, DecodeError> {
    serde_json::from_value(body).map_err(|source| DecodeError::Malformed {
        colibri_class: colibri_class.to_string(),
        source,
    })
}

fn flag_from_bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => Ok(flag),
        Flag::Text(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        Flag::Text(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        Flag::Text(text) => Err(de::Error::custom(format!(
            "expected \"true\" or \"false\", got {text:?}"
        ))),
    }
}

fn flag_as_string<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *flag { "true" } else { "false" })
}
