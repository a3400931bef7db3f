//! JSON messages exchanged with the game host over the relay substream.
//!
//! Every message is a flat JSON object tagged by `payload_type`. Hosts in the
//! wild still emit the short `sdp` / `ice` tags, so those are accepted as
//! aliases of `offer` / `ice-candidate` on receive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::latency::LatencyTrace;
use crate::wire::WireError;

const KIND_JOIN: &str = "join";
const KIND_ANSWER: &str = "answer";
const KIND_OFFER: &str = "offer";
const KIND_ICE_CANDIDATE: &str = "ice-candidate";
const KIND_REQUEST_STREAM_OFFLINE: &str = "request-stream-offline";

const LEGACY_KIND_SDP: &str = "sdp";
const LEGACY_KIND_ICE: &str = "ice";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum JoinerType {
    Node,
    Client,
}

impl TryFrom<i32> for JoinerType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JoinerType::Node),
            1 => Ok(JoinerType::Client),
            other => Err(format!("invalid joiner_type {other}")),
        }
    }
}

impl From<JoinerType> for i32 {
    fn from(value: JoinerType) -> Self {
        match value {
            JoinerType::Node => 0,
            JoinerType::Client => 1,
        }
    }
}

/// Room status reported by the relay in response to a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum AnswerType {
    Offline,
    InUse,
    Ok,
}

impl TryFrom<i32> for AnswerType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AnswerType::Offline),
            1 => Ok(AnswerType::InUse),
            2 => Ok(AnswerType::Ok),
            other => Err(format!("invalid answer_type {other}")),
        }
    }
}

impl From<AnswerType> for i32 {
    fn from(value: AnswerType) -> Self {
        match value {
            AnswerType::Offline => 0,
            AnswerType::InUse => 1,
            AnswerType::Ok => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }
}

/// Browser-compatible `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// The two shapes an `answer` message takes: the relay reporting room status
/// to a joiner, or a session description answering an offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerBody {
    Status(AnswerType),
    Sdp(SessionDescription),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    Join { joiner_type: JoinerType, room: String },
    Answer(AnswerBody),
    Offer(SessionDescription),
    IceCandidate(IceCandidate),
    RequestStreamOffline { data: Value },
}

impl SignalingMessage {
    pub fn client_join(room: impl Into<String>) -> Self {
        SignalingMessage::Join {
            joiner_type: JoinerType::Client,
            room: room.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Join { .. } => KIND_JOIN,
            SignalingMessage::Answer(_) => KIND_ANSWER,
            SignalingMessage::Offer(_) => KIND_OFFER,
            SignalingMessage::IceCandidate(_) => KIND_ICE_CANDIDATE,
            SignalingMessage::RequestStreamOffline { .. } => KIND_REQUEST_STREAM_OFFLINE,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawMessage {
    payload_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latency: Option<LatencyTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    joiner_type: Option<JoinerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer_type: Option<AnswerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Serializes a message, optionally stamping it with a latency trace.
pub fn encode_signaling(
    message: &SignalingMessage,
    latency: Option<&LatencyTrace>,
) -> Result<Vec<u8>, WireError> {
    let mut raw = RawMessage {
        payload_type: message.kind().to_string(),
        latency: latency.cloned(),
        ..RawMessage::default()
    };
    match message {
        SignalingMessage::Join { joiner_type, room } => {
            raw.joiner_type = Some(*joiner_type);
            raw.room = Some(room.clone());
        }
        SignalingMessage::Answer(AnswerBody::Status(status)) => raw.answer_type = Some(*status),
        SignalingMessage::Answer(AnswerBody::Sdp(sdp)) | SignalingMessage::Offer(sdp) => {
            raw.sdp = Some(sdp.clone())
        }
        SignalingMessage::IceCandidate(candidate) => raw.candidate = Some(candidate.clone()),
        SignalingMessage::RequestStreamOffline { data } => raw.data = Some(data.clone()),
    }
    Ok(serde_json::to_vec(&raw)?)
}

/// Parses one signaling frame. Frames of an unknown kind yield `Ok(None)`;
/// a known kind missing its body is an error.
pub fn decode_signaling(bytes: &[u8]) -> Result<Option<SignalingMessage>, WireError> {
    let raw: RawMessage = serde_json::from_slice(bytes)?;
    let message = match raw.payload_type.as_str() {
        KIND_JOIN => SignalingMessage::Join {
            joiner_type: raw
                .joiner_type
                .ok_or(WireError::InvalidData("join without joiner_type"))?,
            room: raw.room.unwrap_or_default(),
        },
        KIND_ANSWER => match (raw.answer_type, raw.sdp) {
            (_, Some(sdp)) => SignalingMessage::Answer(AnswerBody::Sdp(sdp)),
            (Some(status), None) => SignalingMessage::Answer(AnswerBody::Status(status)),
            (None, None) => return Err(WireError::InvalidData("answer without body")),
        },
        KIND_OFFER | LEGACY_KIND_SDP => SignalingMessage::Offer(
            raw.sdp
                .ok_or(WireError::InvalidData("offer without sdp"))?,
        ),
        KIND_ICE_CANDIDATE | LEGACY_KIND_ICE => SignalingMessage::IceCandidate(
            raw.candidate
                .ok_or(WireError::InvalidData("ice-candidate without candidate"))?,
        ),
        KIND_REQUEST_STREAM_OFFLINE => SignalingMessage::RequestStreamOffline {
            data: raw.data.unwrap_or(Value::Null),
        },
        _ => return Ok(None),
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_json(value: Value) -> Result<Option<SignalingMessage>, WireError> {
        decode_signaling(&serde_json::to_vec(&value).unwrap())
    }

    #[test_timeout::timeout]
    fn join_carries_room_and_numeric_joiner_type() {
        let bytes = encode_signaling(&SignalingMessage::client_join("abc123"), None).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"payload_type": "join", "joiner_type": 1, "room": "abc123"})
        );
    }

    #[test_timeout::timeout]
    fn answer_status_and_sdp_are_distinguished() {
        assert_eq!(
            decode_json(json!({"payload_type": "answer", "answer_type": 0})).unwrap(),
            Some(SignalingMessage::Answer(AnswerBody::Status(AnswerType::Offline)))
        );
        assert_eq!(
            decode_json(json!({
                "payload_type": "answer",
                "sdp": {"type": "answer", "sdp": "v=0"}
            }))
            .unwrap(),
            Some(SignalingMessage::Answer(AnswerBody::Sdp(
                SessionDescription::answer("v=0")
            )))
        );
        assert!(decode_json(json!({"payload_type": "answer"})).is_err());
    }

    #[test_timeout::timeout]
    fn legacy_tags_map_onto_offer_and_candidate() {
        let offer = decode_json(json!({
            "payload_type": "sdp",
            "sdp": {"type": "offer", "sdp": "v=0\r\n"}
        }))
        .unwrap();
        assert_eq!(
            offer,
            Some(SignalingMessage::Offer(SessionDescription::offer("v=0\r\n")))
        );

        let ice = decode_json(json!({
            "payload_type": "ice",
            "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.2 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        }))
        .unwrap();
        match ice {
            Some(SignalingMessage::IceCandidate(candidate)) => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
                assert_eq!(candidate.username_fragment, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn unknown_kind_is_ignored_but_garbage_is_an_error() {
        assert_eq!(
            decode_json(json!({"payload_type": "metrics", "usage_cpu": 0.5})).unwrap(),
            None
        );
        assert!(matches!(
            decode_signaling(b"{not json"),
            Err(WireError::Json(_))
        ));
        assert!(decode_json(json!({"payload_type": "join", "joiner_type": 7})).is_err());
    }

    #[test_timeout::timeout]
    fn latency_is_accepted_on_any_kind() {
        let mut trace = LatencyTrace::with_sequence_id("sig-1");
        trace.add_timestamp("client_send");
        let bytes = encode_signaling(
            &SignalingMessage::RequestStreamOffline { data: json!("bye") },
            Some(&trace),
        )
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["latency"]["sequence_id"], "sig-1");
        assert_eq!(
            decode_signaling(&bytes).unwrap(),
            Some(SignalingMessage::RequestStreamOffline { data: json!("bye") })
        );
    }
}
