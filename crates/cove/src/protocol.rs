//! Wire format for the per-channel signaling topic.
//!
//! Every message is a JSON envelope `{destination, msg}` where `msg` carries
//! its kind under `m` and the remaining fields use the short names browser
//! peers already speak: `c` sender client id, `u` sender username, `fc`
//! target client id, `fp` originating peer-session id, `o`/`a` session
//! descriptions, `i` an ICE candidate, `d` an opaque payload, `s` the
//! talking flag, `p` the peer asked to start streaming.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::ClientId;

/// Session description exchanged as offer or answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".into(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".into(),
            sdp: sdp.into(),
        }
    }
}

/// Connectivity-establishment hint exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "m")]
pub enum SignalPayload {
    /// Sender is present and capture-ready.
    #[serde(rename = "imActive")]
    ImActive { c: ClientId, u: String },
    /// Liveness probe; recipients re-announce.
    #[serde(rename = "doPing")]
    DoPing,
    /// Voice-activity transition.
    #[serde(rename = "isTalking")]
    IsTalking { s: bool, u: String, c: ClientId },
    /// Opaque application payload.
    #[serde(rename = "dataPacket")]
    DataPacket { d: Value, u: String, c: ClientId },
    /// Sender asks peer `p` to initiate an outgoing session toward it.
    #[serde(rename = "streamReq")]
    StreamReq { c: ClientId, u: String, p: ClientId },
    /// Session offer addressed to `fc`, originated under peer-session `fp`.
    #[serde(rename = "rtcOffer")]
    RtcOffer {
        fc: ClientId,
        fp: ClientId,
        o: SessionDescription,
    },
    /// Candidate for the recipient's incoming session.
    #[serde(rename = "iceCand")]
    IceCand {
        fc: ClientId,
        fp: ClientId,
        i: IceCandidate,
    },
    /// Session answer from `c`, addressed to `fc`.
    #[serde(rename = "rtcAns")]
    RtcAns {
        c: ClientId,
        fc: ClientId,
        a: SessionDescription,
    },
    /// Candidate for the recipient's outgoing session.
    #[serde(rename = "cliIce")]
    CliIce {
        c: ClientId,
        fc: ClientId,
        i: IceCandidate,
    },
    /// Sender is leaving; recipients tear down that peer.
    #[serde(rename = "disconnectng")]
    Disconnecting { u: String, c: ClientId },
}

impl SignalPayload {
    /// Sender id for loop suppression, where the message carries one.
    pub fn sender(&self) -> Option<&ClientId> {
        match self {
            SignalPayload::ImActive { c, .. }
            | SignalPayload::IsTalking { c, .. }
            | SignalPayload::DataPacket { c, .. }
            | SignalPayload::StreamReq { c, .. }
            | SignalPayload::RtcAns { c, .. }
            | SignalPayload::CliIce { c, .. }
            | SignalPayload::Disconnecting { c, .. } => Some(c),
            SignalPayload::RtcOffer { fp, .. } | SignalPayload::IceCand { fp, .. } => Some(fp),
            SignalPayload::DoPing => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::ImActive { .. } => "imActive",
            SignalPayload::DoPing => "doPing",
            SignalPayload::IsTalking { .. } => "isTalking",
            SignalPayload::DataPacket { .. } => "dataPacket",
            SignalPayload::StreamReq { .. } => "streamReq",
            SignalPayload::RtcOffer { .. } => "rtcOffer",
            SignalPayload::IceCand { .. } => "iceCand",
            SignalPayload::RtcAns { .. } => "rtcAns",
            SignalPayload::CliIce { .. } => "cliIce",
            SignalPayload::Disconnecting { .. } => "disconnectng",
        }
    }
}
