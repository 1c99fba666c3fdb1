//! Message vocabulary.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tether_core::DeviceId;

use crate::error::CommsError;

/// Acoustic protocol message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// One-way, no bearing.
    Oway,
    /// One-way with azimuth and elevation.
    OwayU,
    /// Request acknowledgement.
    MsgReq,
    /// Acknowledgement.
    MsgResp,
    /// Request acknowledgement with bearing.
    MsgReqU,
    /// Acknowledgement with bearing and range.
    MsgRespU,
    /// Request a full fix.
    MsgReqX,
    /// Full fix: bearing, range and depth.
    MsgRespX,
}

/// Which geometry fields a message type carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    /// Azimuth.
    pub azimuth: bool,
    /// Elevation.
    pub elevation: bool,
    /// Range.
    pub range: bool,
    /// Depth.
    pub depth: bool,
}

impl MessageType {
    /// Every type, in protocol order.
    pub const ALL: [MessageType; 8] = [
        Self::Oway,
        Self::OwayU,
        Self::MsgReq,
        Self::MsgResp,
        Self::MsgReqU,
        Self::MsgRespU,
        Self::MsgReqX,
        Self::MsgRespX,
    ];

    /// Protocol name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oway => "OWAY",
            Self::OwayU => "OWAYU",
            Self::MsgReq => "MSG_REQ",
            Self::MsgResp => "MSG_RESP",
            Self::MsgReqU => "MSG_REQU",
            Self::MsgRespU => "MSG_RESPU",
            Self::MsgReqX => "MSG_REQX",
            Self::MsgRespX => "MSG_RESPX",
        }
    }

    /// The reply the receiver sends automatically, if any.
    pub fn auto_reply(self) -> Option<MessageType> {
        match self {
            Self::MsgReq => Some(Self::MsgResp),
            Self::MsgReqU => Some(Self::MsgRespU),
            Self::MsgReqX => Some(Self::MsgRespX),
            _ => None,
        }
    }

    /// Geometry fields delivered with this type.
    pub fn fields(self) -> Fields {
        let (azimuth, elevation, range, depth) = match self {
            Self::Oway | Self::MsgReq | Self::MsgResp => (false, false, false, false),
            Self::OwayU | Self::MsgReqU => (true, true, false, false),
            Self::MsgRespU => (true, true, true, false),
            Self::MsgReqX => (true, true, false, true),
            Self::MsgRespX => (true, true, true, true),
        };
        Fields {
            azimuth,
            elevation,
            range,
            depth,
        }
    }
}

impl FromStr for MessageType {
    type Err = CommsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CommsError::UnknownMessageType {
                name: s.to_string(),
            })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered acoustic message.
#[derive(Clone, Debug, PartialEq)]
pub struct AcousticMessage {
    /// Protocol type.
    pub kind: MessageType,
    /// Sending beacon.
    pub from: DeviceId,
    /// Application payload (`None` for auto-replies).
    pub data: Option<Value>,
    /// Bearing azimuth in degrees, for types that carry it.
    pub azimuth: Option<f32>,
    /// Bearing elevation in degrees, for types that carry it.
    pub elevation: Option<f32>,
    /// Range, for types that carry it.
    pub range: Option<f32>,
    /// Sender depth, for types that carry it.
    pub depth: Option<f32>,
}

impl AcousticMessage {
    /// Build from a receiver buffer `[azimuth, elevation, range, depth]`,
    /// keeping only the fields `kind` carries.
    pub fn from_signal(
        kind: MessageType,
        from: DeviceId,
        data: Option<Value>,
        signal: [f32; 4],
    ) -> Self {
        let f = kind.fields();
        Self {
            kind,
            from,
            data,
            azimuth: f.azimuth.then_some(signal[0]),
            elevation: f.elevation.then_some(signal[1]),
            range: f.range.then_some(signal[2]),
            depth: f.depth.then_some(signal[3]),
        }
    }
}

/// A delivered optical message.
#[derive(Clone, Debug, PartialEq)]
pub struct OpticalMessage {
    /// Sending modem.
    pub from: DeviceId,
    /// Application payload.
    pub data: Option<Value>,
}
