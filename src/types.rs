//! Core SSTP types: headers, control and data messages, attributes and errors.

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;
use thiserror::Error;

/// SSTP major version accepted and emitted
pub const SSTP_MAJOR_VERSION: u8 = 1;
/// SSTP minor version accepted and emitted
pub const SSTP_MINOR_VERSION: u8 = 0;

/// Size of the common SSTP header
pub const HEADER_LEN: usize = 4;
/// Size of the control sub-header (message type + attribute count)
pub const CONTROL_HEADER_LEN: usize = 4;
/// Size of an attribute sub-header (reserved, id, length)
pub const ATTRIBUTE_HEADER_LEN: usize = 4;
/// Largest payload a single data message can carry
pub const MAX_DATA_PAYLOAD: usize = u16::MAX as usize - HEADER_LEN;

/// Fixed total length of the CallConnectAck this server emits
pub const CONNECT_ACK_LEN: u16 = 48;
/// Total length of a control message with no attributes
pub const EMPTY_CONTROL_LEN: u16 = 8;
/// Length of the CryptoBindingReq attribute inside CallConnectAck
pub const CRYPTO_BINDING_REQ_LEN: u16 = 40;

/// Session identifier, assigned per accepted connection
pub type SessionId = u64;

/// Common 4-byte SSTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub major_version: u8,
    pub minor_version: u8,
    pub is_control: bool,
    /// Total packet length including this header
    pub length: u16,
}

impl Header {
    /// Version 1.0 header with the given kind and total length
    pub fn new(is_control: bool, length: u16) -> Self {
        Self {
            major_version: SSTP_MAJOR_VERSION,
            minor_version: SSTP_MINOR_VERSION,
            is_control,
            length,
        }
    }

    /// Bytes following the common header
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_LEN)
    }
}

/// SSTP control message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    CallConnectRequest,
    CallConnectAck,
    CallConnectNak,
    CallConnected,
    CallAbort,
    CallDisconnect,
    CallDisconnectAck,
    EchoRequest,
    EchoResponse,
    /// Value outside the known range, kept for logging only
    Unknown(u16),
}

impl From<u16> for MessageType {
    fn from(value: u16) -> Self {
        match value {
            1 => MessageType::CallConnectRequest,
            2 => MessageType::CallConnectAck,
            3 => MessageType::CallConnectNak,
            4 => MessageType::CallConnected,
            5 => MessageType::CallAbort,
            6 => MessageType::CallDisconnect,
            7 => MessageType::CallDisconnectAck,
            8 => MessageType::EchoRequest,
            9 => MessageType::EchoResponse,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(typ: MessageType) -> Self {
        match typ {
            MessageType::CallConnectRequest => 1,
            MessageType::CallConnectAck => 2,
            MessageType::CallConnectNak => 3,
            MessageType::CallConnected => 4,
            MessageType::CallAbort => 5,
            MessageType::CallDisconnect => 6,
            MessageType::CallDisconnectAck => 7,
            MessageType::EchoRequest => 8,
            MessageType::EchoResponse => 9,
            MessageType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Unknown(value) => write!(f, "Unknown({})", value),
            known => write!(f, "{:?}", known),
        }
    }
}

/// SSTP attribute identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    EncapsulatedProtocolId,
    StatusInfo,
    CryptoBinding,
    CryptoBindingReq,
    Unknown(u8),
}

impl From<u8> for AttributeId {
    fn from(value: u8) -> Self {
        match value {
            1 => AttributeId::EncapsulatedProtocolId,
            2 => AttributeId::StatusInfo,
            3 => AttributeId::CryptoBinding,
            4 => AttributeId::CryptoBindingReq,
            other => AttributeId::Unknown(other),
        }
    }
}

impl From<AttributeId> for u8 {
    fn from(id: AttributeId) -> Self {
        match id {
            AttributeId::EncapsulatedProtocolId => 1,
            AttributeId::StatusInfo => 2,
            AttributeId::CryptoBinding => 3,
            AttributeId::CryptoBindingReq => 4,
            AttributeId::Unknown(other) => other,
        }
    }
}

bitflags! {
    /// Hash protocols advertised in a CryptoBindingReq attribute
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HashProtocols: u8 {
        const SHA1   = 0b0000_0001;
        const SHA256 = 0b0000_0010;
    }
}

/// A single control-message attribute
///
/// `length` covers the 4-byte attribute sub-header plus the data. The
/// encoder trusts it as given: callers keep it consistent with `data`,
/// shorter data is zero-padded and longer data is cut off on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: AttributeId,
    pub length: u16,
    pub data: Bytes,
}

impl Attribute {
    /// Attribute whose length is derived from its data
    pub fn new(id: AttributeId, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let length = (ATTRIBUTE_HEADER_LEN + data.len()).min(u16::MAX as usize) as u16;
        Self { id, length, data }
    }
}

/// SSTP control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub header: Header,
    pub message_type: MessageType,
    pub attributes: Vec<Attribute>,
}

impl ControlMessage {
    /// Control message with a header length computed from the attributes
    pub fn new(message_type: MessageType, attributes: Vec<Attribute>) -> Self {
        let length = HEADER_LEN
            + CONTROL_HEADER_LEN
            + attributes.iter().map(|a| a.length as usize).sum::<usize>();
        Self {
            header: Header::new(true, length.min(u16::MAX as usize) as u16),
            message_type,
            attributes,
        }
    }

    /// First attribute with the given id
    pub fn attribute(&self, id: AttributeId) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.id == id)
    }
}

/// SSTP data message carrying one PPP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub header: Header,
    pub payload: Bytes,
}

impl DataMessage {
    /// Wrap a payload, failing if it does not fit the 16-bit length field
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_DATA_PAYLOAD {
            return Err(SstpError::InvalidPacket(format!(
                "data payload of {} bytes exceeds {}",
                payload.len(),
                MAX_DATA_PAYLOAD
            )));
        }
        Ok(Self {
            header: Header::new(false, (payload.len() + HEADER_LEN) as u16),
            payload,
        })
    }
}

/// A decoded SSTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Control(ControlMessage),
    Data(DataMessage),
}

impl Packet {
    pub fn header(&self) -> &Header {
        match self {
            Packet::Control(msg) => &msg.header,
            Packet::Data(msg) => &msg.header,
        }
    }
}

/// Errors that can occur while running an SSTP session
#[derive(Debug, Error)]
pub enum SstpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Malformed attributes: {0}")]
    MalformedAttributes(String),

    #[error("Data message received before the link process was started")]
    SubprocessNotStarted,

    #[error("Failed to spawn link process: {0}")]
    SubprocessSpawnFailure(#[source] std::io::Error),

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("Link process exited")]
    SubprocessExited,

    #[error("Call aborted by peer")]
    CallAborted,

    #[error("Handshake rejected with {status}: {reason}")]
    Handshake { status: u16, reason: String },

    #[error("Read timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SstpError {
    /// Expected session endings that are not failures
    pub fn is_graceful(&self) -> bool {
        matches!(self, SstpError::PeerDisconnected | SstpError::SubprocessExited)
    }
}

pub type Result<T> = std::result::Result<T, SstpError>;
