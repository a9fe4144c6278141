//! # sstpd - SSTP tunnel gateway
//!
//! Terminates SSTP sessions and bridges the PPP frames they carry to a
//! link-layer negotiator process (typically `pppd`) over its stdin and stdout.
//!
//! * **SSTP codec**: headers, control messages, attributes, data messages
//! * **PPP framing**: HDLC-style byte stuffing with a 16-bit FCS
//! * **Sessions**: control state machine plus duplex plumbing to the link process
//!
//! ## Quick Start
//!
//! ```rust
//! use bytes::BytesMut;
//! use sstpd::frame::{encode_packet, echo_response, try_decode_packet};
//! use sstpd::{MessageType, Packet};
//!
//! let mut buf = BytesMut::new();
//! encode_packet(&Packet::Control(echo_response()), &mut buf);
//! assert_eq!(&buf[..], &[0x10, 0x01, 0x00, 0x08, 0x00, 0x09, 0x00, 0x00]);
//!
//! let decoded = try_decode_packet(&mut buf)?.unwrap();
//! assert!(matches!(
//!     decoded,
//!     Packet::Control(msg) if msg.message_type == MessageType::EchoResponse
//! ));
//! # Ok::<(), sstpd::SstpError>(())
//! ```
//!
//! ## Wire Format
//!
//! Every packet starts with a 4-byte header:
//!
//! - VER (1B): major version in the high nibble, minor in the low (`0x10`)
//! - C (1B): `1` for control, `0` for data
//! - LEN (2B BE): total packet length including the header
//!
//! Control packets continue with:
//!
//! - TYPE (2B BE): message type
//! - COUNT (2B BE): number of attributes
//! - ATTRIBUTES: each `{reserved 1B, id 1B, length 2B BE, data length-4}`
//!
//! Data packets carry one PPP frame of `LEN - 4` bytes.
//!
//! ## Message Types
//!
//! | Type | Name               | Handling                                   |
//! |------|--------------------|--------------------------------------------|
//! | 1    | CallConnectRequest | ack, start link process                    |
//! | 2    | CallConnectAck     | sent by the server                         |
//! | 3    | CallConnectNak     | not produced                               |
//! | 4    | CallConnected      | ignored                                    |
//! | 5    | CallAbort          | session terminated                         |
//! | 6    | CallDisconnect     | ack, stop link process                     |
//! | 7    | CallDisconnectAck  | sent by the server                         |
//! | 8    | EchoRequest        | answered with EchoResponse                 |
//! | 9    | EchoResponse       | ignored                                    |

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod frame;
pub mod handshake;
pub mod link;
pub mod ppp;
pub mod session;
pub mod tcp;
pub mod types;

// Re-export main types for convenience
pub use types::{
    Attribute, AttributeId, ControlMessage, DataMessage, HashProtocols, Header, MessageType,
    Packet, Result, SessionId, SstpError,
};

pub use codec::SstpCodec;
pub use config::{load_config, ServerConfig};
pub use frame::{decode_control, decode_data, decode_header, encode_control, encode_data};
pub use session::{serve, Session, SessionState};
pub use tcp::SstpServer;
