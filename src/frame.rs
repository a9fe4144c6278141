//! SSTP packet encoding and decoding.
//!
//! Decoding is split the way the stream is read: the 4-byte common header
//! first ([`decode_header`]), which yields how many more bytes belong to the
//! packet, then the body ([`decode_control`] or [`decode_data`]).
//! Payload bounds always come from the declared header length, never from
//! the size of whatever buffer the bytes happened to arrive in.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{
    Attribute, AttributeId, ControlMessage, DataMessage, HashProtocols, Header, MessageType,
    Packet, Result, SstpError, ATTRIBUTE_HEADER_LEN, CONNECT_ACK_LEN, CONTROL_HEADER_LEN,
    CRYPTO_BINDING_REQ_LEN, EMPTY_CONTROL_LEN, HEADER_LEN, SSTP_MAJOR_VERSION,
    SSTP_MINOR_VERSION,
};

/// Parse and validate the common header.
pub fn parse_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(SstpError::InvalidPacket(format!(
            "header needs {} bytes, got {}",
            HEADER_LEN,
            bytes.len()
        )));
    }

    let header = Header {
        major_version: bytes[0] >> 4,
        minor_version: bytes[0] & 0x0f,
        is_control: bytes[1] == 1,
        length: BigEndian::read_u16(&bytes[2..4]),
    };

    if header.major_version != SSTP_MAJOR_VERSION || header.minor_version != SSTP_MINOR_VERSION {
        return Err(SstpError::InvalidPacket(format!(
            "unsupported version {}.{}",
            header.major_version, header.minor_version
        )));
    }
    if header.length as usize <= HEADER_LEN {
        return Err(SstpError::InvalidPacket(format!(
            "declared length {} too short",
            header.length
        )));
    }

    Ok(header)
}

/// Decode the common header into `(is_control, remaining_length)`.
///
/// The caller reads exactly `remaining_length` more bytes before decoding
/// the body.
pub fn decode_header(bytes: &[u8]) -> Result<(bool, usize)> {
    let header = parse_header(bytes)?;
    Ok((header.is_control, header.body_len()))
}

/// Decode a control body (everything after the common header).
pub fn decode_control(header: Header, body: &Bytes) -> Result<ControlMessage> {
    if body.len() < CONTROL_HEADER_LEN {
        return Err(SstpError::InvalidPacket(format!(
            "control body of {} bytes is shorter than its sub-header",
            body.len()
        )));
    }

    let message_type = MessageType::from(BigEndian::read_u16(&body[0..2]));
    let count = BigEndian::read_u16(&body[2..4]);
    let (attributes, _) = decode_attributes(count, &body.slice(CONTROL_HEADER_LEN..))?;

    Ok(ControlMessage {
        header,
        message_type,
        attributes,
    })
}

/// Decode `count` attributes laid out back to back at the start of `input`.
///
/// Returns the attributes and the number of bytes consumed. There is no
/// resynchronisation: a bad length fails the whole message.
pub fn decode_attributes(count: u16, input: &Bytes) -> Result<(Vec<Attribute>, usize)> {
    let mut attributes = Vec::with_capacity((count as usize).min(input.len() / ATTRIBUTE_HEADER_LEN));
    let mut offset = 0;

    for index in 0..count {
        if offset + ATTRIBUTE_HEADER_LEN > input.len() {
            return Err(SstpError::MalformedAttributes(format!(
                "attribute {} of {} truncated at offset {}",
                index + 1,
                count,
                offset
            )));
        }

        // input[offset] is reserved
        let id = AttributeId::from(input[offset + 1]);
        let length = BigEndian::read_u16(&input[offset + 2..offset + 4]);
        let end = offset + length as usize;

        if (length as usize) < ATTRIBUTE_HEADER_LEN || end > input.len() {
            return Err(SstpError::MalformedAttributes(format!(
                "attribute {:?} declares length {} with {} bytes left",
                id,
                length,
                input.len() - offset
            )));
        }

        attributes.push(Attribute {
            id,
            length,
            data: input.slice(offset + ATTRIBUTE_HEADER_LEN..end),
        });
        offset = end;
    }

    Ok((attributes, offset))
}

/// Decode a data body; the payload is `header.length - 4` bytes.
pub fn decode_data(body: &Bytes, header: &Header) -> Result<DataMessage> {
    let len = header.body_len();
    if body.len() < len {
        return Err(SstpError::InvalidPacket(format!(
            "data message declares {} payload bytes, only {} available",
            len,
            body.len()
        )));
    }

    Ok(DataMessage {
        header: *header,
        payload: body.slice(..len),
    })
}

/// Encode the 4-byte common header.
pub fn encode_header(header: &Header) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[0] = (header.major_version << 4) | (header.minor_version & 0x0f);
    out[1] = header.is_control as u8;
    BigEndian::write_u16(&mut out[2..4], header.length);
    out
}

/// Encode a control message; exactly `header.length` bytes are appended.
///
/// Attributes start right after the control sub-header, at offset 8 of the
/// packet. Attribute data is padded or cut to `length - 4`.
pub fn encode_control(msg: &ControlMessage, dst: &mut BytesMut) {
    let start = dst.len();
    dst.reserve(msg.header.length as usize);

    dst.extend_from_slice(&encode_header(&msg.header));
    dst.put_u16(msg.message_type.into());
    dst.put_u16(msg.attributes.len() as u16);

    for attr in &msg.attributes {
        let region = (attr.length as usize).saturating_sub(ATTRIBUTE_HEADER_LEN);
        let copied = attr.data.len().min(region);

        dst.put_u8(0);
        dst.put_u8(attr.id.into());
        dst.put_u16(attr.length);
        dst.extend_from_slice(&attr.data[..copied]);
        dst.put_bytes(0, region - copied);
    }

    dst.resize(start + msg.header.length as usize, 0);
}

/// Encode a data message; exactly `header.length` bytes are appended.
pub fn encode_data(msg: &DataMessage, dst: &mut BytesMut) {
    let start = dst.len();
    dst.reserve(msg.header.length as usize);
    dst.extend_from_slice(&encode_header(&msg.header));
    dst.extend_from_slice(&msg.payload);
    dst.resize(start + msg.header.length as usize, 0);
}

/// Encode any packet.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) {
    match packet {
        Packet::Control(msg) => encode_control(msg, dst),
        Packet::Data(msg) => encode_data(msg, dst),
    }
}

/// Try to decode one complete packet from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
pub fn try_decode_packet(buf: &mut BytesMut) -> Result<Option<Packet>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let header = parse_header(&buf[..HEADER_LEN])?;
    let total = header.length as usize;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }

    let mut packet = buf.split_to(total);
    let body = packet.split_off(HEADER_LEN).freeze();

    let packet = if header.is_control {
        Packet::Control(decode_control(header, &body)?)
    } else {
        Packet::Data(decode_data(&body, &header)?)
    };
    Ok(Some(packet))
}

/// CallConnectAck carrying a CryptoBindingReq for the given hash protocols.
///
/// The attribute data is 3 reserved bytes, the hash bitmask, then a 32-byte
/// nonce left zeroed; total packet length is 48.
pub fn connect_ack_with(hashes: HashProtocols) -> ControlMessage {
    let attr = Attribute {
        id: AttributeId::CryptoBindingReq,
        length: CRYPTO_BINDING_REQ_LEN,
        data: Bytes::from(vec![0, 0, 0, hashes.bits()]),
    };
    ControlMessage {
        header: Header::new(true, CONNECT_ACK_LEN),
        message_type: MessageType::CallConnectAck,
        attributes: vec![attr],
    }
}

/// CallConnectAck advertising SHA1 and SHA256.
pub fn connect_ack() -> ControlMessage {
    connect_ack_with(HashProtocols::SHA1 | HashProtocols::SHA256)
}

pub fn disconnect_ack() -> ControlMessage {
    empty_control(MessageType::CallDisconnectAck)
}

pub fn echo_response() -> ControlMessage {
    empty_control(MessageType::EchoResponse)
}

fn empty_control(message_type: MessageType) -> ControlMessage {
    ControlMessage {
        header: Header::new(true, EMPTY_CONTROL_LEN),
        message_type,
        attributes: Vec::new(),
    }
}
