//! `tokio_util` codec for driving a connection as a stream of SSTP packets.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{encode_packet, try_decode_packet};
use crate::types::{Packet, SstpError};

/// Frames a byte stream into SSTP packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct SstpCodec;

impl SstpCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SstpCodec {
    type Item = Packet;
    type Error = SstpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        try_decode_packet(src)
    }
}

impl Encoder<Packet> for SstpCodec {
    type Error = SstpError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_packet(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{connect_ack, echo_response};
    use crate::types::{DataMessage, MessageType};

    #[test]
    fn test_decode_back_to_back_packets() {
        let mut codec = SstpCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::Control(echo_response()), &mut buf)
            .unwrap();
        codec
            .encode(
                Packet::Data(DataMessage::new(vec![1, 2, 3]).unwrap()),
                &mut buf,
            )
            .unwrap();

        match codec.decode(&mut buf).unwrap() {
            Some(Packet::Control(msg)) => assert_eq!(msg.message_type, MessageType::EchoResponse),
            other => panic!("unexpected {:?}", other),
        }
        match codec.decode(&mut buf).unwrap() {
            Some(Packet::Data(msg)) => assert_eq!(&msg.payload[..], &[1, 2, 3]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let mut codec = SstpCodec::new();
        let mut encoded = BytesMut::new();
        codec
            .encode(Packet::Control(connect_ack()), &mut encoded)
            .unwrap();

        let mut buf = BytesMut::new();
        let mut decoded = None;
        for byte in encoded.iter() {
            buf.extend_from_slice(&[*byte]);
            if let Some(packet) = codec.decode(&mut buf).unwrap() {
                decoded = Some(packet);
            }
        }
        let Some(Packet::Control(msg)) = decoded else {
            panic!("expected control packet");
        };
        assert_eq!(msg.message_type, MessageType::CallConnectAck);
        assert!(buf.is_empty());
        // decoded attribute data carries the zeroed nonce
        assert_eq!(msg.attributes[0].data.len(), 36);
        assert_eq!(&msg.attributes[0].data[..4], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_decode_invalid_header() {
        let mut codec = SstpCodec::new();
        let mut buf = BytesMut::from(&[0x20, 0x00, 0x00, 0x08][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(SstpError::InvalidPacket(_))
        ));
    }
}
