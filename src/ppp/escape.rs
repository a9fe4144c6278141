//! HDLC-style byte stuffing for the link-bound direction.

use bytes::{BufMut, Bytes, BytesMut};

use super::fcs::{self, INITIAL_FCS16};

/// Frame delimiter
pub const FLAG_SEQUENCE: u8 = 0x7e;
/// Escape introducer
pub const CONTROL_ESCAPE: u8 = 0x7d;
/// Value XORed into an escaped byte
pub const ESCAPE_BIT: u8 = 0x20;

const ESCAPE_SLACK: usize = 8;

/// Async-control-character map: which of 0x00..0x20 must be escaped.
///
/// Bit `n` set means byte `n` is sent escaped. The flag and escape bytes
/// are always escaped regardless of the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accm(u32);

impl Accm {
    /// Escape every control character
    pub const ALL: Accm = Accm(u32::MAX);
    /// Escape only the flag and escape bytes
    pub const NONE: Accm = Accm(0);

    pub const fn new(map: u32) -> Self {
        Accm(map)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn needs_escape(self, byte: u8) -> bool {
        match byte {
            FLAG_SEQUENCE | CONTROL_ESCAPE => true,
            0x00..=0x1f => self.0 & (1 << byte) != 0,
            _ => false,
        }
    }
}

impl Default for Accm {
    fn default() -> Self {
        Accm::ALL
    }
}

/// Escape `payload` and append its escaped FCS trailer.
///
/// Every control character, the flag byte and the escape byte are stuffed.
/// No flag bytes are added.
pub fn escape(payload: &[u8]) -> Bytes {
    escape_with(payload, Accm::ALL)
}

/// Escape `payload` under the given control-character map.
pub fn escape_with(payload: &[u8], accm: Accm) -> Bytes {
    let mut out = BytesMut::with_capacity(worst_case_len(payload.len()));
    escape_into(payload, accm, &mut out);
    out.freeze()
}

fn worst_case_len(payload_len: usize) -> usize {
    2 * (payload_len + 2) + ESCAPE_SLACK
}

/// Single pass: the FCS runs over each raw byte before it is stuffed.
fn escape_into(payload: &[u8], accm: Accm, out: &mut BytesMut) {
    let mut fcs = INITIAL_FCS16;
    for &byte in payload {
        fcs = fcs::update(fcs, byte);
        put_escaped(out, byte, accm);
    }
    for byte in fcs::trailer_for(fcs) {
        put_escaped(out, byte, accm);
    }
}

#[inline]
fn put_escaped(out: &mut BytesMut, byte: u8, accm: Accm) {
    if accm.needs_escape(byte) {
        out.put_u8(CONTROL_ESCAPE);
        out.put_u8(byte ^ ESCAPE_BIT);
    } else {
        out.put_u8(byte);
    }
}

/// Per-session encoder for payloads headed to the link process.
#[derive(Debug, Clone, Copy, Default)]
pub struct PppFramer {
    accm: Accm,
    hdlc_flags: bool,
}

impl PppFramer {
    pub fn new(accm: Accm, hdlc_flags: bool) -> Self {
        Self { accm, hdlc_flags }
    }

    /// Escape one payload into one block, wrapped in flag bytes when
    /// `hdlc_flags` is set.
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(worst_case_len(payload.len()) + 2);
        if self.hdlc_flags {
            out.put_u8(FLAG_SEQUENCE);
        }
        escape_into(payload, self.accm, &mut out);
        if self.hdlc_flags {
            out.put_u8(FLAG_SEQUENCE);
        }
        out.freeze()
    }
}
