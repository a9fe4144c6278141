//! PPP 16-bit frame check sequence (RFC 1662, CRC-16/CCITT reflected).

/// Seed for a fresh FCS computation
pub const INITIAL_FCS16: u16 = 0xffff;

/// Residual left after running the FCS over a frame and its own trailer
pub const GOOD_FCS16: u16 = 0xf0b8;

const POLYNOMIAL: u16 = 0x8408;

/// Lookup table for the reflected CCITT polynomial, built at compile time.
pub static FCS16_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = i as u16;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 != 0 {
                (value >> 1) ^ POLYNOMIAL
            } else {
                value >> 1
            };
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

/// Fold one raw (pre-escape) byte into the running FCS.
#[inline]
pub fn update(fcs: u16, byte: u8) -> u16 {
    (fcs >> 8) ^ FCS16_TABLE[((fcs ^ byte as u16) & 0xff) as usize]
}

/// Fold a run of raw bytes into the running FCS.
pub fn fcs16(fcs: u16, data: &[u8]) -> u16 {
    data.iter().fold(fcs, |fcs, &byte| update(fcs, byte))
}

/// Trailer bytes for `data`: the complemented FCS, least significant byte first.
pub fn trailer(data: &[u8]) -> [u8; 2] {
    trailer_for(fcs16(INITIAL_FCS16, data))
}

/// Trailer bytes for an already accumulated FCS.
#[inline]
pub fn trailer_for(fcs: u16) -> [u8; 2] {
    (!fcs).to_le_bytes()
}

/// Whether `frame` (payload followed by its 2-byte trailer) checks out.
pub fn is_valid(frame: &[u8]) -> bool {
    frame.len() >= 2 && fcs16(INITIAL_FCS16, frame) == GOOD_FCS16
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_table_matches_rfc1662() {
        assert_eq!(FCS16_TABLE[0], 0x0000);
        assert_eq!(FCS16_TABLE[1], 0x1189);
        assert_eq!(FCS16_TABLE[0x80], 0x8408);
        assert_eq!(FCS16_TABLE[255], 0x0f78);
    }

    #[test]
    fn test_check_value() {
        // CRC-16/X-25 check value
        assert_eq!(!fcs16(INITIAL_FCS16, b"123456789"), 0x906e);
        assert_eq!(trailer(b"123456789"), [0x6e, 0x90]);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"incremental frame check sequence";
        let (head, tail) = data.split_at(11);
        let split = fcs16(fcs16(INITIAL_FCS16, head), tail);
        assert_eq!(split, fcs16(INITIAL_FCS16, data));
    }

    #[test]
    fn test_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = vec![0u8; 256];
        rng.fill(&mut data[..]);
        assert_eq!(fcs16(INITIAL_FCS16, &data), fcs16(INITIAL_FCS16, &data));
    }

    #[test]
    fn test_single_bit_flip_changes_fcs() {
        let mut rng = StdRng::seed_from_u64(0x5157);
        for _ in 0..200 {
            let len = rng.gen_range(1..512);
            let mut data = vec![0u8; len];
            rng.fill(&mut data[..]);
            let original = fcs16(INITIAL_FCS16, &data);

            let index = rng.gen_range(0..len);
            data[index] ^= 1 << rng.gen_range(0..8);
            assert_ne!(fcs16(INITIAL_FCS16, &data), original);
        }
    }

    #[test]
    fn test_trailer_validates() {
        let mut frame = b"\xff\x03\xc0\x21\x01\x01\x00\x04".to_vec();
        frame.extend_from_slice(&trailer(&frame));
        assert!(is_valid(&frame));

        frame[2] ^= 0x10;
        assert!(!is_valid(&frame));
        assert!(!is_valid(&[0x00]));
    }
}
