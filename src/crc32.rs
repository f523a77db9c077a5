//! The non-standard CRC-32 used to validate LVM2 labels and metadata headers.
//!
//! It is the ordinary reflected CRC-32 (the one zlib and Ethernet use), but
//! seeded with a fixed non-zero initial value and without the final XOR that
//! CRC-32/ISO-HDLC applies. `crc` exposes exactly this knob via
//! [`Crc::digest_with_initial`], so the commodity checksum stays an external
//! collaborator rather than a hand-rolled table.

use crc::{Algorithm, Crc};

/// Initial value LVM2 seeds every label/mda_header checksum with.
pub const LVM_CRC_INITIAL: u32 = 0xf597a6cf;

const LVM_CRC_ALGORITHM: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c11db7,
    init: 0x00000000,
    refin: true,
    refout: true,
    xorout: 0x00000000,
    check: 0x00000000,
    residue: 0x00000000,
};

static LVM_CRC: Crc<u32> = Crc::<u32>::new(&LVM_CRC_ALGORITHM);

/// Computes the LVM2 checksum of `data`, seeded with `initial`.
pub fn checksum(initial: u32, data: &[u8]) -> u32 {
    let mut digest = LVM_CRC.digest_with_initial(initial);
    digest.update(data);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_returns_initial_value() {
        assert_eq!(checksum(LVM_CRC_INITIAL, &[]), LVM_CRC_INITIAL);
    }

    #[test]
    fn differs_from_plain_crc32() {
        let data = b"LABELONE";
        assert_ne!(checksum(LVM_CRC_INITIAL, data), checksum(0, data));
    }

    #[test]
    fn deterministic() {
        let data = b"some metadata bytes to hash";
        assert_eq!(
            checksum(LVM_CRC_INITIAL, data),
            checksum(LVM_CRC_INITIAL, data)
        );
    }
}
