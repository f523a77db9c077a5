// lib.rs
//! Read-only parser for Linux LVM2 on-disk metadata.
//!
//! Given a byte source for the physical volume that carries a volume
//! group's metadata, [`Handle::open`] parses the `LABELONE` label, the PV
//! header, the metadata-area header, and the textual metadata configuration
//! language to build a [`model::VolumeGroup`]: its physical volumes and its
//! logical volumes, each with their ordered linear/striped segments.
//! [`Handle::attach_physical_volumes`] then lets additional physical volumes
//! be attached by UUID so that [`Handle::open_lv`] can read a logical
//! volume's byte stream across all of them.
//!
//! Vocabulary: a "sector" is always exactly 512 bytes on-disk, regardless of
//! the underlying device's real sector size.
//!
//! See: <https://github.com/libyal/libvslvm/blob/main/documentation/Logical%20Volume%20Manager%20(LVM)%20format.asciidoc>

mod builder;
mod crc32;
pub mod error;
mod handle;
mod header;
mod io_util;
mod lv;
pub mod metadata;
pub mod model;

pub use error::Error;
pub use handle::{probe, Handle};
pub use io_util::PvSource;
pub use lv::{LvCursor, Whence};
pub use model::{LogicalVolume, PhysicalVolume, Segment, SegmentType, Stripe, VolumeGroup};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SECTOR: u64 = 512;

    /// Builds one 512-byte label sector with a valid checksum at sector 0.
    fn label_sector(
        pv_uuid: &str,
        volume_size: u64,
        data_areas: &[(u64, u64)],
        mda_areas: &[(u64, u64)],
    ) -> Vec<u8> {
        let mut sector = vec![0u8; SECTOR as usize];
        let data_offset: u32 = 32;

        sector[0..8].copy_from_slice(b"LABELONE");
        sector[8..16].copy_from_slice(&0u64.to_le_bytes()); // sector_number
        sector[20..24].copy_from_slice(&data_offset.to_le_bytes());
        sector[24..32].copy_from_slice(b"LVM2 001");

        let mut body = Vec::new();
        let mut uuid_bytes = [b' '; 32];
        let src = pv_uuid.as_bytes();
        let n = src.len().min(32);
        uuid_bytes[..n].copy_from_slice(&src[..n]);
        body.extend_from_slice(&uuid_bytes);
        body.extend_from_slice(&volume_size.to_le_bytes());
        for (offset, size) in data_areas {
            body.extend_from_slice(&offset.to_le_bytes());
            body.extend_from_slice(&size.to_le_bytes());
        }
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        for (offset, size) in mda_areas {
            body.extend_from_slice(&offset.to_le_bytes());
            body.extend_from_slice(&size.to_le_bytes());
        }
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());

        sector[data_offset as usize..data_offset as usize + body.len()].copy_from_slice(&body);

        let checksum = crc32::checksum(crc32::LVM_CRC_INITIAL, &sector[data_offset as usize..]);
        sector[16..20].copy_from_slice(&checksum.to_le_bytes());
        sector
    }

    /// Builds one 512-byte `mda_header` with a valid checksum.
    fn mda_header_sector(mda_offset: u64, mda_size: u64, records: &[(u64, u64, u32, u32)]) -> Vec<u8> {
        let mut sector = vec![0u8; SECTOR as usize];
        sector[4..20].copy_from_slice(b" LVM2 x[5A%r0N*>");
        sector[20..24].copy_from_slice(&1u32.to_le_bytes());
        sector[24..32].copy_from_slice(&mda_offset.to_le_bytes());
        sector[32..40].copy_from_slice(&mda_size.to_le_bytes());
        let mut pos = 40;
        for (data_offset, data_size, checksum, flags) in records {
            sector[pos..pos + 8].copy_from_slice(&data_offset.to_le_bytes());
            sector[pos + 8..pos + 16].copy_from_slice(&data_size.to_le_bytes());
            sector[pos + 16..pos + 20].copy_from_slice(&checksum.to_le_bytes());
            sector[pos + 20..pos + 24].copy_from_slice(&flags.to_le_bytes());
            pos += 24;
        }
        // terminator record is already all-zero from the initial allocation
        let checksum = crc32::checksum(crc32::LVM_CRC_INITIAL, &sector[4..512]);
        sector[0..4].copy_from_slice(&checksum.to_le_bytes());
        sector
    }

    /// Assembles a minimal single-PV disk image: label sector at offset 0, an
    /// mda_header a few sectors in, the textual metadata right after it, and
    /// enough trailing space for `pv0`'s data area (starting at `pe_start`,
    /// sector 72 in [`sample_metadata`]) to hold a full read.
    fn single_pv_image(metadata_text: &str) -> Vec<u8> {
        let mda_offset = SECTOR * 8;
        let mda_size = SECTOR * 64;
        let volume_size = SECTOR * 4096;
        let text_bytes = metadata_text.as_bytes();
        let text_checksum = crc32::checksum(crc32::LVM_CRC_INITIAL, text_bytes);

        let label = label_sector(
            "testpvuuid0000000000000000000000",
            volume_size,
            &[(SECTOR * 300, SECTOR * 200)],
            &[(mda_offset, mda_size)],
        );
        let mda_hdr = mda_header_sector(mda_offset, mda_size, &[(SECTOR, text_bytes.len() as u64, text_checksum, 0)]);

        let total_len = (SECTOR * 128) as usize;
        let mut image = vec![0u8; total_len];
        image[0..SECTOR as usize].copy_from_slice(&label);
        image[mda_offset as usize..mda_offset as usize + SECTOR as usize].copy_from_slice(&mda_hdr);
        let text_start = (mda_offset + SECTOR) as usize;
        image[text_start..text_start + text_bytes.len()].copy_from_slice(text_bytes);
        image
    }

    fn sample_metadata() -> String {
        r#"
        testvg {
            id = "vgidvgidvgidvgidvgidvgidvgidvgid"
            seqno = 1
            extent_size = 8192
            physical_volumes {
                pv0 {
                    id = "testpvuuid0000000000000000000000"
                    device = "/dev/loop0"
                    status = ["ALLOCATABLE"]
                    pe_start = 72
                    dev_size = 524288
                    pe_count = 60
                }
            }
            logical_volumes {
                lv0 {
                    id = "lvidlvidlvidlvidlvidlvidlvidlvid"
                    status = ["READ", "WRITE", "VISIBLE"]
                    segment_count = 1
                    segment1 {
                        start_extent = 0
                        extent_count = 2
                        type = "linear"
                        stripe_count = 1
                        stripes = ["pv0", 0]
                    }
                }
            }
        }
        "#
        .to_string()
    }

    #[test]
    fn probe_true_for_valid_label() {
        let image = single_pv_image(&sample_metadata());
        let mut cursor = Cursor::new(image);
        assert!(probe(&mut cursor).unwrap());
    }

    #[test]
    fn probe_false_without_signature() {
        let mut cursor = Cursor::new(vec![0u8; 4096]);
        assert!(!probe(&mut cursor).unwrap());
    }

    #[test]
    fn open_builds_volume_group_and_reads_lv() {
        let image = single_pv_image(&sample_metadata());
        let cursor = Cursor::new(image);
        let mut handle = Handle::open(cursor).unwrap();
        handle
            .attach_physical_volumes::<Cursor<Vec<u8>>>(Vec::new())
            .unwrap();

        let vg = handle.volume_group().unwrap();
        assert_eq!(vg.name, "testvg");
        assert_eq!(vg.extent_size, 8192 * SECTOR);
        assert_eq!(vg.physical_volumes.len(), 1);
        assert_eq!(vg.logical_volumes.len(), 1);

        let mut lv = handle.open_lv("lv0").unwrap();
        assert_eq!(lv.size(), 2 * 8192 * SECTOR);
        let mut buf = [0u8; 16];
        let n = lv.read(&mut buf).unwrap();
        assert_eq!(n, 16);
    }

    #[test]
    fn reads_before_attach_are_rejected() {
        let image = single_pv_image(&sample_metadata());
        let cursor = Cursor::new(image);
        let mut handle = Handle::open(cursor).unwrap();
        assert!(matches!(handle.open_lv("lv0"), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn corrupted_label_checksum_is_detected() {
        let mut image = single_pv_image(&sample_metadata());
        // Flip a byte inside the label sector, outside the checksum field.
        image[40] ^= 0xff;
        let cursor = Cursor::new(image);
        assert!(matches!(Handle::open(cursor), Err(Error::CorruptedLabel { .. })));
    }
}
