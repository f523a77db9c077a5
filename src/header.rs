//! Binary structures for the PV label, PV header, and metadata-area header.
//!
//! Parsing is done with `nom` over raw byte slices; each `parse_*` function
//! mirrors the struct layouts documented in libvslvm's
//! `vslvm_physical_volume_label.h` (signature, sector_number, checksum,
//! data_offset, type_indicator for the label; identifier + volume_size +
//! two null-terminated offset/size tables for the PV header).

use log::debug;
use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_u32, le_u64};
use nom::IResult;

use crate::crc32::{self, LVM_CRC_INITIAL};
use crate::error::Error;

pub const SECTOR_SIZE: u64 = 512;
const LABEL_SCAN_SECTORS: u64 = 4;
const MDA_HEADER_LEN: usize = 512;
const MDA_SIGNATURE: &[u8; 16] = b" LVM2 x[5A%r0N*>";
const RAW_LOCATION_LEN: usize = 24;

#[derive(Debug, Clone)]
pub struct LabelHeader {
    pub sector_number: u64,
    pub checksum: u32,
    pub data_offset: u32,
}

fn parse_label_header(input: &[u8]) -> IResult<&[u8], LabelHeader> {
    let (input, _sig) = tag(&b"LABELONE"[..])(input)?;
    let (input, sector_number) = le_u64(input)?;
    let (input, checksum) = le_u32(input)?;
    let (input, data_offset) = le_u32(input)?;
    let (input, _type_indicator) = tag(&b"LVM2 001"[..])(input)?;
    Ok((
        input,
        LabelHeader {
            sector_number,
            checksum,
            data_offset,
        },
    ))
}

/// Lightweight presence check used by `probe`: does any of the first four
/// sectors start with the `LABELONE` signature? Unlike [`scan_label`], this
/// does not validate the sector number, type indicator, or checksum.
pub fn has_label_signature(sectors: &[u8]) -> bool {
    (0..LABEL_SCAN_SECTORS).any(|i| {
        let start = (i * SECTOR_SIZE) as usize;
        sectors
            .get(start..start + 8)
            .map(|sig| sig == b"LABELONE")
            .unwrap_or(false)
    })
}

/// Scans the first four sectors of `sectors` (each exactly 512 bytes, laid
/// out consecutively) for a validated `LABELONE` label.
///
/// Returns the byte offset of the matching sector (0, 512, 1024 or 1536)
/// relative to the start of `sectors`, and the parsed label header.
pub fn scan_label(sectors: &[u8]) -> Result<(u64, LabelHeader), Error> {
    for sector_index in 0..LABEL_SCAN_SECTORS {
        let start = (sector_index * SECTOR_SIZE) as usize;
        let end = start + SECTOR_SIZE as usize;
        let Some(sector) = sectors.get(start..end) else {
            break;
        };
        if &sector[0..8] != b"LABELONE" {
            continue;
        }
        let (_, label) = parse_label_header(sector).map_err(|e| Error::CorruptedLabel {
            reason: format!("malformed label header: {e}"),
        })?;
        if label.sector_number != sector_index {
            return Err(Error::CorruptedLabel {
                reason: format!(
                    "label sector_number {} does not match scanned sector {}",
                    label.sector_number, sector_index
                ),
            });
        }
        let data_offset = label.data_offset as usize;
        if data_offset > sector.len() {
            return Err(Error::CorruptedLabel {
                reason: "data_offset past end of label sector".into(),
            });
        }
        let computed = crc32::checksum(LVM_CRC_INITIAL, &sector[data_offset..]);
        if computed != label.checksum {
            return Err(Error::CorruptedLabel {
                reason: format!(
                    "label checksum mismatch: stored {:#x}, computed {:#x}",
                    label.checksum, computed
                ),
            });
        }
        tracing::trace!(?label);
        debug!(
            "LabelHeader: sector_number: {}, checksum: {:#x}, data_offset: {}",
            label.sector_number, label.checksum, label.data_offset
        );
        return Ok((start as u64, label));
    }
    Err(Error::NoSignature)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaDescriptor {
    pub offset: u64,
    pub size: u64,
}

fn parse_area_table(input: &[u8]) -> IResult<&[u8], Vec<AreaDescriptor>> {
    let mut areas = Vec::new();
    let mut rest = input;
    loop {
        let (r, offset) = le_u64(rest)?;
        let (r, size) = le_u64(r)?;
        rest = r;
        if offset == 0 && size == 0 {
            break;
        }
        areas.push(AreaDescriptor { offset, size });
    }
    Ok((rest, areas))
}

#[derive(Debug, Clone)]
pub struct PhysicalVolumeHeader {
    pub pv_uuid: String,
    pub volume_size: u64,
    pub data_areas: Vec<AreaDescriptor>,
    pub metadata_areas: Vec<AreaDescriptor>,
}

fn parse_pv_header(input: &[u8]) -> IResult<&[u8], PhysicalVolumeHeader> {
    let (input, uuid_bytes) = take(32usize)(input)?;
    let (input, volume_size) = le_u64(input)?;
    let (input, data_areas) = parse_area_table(input)?;
    let (input, metadata_areas) = parse_area_table(input)?;
    let pv_uuid = String::from_utf8_lossy(uuid_bytes).into_owned();
    Ok((
        input,
        PhysicalVolumeHeader {
            pv_uuid,
            volume_size,
            data_areas,
            metadata_areas,
        },
    ))
}

/// Parses the PV header (and its two area tables) starting at `label.data_offset`
/// within `region`, which must contain at least enough bytes following the
/// label to hold both tables (callers pass a multi-sector scratch region).
pub fn parse_physical_volume_header(
    region: &[u8],
    label: &LabelHeader,
) -> Result<PhysicalVolumeHeader, Error> {
    let start = label.data_offset as usize;
    let slice = region.get(start..).ok_or_else(|| Error::CorruptedLabel {
        reason: "data_offset past end of scratch region".into(),
    })?;
    let (_, pvh) = parse_pv_header(slice).map_err(|e| Error::CorruptedLabel {
        reason: format!("malformed PV header: {e}"),
    })?;
    if pvh.volume_size > 0 {
        for area in pvh.data_areas.iter().chain(pvh.metadata_areas.iter()) {
            if area.offset % SECTOR_SIZE != 0 {
                return Err(Error::CorruptedLabel {
                    reason: format!("area offset {} is not sector-aligned", area.offset),
                });
            }
            if area.offset >= pvh.volume_size {
                return Err(Error::CorruptedLabel {
                    reason: format!(
                        "area offset {} lies outside volume of size {}",
                        area.offset, pvh.volume_size
                    ),
                });
            }
        }
    }
    tracing::trace!(?pvh);
    debug!(
        "PhysicalVolumeHeader: pv_uuid: {}, volume_size: {}, data_areas: {}, metadata_areas: {}",
        pvh.pv_uuid,
        pvh.volume_size,
        pvh.data_areas.len(),
        pvh.metadata_areas.len()
    );
    Ok(pvh)
}

#[derive(Debug, Clone, Copy)]
pub struct RawLocationRecord {
    pub data_offset: u64,
    pub data_size: u64,
    pub checksum: u32,
    pub flags: u32,
}

const RAW_LOCATION_IGNORED_FLAG: u32 = 0x01;

impl RawLocationRecord {
    pub fn is_ignored(&self) -> bool {
        self.flags & RAW_LOCATION_IGNORED_FLAG != 0
    }
}

fn parse_raw_location(input: &[u8]) -> IResult<&[u8], RawLocationRecord> {
    let (input, data_offset) = le_u64(input)?;
    let (input, data_size) = le_u64(input)?;
    let (input, checksum) = le_u32(input)?;
    let (input, flags) = le_u32(input)?;
    Ok((
        input,
        RawLocationRecord {
            data_offset,
            data_size,
            checksum,
            flags,
        },
    ))
}

fn parse_raw_location_table(input: &[u8]) -> IResult<&[u8], Vec<RawLocationRecord>> {
    let mut records = Vec::new();
    let mut rest = input;
    loop {
        if rest.len() < RAW_LOCATION_LEN {
            break;
        }
        let (r, record) = parse_raw_location(rest)?;
        rest = r;
        if record.data_offset == 0 && record.data_size == 0 && record.checksum == 0 && record.flags == 0 {
            break;
        }
        records.push(record);
    }
    Ok((rest, records))
}

#[derive(Debug, Clone)]
pub struct MdaHeader {
    pub checksum: u32,
    pub version: u32,
    pub mda_offset: u64,
    pub mda_size: u64,
    pub raw_locations: Vec<RawLocationRecord>,
}

/// Parses and validates the 512-byte `mda_header` at the start of a
/// metadata area. `expected_offset` is the metadata area's absolute offset
/// on the PV, which must match the header's self-reported `mda_offset`.
pub fn parse_mda_header(buf: &[u8], expected_offset: u64) -> Result<MdaHeader, Error> {
    if buf.len() < MDA_HEADER_LEN {
        return Err(Error::CorruptedMetadataHeader {
            reason: "mda_header buffer shorter than 512 bytes".into(),
        });
    }
    let (rest, checksum) =
        le_u32::<_, nom::error::Error<&[u8]>>(buf).map_err(|e| Error::CorruptedMetadataHeader {
            reason: format!("{e}"),
        })?;
    let (rest, signature) =
        take::<_, _, nom::error::Error<&[u8]>>(16usize)(rest).map_err(|e| {
            Error::CorruptedMetadataHeader {
                reason: format!("{e}"),
            }
        })?;
    if signature != &MDA_SIGNATURE[..] {
        return Err(Error::CorruptedMetadataHeader {
            reason: "bad mda_header signature".into(),
        });
    }
    let (rest, version) =
        le_u32::<_, nom::error::Error<&[u8]>>(rest).map_err(|e| Error::CorruptedMetadataHeader {
            reason: format!("{e}"),
        })?;
    if version != 1 {
        return Err(Error::CorruptedMetadataHeader {
            reason: format!("unsupported mda_header version {version}"),
        });
    }
    let (rest, mda_offset) =
        le_u64::<_, nom::error::Error<&[u8]>>(rest).map_err(|e| Error::CorruptedMetadataHeader {
            reason: format!("{e}"),
        })?;
    if mda_offset != expected_offset {
        return Err(Error::CorruptedMetadataHeader {
            reason: format!(
                "mda_offset {mda_offset} does not match metadata area offset {expected_offset}"
            ),
        });
    }
    let (rest, mda_size) =
        le_u64::<_, nom::error::Error<&[u8]>>(rest).map_err(|e| Error::CorruptedMetadataHeader {
            reason: format!("{e}"),
        })?;
    let (_, raw_locations) =
        parse_raw_location_table(rest).map_err(|e| Error::CorruptedMetadataHeader {
            reason: format!("malformed raw location table: {e}"),
        })?;

    let computed = crc32::checksum(LVM_CRC_INITIAL, &buf[4..MDA_HEADER_LEN]);
    if computed != checksum {
        return Err(Error::CorruptedMetadataHeader {
            reason: format!(
                "mda_header checksum mismatch: stored {:#x}, computed {:#x}",
                checksum, computed
            ),
        });
    }

    let header = MdaHeader {
        checksum,
        version,
        mda_offset,
        mda_size,
        raw_locations,
    };
    tracing::trace!(?header);
    debug!(
        "MdaHeader: checksum: {:#x}, version: {}, mda_offset: {}, mda_size: {}, raw_locations: {}",
        header.checksum,
        header.version,
        header.mda_offset,
        header.mda_size,
        header.raw_locations.len()
    );
    Ok(header)
}

/// Selects the raw-location record to use for the current metadata text.
///
/// Open question (see DESIGN.md): the `flags` bit-0x01 semantics beyond
/// "ignored" are undocumented here; we replicate the reference behaviour of
/// picking the first non-terminal, non-ignored record in table order.
/// TODO: revisit if a fixture ever carries more than one committed
/// generation and "most recent" needs to be disambiguated some other way.
pub fn select_raw_location(header: &MdaHeader) -> Result<RawLocationRecord, Error> {
    let record = header
        .raw_locations
        .iter()
        .find(|r| !r.is_ignored())
        .copied()
        .ok_or_else(|| Error::CorruptedMetadataHeader {
            reason: "no committed raw location record".into(),
        })?;
    tracing::trace!(?record);
    debug!(
        "RawLocationRecord: data_offset: {}, data_size: {}, checksum: {:#x}, flags: {:#x}",
        record.data_offset, record.data_size, record.checksum, record.flags
    );
    Ok(record)
}

/// Reconstructs and validates the textual metadata described by `record`,
/// which lives inside the ring buffer following the mda_header at absolute
/// PV offset `mda_offset`. `read_at` is the caller's access to the PV bytes.
pub fn read_metadata_text<F>(
    header: &MdaHeader,
    record: &RawLocationRecord,
    mut read_at: F,
) -> Result<String, Error>
where
    F: FnMut(u64, usize) -> Result<Vec<u8>, Error>,
{
    let mut text = Vec::with_capacity(record.data_size as usize);
    let first_len = core::cmp::min(record.data_size, header.mda_size.saturating_sub(record.data_offset));
    let first_abs = header.mda_offset + record.data_offset;
    text.extend(read_at(first_abs, first_len as usize)?);

    if record.data_size > first_len {
        let remaining = record.data_size - first_len;
        let wrap_abs = header.mda_offset + SECTOR_SIZE;
        text.extend(read_at(wrap_abs, remaining as usize)?);
    }

    let computed = crc32::checksum(LVM_CRC_INITIAL, &text);
    if computed != record.checksum {
        return Err(Error::CorruptedMetadataText {
            reason: format!(
                "raw location checksum mismatch: stored {:#x}, computed {:#x}",
                record.checksum, computed
            ),
        });
    }

    let metadata = String::from_utf8(text).map_err(|e| Error::CorruptedMetadataText {
        reason: format!("metadata text is not valid UTF-8: {e}"),
    })?;
    tracing::debug!(%metadata);
    Ok(metadata)
}

pub fn ensure_ascii(reason: &str, bytes: &[u8]) -> Result<(), Error> {
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        Ok(())
    } else {
        Err(Error::CorruptedMetadataText {
            reason: reason.to_string(),
        })
    }
}
