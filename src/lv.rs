//! The address-mapping engine (component 8): translates a logical-volume
//! offset into one or more reads against the physical volumes that back it,
//! honoring linear and striped segment layouts.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use crate::error::Error;
use crate::handle::Handle;
use crate::io_util;
use crate::model::{LogicalVolume, SegmentType};

/// Reference point for [`LvCursor::seek`].
#[derive(Debug, Clone, Copy)]
pub enum Whence {
    Start,
    Current,
    End,
}

#[derive(Clone)]
struct PvInfo {
    id: String,
    pe_start: u64,
    size: u64,
}

fn overflow(reason: &str) -> Error {
    Error::Inconsistent {
        reason: format!("address computation overflowed: {reason}"),
    }
}

/// A seekable, byte-addressable view over one logical volume, borrowing the
/// `Handle` that owns the physical-volume readers it reads through.
pub struct LvCursor<'h> {
    lv: LogicalVolume,
    pv_info: HashMap<String, PvInfo>,
    handle: &'h mut Handle,
    position: u64,
}

impl<'h> LvCursor<'h> {
    pub(crate) fn new(lv: LogicalVolume, handle: &'h mut Handle) -> Self {
        let pv_info = handle
            .volume_group()
            .map(|vg| {
                vg.physical_volumes
                    .iter()
                    .map(|pv| {
                        (
                            pv.name.clone(),
                            PvInfo {
                                id: pv.id.clone(),
                                pe_start: pv.pe_start,
                                size: pv.size,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        LvCursor {
            lv,
            pv_info,
            handle,
            position: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.lv.name
    }

    pub fn size(&self) -> u64 {
        self.lv.size
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Moves the cursor. Seeking past `size` is legal; the next read simply
    /// returns 0 bytes. A result that would be negative is an error.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, Error> {
        let base: i128 = match whence {
            Whence::Start => 0,
            Whence::Current => self.position as i128,
            Whence::End => self.lv.size as i128,
        };
        let target = base + offset as i128;
        if target < 0 {
            return Err(Error::OutOfRange {
                reason: "seek would result in a negative position".into(),
            });
        }
        self.position = target as u64;
        Ok(self.position)
    }

    /// Reads up to `buf.len()` bytes starting at the current position,
    /// advancing it by the number of bytes actually read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let bytes = self.map_read(self.position, buf.len())?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        self.position += bytes.len() as u64;
        Ok(bytes.len())
    }

    /// Reads up to `buf.len()` bytes at `offset`, without disturbing the
    /// cursor's current position.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let bytes = self.map_read(offset, buf.len())?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn map_read(&mut self, mut offset: u64, requested: usize) -> Result<Vec<u8>, Error> {
        if let Some(segment_type) = &self.lv.unsupported_segment_type {
            return Err(Error::UnsupportedSegmentType {
                segment_type: segment_type.clone(),
            });
        }
        let mut out = Vec::with_capacity(requested);
        let mut remaining = requested;

        while remaining > 0 {
            if self.handle.abort_flag().load(Ordering::SeqCst) {
                return Ok(out);
            }
            if offset >= self.lv.size {
                break;
            }
            let Some(segment) = self.lv.segment_at(offset) else {
                break;
            };
            let local = offset - segment.start;

            let (pv_name, phys_offset, run) = match segment.segment_type {
                SegmentType::Linear => {
                    let stripe = &segment.stripes[0];
                    let run = core::cmp::min(remaining as u64, segment.size - local);
                    let phys = stripe
                        .pe_offset
                        .checked_add(local)
                        .ok_or_else(|| overflow("linear pe_offset + local"))?;
                    (stripe.pv_name.clone(), phys, run)
                }
                SegmentType::Striped => {
                    let width = segment.stripe_size;
                    let stripe_count = segment.stripes.len() as u64;
                    let unit = local / width;
                    let stripe_idx = (unit % stripe_count) as usize;
                    let round = unit / stripe_count;
                    let within = local % width;
                    let stripe = &segment.stripes[stripe_idx];
                    let phys = stripe
                        .pe_offset
                        .checked_add(
                            round
                                .checked_mul(width)
                                .ok_or_else(|| overflow("round * stripe_size"))?,
                        )
                        .and_then(|v| v.checked_add(within))
                        .ok_or_else(|| overflow("pe_offset + round*stripe_size + within"))?;
                    let run = [remaining as u64, width - within, segment.size - local]
                        .into_iter()
                        .min()
                        .unwrap();
                    (stripe.pv_name.clone(), phys, run)
                }
            };

            let pv = self.pv_info.get(&pv_name).cloned().ok_or_else(|| {
                Error::Inconsistent {
                    reason: format!("segment references unknown physical volume '{pv_name}'"),
                }
            })?;
            let abs_offset = pv
                .pe_start
                .checked_add(phys_offset)
                .ok_or_else(|| overflow("pe_start + phys_offset"))?;
            let abs_end = abs_offset
                .checked_add(run)
                .ok_or_else(|| overflow("abs_offset + run"))?;
            if pv.size != 0 && abs_end > pv.size {
                return Err(Error::Inconsistent {
                    reason: format!(
                        "mapped read [{abs_offset}, {abs_end}) falls outside physical volume '{pv_name}' of size {}",
                        pv.size
                    ),
                });
            }

            tracing::trace!(pv = %pv_name, abs_offset, run, "mapping logical volume read");
            let reader = self
                .handle
                .reader_for(&pv.id)
                .ok_or_else(|| Error::PhysicalVolumeMissing { uuid: pv.id.clone() })?;
            let bytes = io_util::read_best_effort(reader.as_mut(), abs_offset, run as usize)?;
            let got = bytes.len();
            log::debug!(
                "LvCursor read: pv: {}, abs_offset: {}, requested: {}, got: {}",
                pv_name,
                abs_offset,
                run,
                got
            );
            out.extend_from_slice(&bytes);
            offset += got as u64;
            remaining -= got;
            if got < run as usize {
                break;
            }
        }

        Ok(out)
    }
}
