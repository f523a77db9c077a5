//! The `Handle`: owns the volume group and the per-PV byte readers, and
//! enforces the `DescriptorOpen -> VolumesAttached -> Closed` state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;
use crate::header::{self, SECTOR_SIZE};
use crate::io_util::{self, PvSource};
use crate::lv::LvCursor;
use crate::metadata;
use crate::model::VolumeGroup;

const LABEL_SCAN_LEN: usize = 4 * SECTOR_SIZE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    DescriptorOpen,
    VolumesAttached,
    Closed,
}

/// Normalizes a metadata `id` string (often hyphenated, e.g.
/// `aBcDeF-...`) to the plain 32-character form stored in binary headers.
fn normalize_uuid(id: &str) -> String {
    id.chars().filter(|c| *c != '-').collect()
}

/// Probes a single physical volume's label and header, returning the raw
/// on-disk UUID (32 characters, no hyphens) without touching any metadata
/// area. Shared by `Handle::open` (for the descriptor source) and
/// `Handle::attach_physical_volumes` (for every subsequent source).
fn probe_pv_identity(reader: &mut dyn PvSource) -> Result<String, Error> {
    let sectors = io_util::read_best_effort(reader, 0, LABEL_SCAN_LEN)?;
    let (label_offset, label) = header::scan_label(&sectors)?;
    let region_start = label_offset as usize;
    let region_end = region_start + SECTOR_SIZE as usize;
    let region = sectors
        .get(region_start..region_end)
        .ok_or_else(|| Error::CorruptedLabel {
            reason: "label sector truncated".into(),
        })?;
    let pvh = header::parse_physical_volume_header(region, &label)?;
    Ok(pvh.pv_uuid)
}

/// Reads and validates the textual metadata for the physical volume
/// identified by `label`/`pvh`, returning the parsed node tree.
fn read_metadata_nodes(
    reader: &mut dyn PvSource,
    region: &[u8],
    label: &header::LabelHeader,
) -> Result<Vec<metadata::Node>, Error> {
    let pvh = header::parse_physical_volume_header(region, label)?;
    let metadata_area = pvh
        .metadata_areas
        .first()
        .ok_or_else(|| Error::CorruptedLabel {
            reason: "physical volume header lists no metadata areas".into(),
        })?;

    let mda_buf = io_util::read_exact_at(reader, metadata_area.offset, SECTOR_SIZE as usize)?;
    let mda_header = header::parse_mda_header(&mda_buf, metadata_area.offset)?;
    let record = header::select_raw_location(&mda_header)?;
    let text = header::read_metadata_text(&mda_header, &record, |offset, len| {
        io_util::read_exact_at(reader, offset, len)
    })?;
    metadata::parse(&text)
}

/// Determines whether `source` carries an LVM2 label. Checks the signature
/// only — no checksum, sector-number, or structural validation — matching
/// `Handle::open`'s stricter behaviour.
pub fn probe<R: PvSource>(source: &mut R) -> Result<bool, Error> {
    let sectors = io_util::read_best_effort(source, 0, LABEL_SCAN_LEN)?;
    Ok(header::has_label_signature(&sectors))
}

pub struct Handle {
    state: HandleState,
    vg: Option<VolumeGroup>,
    readers: HashMap<String, Box<dyn PvSource>>,
    abort: Arc<AtomicBool>,
}

impl Handle {
    /// Parses the label, PV header, metadata area, and textual metadata
    /// reachable through `descriptor_source` alone, and builds the volume
    /// group. The descriptor source itself becomes the reader for whichever
    /// physical volume in the resulting group it turns out to be.
    pub fn open<R: PvSource + 'static>(mut descriptor_source: R) -> Result<Self, Error> {
        let sectors = io_util::read_best_effort(&mut descriptor_source, 0, LABEL_SCAN_LEN)?;
        let (label_offset, label) = header::scan_label(&sectors)?;
        let region_start = label_offset as usize;
        let region = sectors
            .get(region_start..region_start + SECTOR_SIZE as usize)
            .ok_or_else(|| Error::CorruptedLabel {
                reason: "label sector truncated".into(),
            })?;

        let nodes = read_metadata_nodes(&mut descriptor_source, region, &label)?;
        let vg = crate::builder::build_volume_group(&nodes)?;

        let pvh = header::parse_physical_volume_header(region, &label)?;
        let descriptor_uuid = normalize_uuid(&pvh.pv_uuid);
        let owning_pv = vg
            .physical_volumes
            .iter()
            .find(|pv| normalize_uuid(&pv.id) == descriptor_uuid)
            .ok_or_else(|| Error::Inconsistent {
                reason: "descriptor source's physical volume is not a member of its own volume group".into(),
            })?;

        log::debug!(
            "Handle::open: volume group '{}' opened via descriptor physical volume '{}'",
            vg.name,
            owning_pv.name
        );

        let mut readers: HashMap<String, Box<dyn PvSource>> = HashMap::new();
        readers.insert(owning_pv.id.clone(), Box::new(descriptor_source));

        Ok(Handle {
            state: HandleState::DescriptorOpen,
            vg: Some(vg),
            readers,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Probes each of `sources` for its physical-volume identity and, for
    /// every one that matches a physical volume already named in the
    /// volume group, attaches it as that physical volume's byte reader.
    /// Always transitions the handle to `VolumesAttached`, even if no
    /// source could be matched.
    pub fn attach_physical_volumes<R: PvSource + 'static>(
        &mut self,
        sources: Vec<R>,
    ) -> Result<(), Error> {
        if self.state == HandleState::Closed {
            return Err(Error::InvalidState {
                reason: "handle is closed".into(),
            });
        }
        let vg = self.vg.as_ref().ok_or_else(|| Error::InvalidState {
            reason: "handle has no volume group".into(),
        })?;

        for mut source in sources {
            let uuid = match probe_pv_identity(&mut source) {
                Ok(uuid) => normalize_uuid(&uuid),
                Err(e) => {
                    tracing::debug!(?e, "skipping source that does not carry a valid PV label");
                    continue;
                }
            };
            if let Some(pv) = vg.physical_volumes.iter().find(|pv| normalize_uuid(&pv.id) == uuid) {
                log::debug!("attached physical volume '{}' (uuid {})", pv.name, uuid);
                self.readers.insert(pv.id.clone(), Box::new(source));
            } else {
                tracing::debug!(%uuid, "probed source's uuid does not match any physical volume in the volume group");
            }
        }

        self.state = HandleState::VolumesAttached;
        Ok(())
    }

    /// Drops all readers and the volume group. Idempotent.
    pub fn close(&mut self) {
        self.readers.clear();
        self.vg = None;
        self.state = HandleState::Closed;
    }

    pub fn volume_group(&self) -> Result<&VolumeGroup, Error> {
        self.vg.as_ref().ok_or_else(|| Error::InvalidState {
            reason: "handle is closed".into(),
        })
    }

    /// Sets the cooperative cancellation flag. Polled by in-flight
    /// `LvCursor` reads between underlying reads.
    pub fn signal_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub(crate) fn abort_flag(&self) -> &Arc<AtomicBool> {
        &self.abort
    }

    pub(crate) fn reader_for(&mut self, pv_uuid: &str) -> Option<&mut Box<dyn PvSource>> {
        self.readers.get_mut(pv_uuid)
    }

    fn require_attached(&self) -> Result<(), Error> {
        if self.state != HandleState::VolumesAttached {
            return Err(Error::InvalidState {
                reason: "logical volume reads require attach_physical_volumes to have been called".into(),
            });
        }
        Ok(())
    }

    pub fn open_lv<'h>(&'h mut self, name: &str) -> Result<LvCursor<'h>, Error> {
        self.require_attached()?;
        let vg = self.vg.as_ref().ok_or_else(|| Error::InvalidState {
            reason: "handle has no volume group".into(),
        })?;
        let lv = vg
            .find_lv_by_name(name)
            .ok_or_else(|| Error::InvalidArgument {
                reason: format!("no logical volume named '{name}'"),
            })?
            .clone();
        Ok(LvCursor::new(lv, self))
    }

    pub fn open_lv_by_id<'h>(&'h mut self, id: &str) -> Result<LvCursor<'h>, Error> {
        self.require_attached()?;
        let vg = self.vg.as_ref().ok_or_else(|| Error::InvalidState {
            reason: "handle has no volume group".into(),
        })?;
        let lv = vg
            .find_lv_by_id(id)
            .ok_or_else(|| Error::InvalidArgument {
                reason: format!("no logical volume with id '{id}'"),
            })?
            .clone();
        Ok(LvCursor::new(lv, self))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.close();
    }
}
