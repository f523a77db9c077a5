//! The immutable, built data model: a `VolumeGroup` and everything it owns.
//!
//! Nothing in this module parses or validates; `crate::builder` is solely
//! responsible for producing values that already satisfy the invariants
//! documented on each type.

use serde::Serialize;

/// One arm of a striped segment: a physical volume (by logical name, e.g.
/// `pv0`) and a starting physical-extent offset within that PV's data area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stripe {
    pub pv_name: String,
    /// Byte offset into the target PV's data area (`extent_size * pe_index`).
    pub pe_offset: u64,
}

/// How a `Segment`'s bytes map onto its stripes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SegmentType {
    Linear,
    Striped,
}

impl core::fmt::Display for SegmentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SegmentType::Linear => write!(f, "linear"),
            SegmentType::Striped => write!(f, "striped"),
        }
    }
}

/// A contiguous run of a logical volume's bytes, implemented by a single
/// layout scheme.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Byte offset of this segment's first byte within its LV.
    pub start: u64,
    /// Length of this segment in bytes.
    pub size: u64,
    pub extent_count: u64,
    pub segment_type: SegmentType,
    /// Stripe width in bytes: equal to the VG's extent size for `Linear`,
    /// equal to the declared `stripe_size` for `Striped`.
    pub stripe_size: u64,
    pub stripes: Vec<Stripe>,
}

impl Segment {
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end()
    }
}

/// A named, sized, byte-addressable object composed of segments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalVolume {
    pub name: String,
    pub id: String,
    pub size: u64,
    pub segments: Vec<Segment>,
    /// `Some` when the builder recognized an unsupported segment type
    /// (mirror, cache, thin, raid, ...) while building this LV; reads
    /// against such an LV fail with `Error::UnsupportedSegmentType`
    /// regardless of which byte range is requested.
    pub unsupported_segment_type: Option<String>,
}

impl LogicalVolume {
    /// Finds the segment covering `offset`, if any.
    pub fn segment_at(&self, offset: u64) -> Option<&Segment> {
        if offset >= self.size {
            return None;
        }
        // Segments are sorted and tile [0, size) contiguously, so a binary
        // search on start offset suffices.
        match self.segments.binary_search_by(|s| {
            if offset < s.start {
                core::cmp::Ordering::Greater
            } else if offset >= s.end() {
                core::cmp::Ordering::Less
            } else {
                core::cmp::Ordering::Equal
            }
        }) {
            Ok(idx) => self.segments.get(idx),
            Err(_) => None,
        }
    }
}

/// A disk or partition whose data area holds extents for a volume group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalVolume {
    pub name: String,
    pub id: String,
    pub device_path: String,
    pub size: u64,
    /// Byte offset of the start of this PV's data area (`pe_start`).
    pub pe_start: u64,
}

/// A named collection of physical volumes sharing one extent size and one
/// textual-metadata description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeGroup {
    pub name: String,
    pub id: String,
    pub seqno: u64,
    pub extent_size: u64,
    pub physical_volumes: Vec<PhysicalVolume>,
    pub logical_volumes: Vec<LogicalVolume>,
}

impl VolumeGroup {
    pub fn pvs(&self) -> impl Iterator<Item = &PhysicalVolume> {
        self.physical_volumes.iter()
    }

    pub fn lvs(&self) -> impl Iterator<Item = &LogicalVolume> {
        self.logical_volumes.iter()
    }

    pub fn find_pv(&self, name: &str) -> Option<&PhysicalVolume> {
        self.physical_volumes.iter().find(|pv| pv.name == name)
    }

    pub fn find_lv_by_name(&self, name: &str) -> Option<&LogicalVolume> {
        self.logical_volumes.iter().find(|lv| lv.name == name)
    }

    pub fn find_lv_by_id(&self, id: &str) -> Option<&LogicalVolume> {
        self.logical_volumes.iter().find(|lv| lv.id == id)
    }
}
