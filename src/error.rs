//! Error taxonomy for the crate.
//!
//! Parse-time errors abort `Handle::open` and leave no handle behind; read-time
//! errors surface to the caller without closing the handle.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// No `LABELONE` signature found in the first four sectors.
    NoSignature,

    /// A `LABELONE` label or PV header was structurally present but failed a
    /// bounds or checksum check.
    CorruptedLabel { reason: String },

    /// The `mda_header` failed its signature, version, or checksum check.
    CorruptedMetadataHeader { reason: String },

    /// The raw-location record's checksum did not match the reconstructed
    /// textual metadata.
    CorruptedMetadataText { reason: String },

    /// Syntax error in the textual metadata configuration language.
    MalformedMetadata { line: usize, col: usize, reason: String },

    /// The grammar parsed, but named an unrecognized or unsupported segment
    /// type (mirror, cache, thin, raid, ...).
    UnsupportedSegmentType { segment_type: String },

    /// A structural/semantic invariant (tiling, alignment, cross-reference,
    /// overflow) was violated.
    Inconsistent { reason: String },

    /// A logical-volume read needed a physical volume that is not attached.
    PhysicalVolumeMissing { uuid: String },

    /// A read or seek offset computation exceeded the declared bounds of the
    /// target physical volume.
    OutOfRange { reason: String },

    /// The underlying byte reader failed.
    Io { source: acid_io::Error },

    /// The caller passed an invalid argument (e.g. empty name lookup).
    InvalidArgument { reason: String },

    /// The caller invoked an operation not legal in the handle's current
    /// state (e.g. reading before `attach_physical_volumes`).
    InvalidState { reason: String },

    /// Cooperative cancellation observed via `signal_abort`.
    AbortRequested,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
