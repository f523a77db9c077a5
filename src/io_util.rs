//! Small helpers over the caller-supplied byte sources. The core never reads
//! a full file into memory; every access is a bounded `seek` + `read`.

use acid_io::{Read, Seek, SeekFrom};

use crate::error::Error;

/// Blanket trait realizing the "byte reader" external collaborator from the
/// design: anything seekable and readable can back a physical volume.
pub trait PvSource: Read + Seek + Send {}
impl<T: Read + Seek + Send> PvSource for T {}

fn io_err(source: acid_io::Error) -> Error {
    Error::Io { source }
}

/// Reads exactly `len` bytes at `offset`. A short read is treated as
/// corruption of whatever on-disk structure the caller expected to find
/// there, since every *required* header has a fixed, known size.
pub(crate) fn read_exact_at(
    reader: &mut dyn PvSource,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, Error> {
    reader.seek(SeekFrom::Start(offset)).map_err(io_err)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(io_err)?;
    Ok(buf)
}

/// Reads up to `len` bytes at `offset`, returning fewer than `len` bytes on
/// EOF without treating that as an error — used for LV data reads, where a
/// short read at the end of a segment or LV is the normal EOF signal.
pub(crate) fn read_best_effort(
    reader: &mut dyn PvSource,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, Error> {
    reader.seek(SeekFrom::Start(offset)).map_err(io_err)?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut buf[filled..]).map_err(io_err)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}
