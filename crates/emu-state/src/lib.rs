//! Deterministic state serialization for emulator snapshots.
//!
//! Every mutable field of the emulator is written to a little-endian byte
//! stream in a fixed declaration order. The stream carries no field names
//! and no padding, only a format version tag at the front, so two snapshots
//! of the same state are byte-identical. This is what makes rollback
//! checkpoints and save-state files comparable with a plain CRC.

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};

/// Current snapshot stream format version.
pub const FORMAT_VERSION: u8 = 1;

/// Error produced while writing or reading a state stream.
#[derive(Debug)]
pub enum StateError {
    /// Underlying I/O failure.
    Io(io::Error),
    /// The stream's version tag does not match [`FORMAT_VERSION`].
    Version { found: u8 },
    /// A field decoded to a value outside its domain (e.g. a bool byte
    /// that is neither 0 nor 1). The stream is corrupt.
    Corrupt(&'static str),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "state i/o error: {err}"),
            Self::Version { found } => {
                write!(f, "unsupported state format {found} (expected {FORMAT_VERSION})")
            }
            Self::Corrupt(what) => write!(f, "corrupt state stream: {what}"),
        }
    }
}

impl Error for StateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StateError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// A component whose mutable state can be serialized and restored.
///
/// `save_state` followed by `load_state` into a fresh component built from
/// the same ROM must resume bit-identical behavior. Implementations write
/// and read fields in the same fixed order; there is no self-description
/// in the stream.
pub trait Snapshot {
    fn save_state(&self, w: &mut StateWriter<'_>) -> Result<(), StateError>;
    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError>;
}

/// Little-endian primitive writer over any byte sink.
pub struct StateWriter<'a> {
    out: &'a mut dyn Write,
}

impl<'a> StateWriter<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), StateError> {
        self.out.write_all(&[v])?;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), StateError> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), StateError> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), StateError> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), StateError> {
        self.write_u8(u8::from(v))
    }

    /// Write a fixed-size run of bytes. The length is not encoded; reader
    /// and writer must agree on it.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        self.out.write_all(bytes)?;
        Ok(())
    }
}

/// Little-endian primitive reader, the mirror of [`StateWriter`].
pub struct StateReader<'a> {
    src: &'a mut dyn Read,
}

impl<'a> StateReader<'a> {
    pub fn new(src: &'a mut dyn Read) -> Self {
        Self { src }
    }

    pub fn read_u8(&mut self) -> Result<u8, StateError> {
        let mut buf = [0u8; 1];
        self.src.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, StateError> {
        let mut buf = [0u8; 2];
        self.src.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, StateError> {
        let mut buf = [0u8; 4];
        self.src.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, StateError> {
        let mut buf = [0u8; 8];
        self.src.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_bool(&mut self) -> Result<bool, StateError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(StateError::Corrupt("bool byte out of range")),
        }
    }

    /// Fill `buf` from the stream.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), StateError> {
        self.src.read_exact(buf)?;
        Ok(())
    }
}

/// Serialize a component to a fresh byte vector, version tag included.
pub fn snapshot_to_vec<S: Snapshot>(s: &S) -> Result<Vec<u8>, StateError> {
    let mut buf = Vec::new();
    let mut w = StateWriter::new(&mut buf);
    w.write_u8(FORMAT_VERSION)?;
    s.save_state(&mut w)?;
    Ok(buf)
}

/// Restore a component from bytes produced by [`snapshot_to_vec`].
///
/// On error the component is left in an unspecified state; the caller must
/// discard it.
pub fn snapshot_from_slice<S: Snapshot>(s: &mut S, bytes: &[u8]) -> Result<(), StateError> {
    let mut src = bytes;
    let mut r = StateReader::new(&mut src);
    let found = r.read_u8()?;
    if found != FORMAT_VERSION {
        return Err(StateError::Version { found });
    }
    s.load_state(&mut r)
}

/// IEEE CRC-32 of a byte slice, used as the checkpoint content hash.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = Vec::new();
        {
            let mut w = StateWriter::new(&mut buf);
            w.write_u8(0xAB).unwrap();
            w.write_u16(0x1234).unwrap();
            w.write_u32(0xDEAD_BEEF).unwrap();
            w.write_u64(0x0102_0304_0506_0708).unwrap();
            w.write_bool(true).unwrap();
            w.write_bytes(&[1, 2, 3]).unwrap();
        }

        let mut src = buf.as_slice();
        let mut r = StateReader::new(&mut src);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert!(r.read_bool().unwrap());
        let mut tail = [0u8; 3];
        r.read_bytes(&mut tail).unwrap();
        assert_eq!(tail, [1, 2, 3]);
    }

    #[test]
    fn streams_are_little_endian() {
        let mut buf = Vec::new();
        let mut w = StateWriter::new(&mut buf);
        w.write_u16(0x1234).unwrap();
        w.write_u32(0xAABB_CCDD).unwrap();
        assert_eq!(buf, [0x34, 0x12, 0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn bad_bool_is_corrupt() {
        let bytes = [7u8];
        let mut src = bytes.as_slice();
        let mut r = StateReader::new(&mut src);
        assert!(matches!(r.read_bool(), Err(StateError::Corrupt(_))));
    }

    #[test]
    fn short_stream_is_io_error() {
        let bytes = [0x34u8];
        let mut src = bytes.as_slice();
        let mut r = StateReader::new(&mut src);
        assert!(matches!(r.read_u16(), Err(StateError::Io(_))));
    }

    struct Pair {
        a: u16,
        b: bool,
    }

    impl Snapshot for Pair {
        fn save_state(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
            w.write_u16(self.a)?;
            w.write_bool(self.b)
        }

        fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
            self.a = r.read_u16()?;
            self.b = r.read_bool()?;
            Ok(())
        }
    }

    #[test]
    fn snapshot_vec_round_trip() {
        let saved = Pair { a: 0xBEEF, b: true };
        let bytes = snapshot_to_vec(&saved).unwrap();
        assert_eq!(bytes[0], FORMAT_VERSION);

        let mut restored = Pair { a: 0, b: false };
        snapshot_from_slice(&mut restored, &bytes).unwrap();
        assert_eq!(restored.a, 0xBEEF);
        assert!(restored.b);
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut bytes = snapshot_to_vec(&Pair { a: 1, b: false }).unwrap();
        bytes[0] = FORMAT_VERSION + 1;
        let mut target = Pair { a: 0, b: false };
        assert!(matches!(
            snapshot_from_slice(&mut target, &bytes),
            Err(StateError::Version { .. })
        ));
    }

    #[test]
    fn crc32_known_value() {
        // Standard IEEE test vector.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
