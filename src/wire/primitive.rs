//! Minimal wire-level primitives.
//!
//! The full 9P wire codec is an external collaborator (spec §1); this
//! module only implements the fixed-width integer/string/data helpers
//! that the core itself needs to encode (`LeaseRecord`/`FidRecord`,
//! the directory block codec, `Qid`, `StatRecord`) per the contracts
//! stated in spec §6.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Reserved tag meaning "this is a version-negotiation message".
pub const NOTAG: u16 = 0xFFFF;
/// Reserved tag meaning "allocate a tag on send".
pub const ALLOCTAG: u16 = 0xFFFE;

/// Client-visible per-read/write header overhead (`RREAD_HEADER`).
pub const RREAD_HEADER: u32 = 11;
/// Envoy storage read/write overhead on top of the client header.
pub const STORAGE_SLUSH: u32 = 8;
/// Write header offset.
pub const WRITE_HEADER_OFFSET: u32 = 23;
/// Maximum walk names per request.
pub const MAXWELEM: usize = 16;
/// Maximum numeric-list elements (exits/fids per grant chunk).
pub const MAXFELEM: usize = 64;
/// Maximum symlink/device extension length.
pub const MAX_EXTENSION_LEN: usize = 1000;

pub const GLOBAL_MIN_SIZE: u32 = 256;
pub const GLOBAL_MAX_SIZE: u32 = 1 << 20;

/// Fixed-overhead byte counts for envoy-to-envoy record-bearing
/// messages (spec §6).
pub const TEGRANT_OVERHEAD: usize = 12;
pub const TEREVOKE_OVERHEAD: usize = 12;
pub const TEMIGRATE_OVERHEAD: usize = 9;
pub const TERENAMETREE_OVERHEAD: usize = 13;

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    r.read_u8()
}

pub fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    r.read_u16::<LittleEndian>()
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<LittleEndian>()
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    r.read_u64::<LittleEndian>()
}

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_u8(v)
}

pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_u16::<LittleEndian>(v)
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(v)
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(v)
}

/// Reads a `len[2] bytes[len]` utf-8 string. A zero-length string
/// decodes to `""`, matching "a missing trailing string in a record is
/// treated as empty" (spec §6).
pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = read_u16(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    write_u16(w, bytes.len() as u16)?;
    w.write_all(bytes)
}

/// Reads a `len[4] bytes[len]` data block. The high byte of `len` is
/// ignored (24-bit effective length, spec §6).
pub fn read_data<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let raw_len = read_u32(r)?;
    let len = (raw_len & 0x00FF_FFFF) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_data<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    write_u32(w, (data.len() as u32) & 0x00FF_FFFF)?;
    w.write_all(data)
}
