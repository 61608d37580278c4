//! `StatRecord`: full 9P stat entry (spec §3, §6).

use std::io::{self, Read, Write};

use super::primitive::{
    read_string, read_u32, read_u64, write_string, write_u32, write_u64,
};
use super::qid::Qid;

/// Full 9P stat entry. `nsize` is computed, not stored, so invariant 7
/// ("`stat` size from `stat.nsize` equals the byte length produced by
/// the packer") can be checked against the actual encode output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub qid: Qid,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub uid: u32,
    pub gid: u32,
    pub muid: u32,
    pub owner: String,
    pub group: String,
    pub muid_name: String,
    pub name: String,
    /// Symlink target or device spec; empty when not applicable.
    pub extension: String,
}

impl StatRecord {
    /// Encodes the body (without the leading 2-byte `nsize` prefix).
    fn encode_body<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.qid.encode(w)?;
        write_u32(w, self.mode)?;
        write_u32(w, self.atime)?;
        write_u32(w, self.mtime)?;
        write_u64(w, self.length)?;
        write_string(w, &self.name)?;
        write_string(w, &self.owner)?;
        write_string(w, &self.group)?;
        write_string(w, &self.muid_name)?;
        write_string(w, &self.extension)?;
        write_u32(w, self.uid)?;
        write_u32(w, self.gid)?;
        write_u32(w, self.muid)
    }

    /// Encodes the length-prefixed record: `nsize[2] body`.
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut body = Vec::new();
        self.encode_body(&mut body)?;
        write_u32(w, body.len() as u32).map(|_| ())?;
        w.write_all(&body)?;
        Ok(4 + body.len())
    }

    pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let nsize = read_u32(r)? as usize;
        let mut body = vec![0u8; nsize];
        r.read_exact(&mut body)?;
        let mut cur = io::Cursor::new(body);
        let qid = Qid::decode(&mut cur)?;
        let mode = read_u32(&mut cur)?;
        let atime = read_u32(&mut cur)?;
        let mtime = read_u32(&mut cur)?;
        let length = read_u64(&mut cur)?;
        let name = read_string(&mut cur)?;
        let owner = read_string(&mut cur)?;
        let group = read_string(&mut cur)?;
        let muid_name = read_string(&mut cur)?;
        let extension = read_string(&mut cur)?;
        let uid = read_u32(&mut cur)?;
        let gid = read_u32(&mut cur)?;
        let muid = read_u32(&mut cur)?;
        Ok(StatRecord {
            qid,
            mode,
            atime,
            mtime,
            length,
            uid,
            gid,
            muid,
            owner,
            group,
            muid_name,
            name,
            extension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::qid::QTFILE;

    fn sample() -> StatRecord {
        StatRecord {
            qid: Qid::new(QTFILE, 1, 42),
            mode: 0o644,
            atime: 100,
            mtime: 200,
            length: 4096,
            uid: 1000,
            gid: 1000,
            muid: 1000,
            owner: "alice".into(),
            group: "staff".into(),
            muid_name: "alice".into(),
            name: "file.txt".into(),
            extension: String::new(),
        }
    }

    #[test]
    fn round_trip() {
        let s = sample();
        let mut buf = Vec::new();
        s.encode(&mut buf).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(StatRecord::decode(&mut cur).unwrap(), s);
    }

    #[test]
    fn encoded_len_matches_nsize_prefix_plus_prefix() {
        let s = sample();
        let mut buf = Vec::new();
        let written = s.encode(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        let nsize = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        assert_eq!(nsize + 4, buf.len());
    }
}
