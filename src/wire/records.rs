//! `LeaseRecord`/`FidRecord` wire codec and size-bounded chunking
//! (spec §4.5, §6).

use std::io::{self, Read, Write};

use super::primitive::{
    read_string, read_u32, read_u64, read_u8, write_string, write_u32, write_u64, write_u8,
};
use super::qid::Address;

/// `len[2] pathname[s] readonly[1] oid[8] address[4] port[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub pathname: String,
    pub readonly: bool,
    pub oid: u64,
    pub address: Address,
}

impl LeaseRecord {
    /// Encoded size in bytes, used to decide how many records fit in
    /// a size-bounded grant/revoke/migrate/rename-tree message.
    pub fn wire_len(&self) -> usize {
        2 + self.pathname.len() + 1 + 8 + 4 + 2
    }

    fn encode_body<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_string(w, &self.pathname)?;
        write_u8(w, self.readonly as u8)?;
        write_u64(w, self.oid)?;
        self.address.encode(w)
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut body = Vec::new();
        self.encode_body(&mut body)?;
        super::primitive::write_u16(w, body.len() as u16)?;
        w.write_all(&body)
    }

    pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let len = super::primitive::read_u16(r)? as u64;
        let mut body = vec![0u8; len as usize];
        r.read_exact(&mut body)?;
        let mut cur = io::Cursor::new(body);
        let pathname = read_string(&mut cur)?;
        let readonly = read_u8(&mut cur)? != 0;
        let oid = read_u64(&mut cur)?;
        let address = Address::decode(&mut cur)?;
        Ok(LeaseRecord { pathname, readonly, oid, address })
    }
}

/// `len[2] fid[4] pathname[s] user[s] status[1] omode[4]
/// readdir_cookie[8] address[4] port[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidRecord {
    pub fid: u32,
    pub pathname: String,
    pub user: String,
    /// 0 = unopened, 1 = open file, 2 = open dir (spec §3 `Fid.status`).
    pub status: u8,
    pub omode: u32,
    pub readdir_cookie: u64,
    pub address: Address,
}

impl FidRecord {
    pub fn wire_len(&self) -> usize {
        2 + 4 + (2 + self.pathname.len()) + (2 + self.user.len()) + 1 + 4 + 8 + 4 + 2
    }

    fn encode_body<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.fid)?;
        write_string(w, &self.pathname)?;
        write_string(w, &self.user)?;
        write_u8(w, self.status)?;
        write_u32(w, self.omode)?;
        write_u64(w, self.readdir_cookie)?;
        self.address.encode(w)
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut body = Vec::new();
        self.encode_body(&mut body)?;
        super::primitive::write_u16(w, body.len() as u16)?;
        w.write_all(&body)
    }

    pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let len = super::primitive::read_u16(r)? as u64;
        let mut body = vec![0u8; len as usize];
        r.read_exact(&mut body)?;
        let mut cur = io::Cursor::new(body);
        let fid = read_u32(&mut cur)?;
        let pathname = read_string(&mut cur)?;
        let user = read_string(&mut cur)?;
        let status = read_u8(&mut cur)?;
        let omode = read_u32(&mut cur)?;
        let readdir_cookie = read_u64(&mut cur)?;
        let address = Address::decode(&mut cur)?;
        Ok(FidRecord { fid, pathname, user, status, omode, readdir_cookie, address })
    }
}

/// Packs `exits`/`fids` into as many size-bounded chunks as needed,
/// emitting `Start`/`Continue`/`End` markers (or a single `Single`
/// chunk when everything fits), per spec §4.5 step 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Single,
    Start,
    Continue,
    End,
}

#[derive(Debug, Clone)]
pub struct GrantChunk {
    pub kind: ChunkKind,
    pub exits: Vec<LeaseRecord>,
    pub fids: Vec<FidRecord>,
}

/// Greedily fills chunks up to `budget` bytes of record payload
/// (exits and fids interleaved by arrival order is not required; we
/// drain exits first, then fids, a fill-then-spill buffer style).
pub fn chunk_grant_payload(
    overhead: usize,
    budget: usize,
    exits: Vec<LeaseRecord>,
    fids: Vec<FidRecord>,
) -> Vec<GrantChunk> {
    let mut chunks = Vec::new();
    let mut cur_exits = Vec::new();
    let mut cur_fids = Vec::new();
    let mut used = overhead;

    let mut exits = exits.into_iter().peekable();
    let mut fids = fids.into_iter().peekable();

    let flush = |chunks: &mut Vec<GrantChunk>,
                 cur_exits: &mut Vec<LeaseRecord>,
                 cur_fids: &mut Vec<FidRecord>,
                 used: &mut usize,
                 kind: ChunkKind| {
        chunks.push(GrantChunk {
            kind,
            exits: std::mem::take(cur_exits),
            fids: std::mem::take(cur_fids),
        });
        *used = overhead;
    };

    while let Some(rec) = exits.peek() {
        let len = rec.wire_len();
        if used + len > budget && used > overhead {
            flush(&mut chunks, &mut cur_exits, &mut cur_fids, &mut used, ChunkKind::Continue);
        }
        used += len;
        cur_exits.push(exits.next().unwrap());
    }
    while let Some(rec) = fids.peek() {
        let len = rec.wire_len();
        if used + len > budget && used > overhead {
            flush(&mut chunks, &mut cur_exits, &mut cur_fids, &mut used, ChunkKind::Continue);
        }
        used += len;
        cur_fids.push(fids.next().unwrap());
    }
    chunks.push(GrantChunk { kind: ChunkKind::End, exits: cur_exits, fids: cur_fids });

    if chunks.len() == 1 {
        chunks[0].kind = ChunkKind::Single;
    } else {
        chunks[0].kind = ChunkKind::Start;
        let last = chunks.len() - 1;
        chunks[last].kind = ChunkKind::End;
        for c in &mut chunks[1..last] {
            c.kind = ChunkKind::Continue;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lr(path: &str) -> LeaseRecord {
        LeaseRecord {
            pathname: path.into(),
            readonly: false,
            oid: 1,
            address: Address { ip: 1, port: 9922 },
        }
    }

    fn fr(fid: u32) -> FidRecord {
        FidRecord {
            fid,
            pathname: "/a".into(),
            user: "u".into(),
            status: 1,
            omode: 0,
            readdir_cookie: 0,
            address: Address { ip: 1, port: 9922 },
        }
    }

    #[test]
    fn lease_record_round_trip() {
        let rec = lr("/snapshots/17");
        let mut buf = Vec::new();
        rec.encode(&mut buf).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(LeaseRecord::decode(&mut cur).unwrap(), rec);
    }

    #[test]
    fn fid_record_round_trip() {
        let rec = fr(7);
        let mut buf = Vec::new();
        rec.encode(&mut buf).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(FidRecord::decode(&mut cur).unwrap(), rec);
    }

    #[test]
    fn empty_payload_yields_single_end_chunk() {
        let chunks = chunk_grant_payload(12, 256, vec![], vec![]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Single);
    }

    #[test]
    fn oversized_payload_splits_into_start_continue_end() {
        let exits: Vec<_> = (0..20).map(|i| lr(&format!("/a/exit{i}"))).collect();
        let chunks = chunk_grant_payload(12, 64, exits.clone(), vec![]);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.first().unwrap().kind, ChunkKind::Start);
        assert_eq!(chunks.last().unwrap().kind, ChunkKind::End);
        let total: usize = chunks.iter().map(|c| c.exits.len()).sum();
        assert_eq!(total, exits.len());
    }
}
