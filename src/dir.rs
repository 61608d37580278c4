//! Directory engine (C3, spec §4.3, §9).
//!
//! Directories are sequences of `BLOCK_SIZE` blocks. Each block begins
//! with a 16-bit end-of-data offset, followed by entries
//! `{oid: u64, cow: bit7 of a one-byte name length, name: utf-8}`.
//! Storing the CoW bit in the high bit of the name-length byte is a
//! wire-level compatibility constraint (spec §9); the codec preserves
//! it across encode/decode.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use moka::sync::Cache;

use crate::error::{Error, Result, EEXIST, EINVAL, ENOENT};
use crate::object_client::{ObjectClient, Oid};
use crate::wire::primitive::{read_u16, read_u64, read_u8, write_u16, write_u64, write_u8};

pub const BLOCK_SIZE: usize = 4096;
/// High bit of the one-byte name length encodes the CoW flag.
const COW_BIT: u8 = 0x80;
const NAME_LEN_MASK: u8 = 0x7F;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub oid: Oid,
    pub cow: bool,
    pub name: String,
}

impl DirEntry {
    fn encoded_len(&self) -> usize {
        8 + 1 + self.name.len()
    }
}

/// Encodes `entries` into one `BLOCK_SIZE` block. Errors if they don't
/// fit or a name exceeds the 7-bit length field.
pub fn encode_block(entries: &[DirEntry]) -> Result<[u8; BLOCK_SIZE]> {
    let mut block = [0u8; BLOCK_SIZE];
    let mut cur = Cursor::new(&mut block[2..]);
    for e in entries {
        if e.name.len() > NAME_LEN_MASK as usize {
            return Err(Error::client(EINVAL, "directory entry name too long"));
        }
        write_u64(&mut cur, e.oid).map_err(io_err)?;
        let len_byte = (e.name.len() as u8) | if e.cow { COW_BIT } else { 0 };
        write_u8(&mut cur, len_byte).map_err(io_err)?;
        cur.write_all(e.name.as_bytes()).map_err(io_err)?;
    }
    let end_offset = cur.position() as usize + 2;
    if end_offset > BLOCK_SIZE {
        return Err(Error::client(EINVAL, "directory block overflow"));
    }
    write_u16(&mut Cursor::new(&mut block[0..2]), end_offset as u16).map_err(io_err)?;
    Ok(block)
}

/// Decodes one block, rejecting a block whose end offset exceeds the
/// block size or disagrees with where iteration actually lands.
pub fn decode_block(block: &[u8]) -> Result<Vec<DirEntry>> {
    if block.len() < BLOCK_SIZE {
        return Err(Error::client(EINVAL, "short directory block"));
    }
    let end_offset = read_u16(&mut Cursor::new(&block[0..2])).map_err(io_err)? as usize;
    if end_offset > BLOCK_SIZE {
        return Err(Error::client(EINVAL, "directory block end offset exceeds block size"));
    }
    let mut entries = Vec::new();
    let mut cur = Cursor::new(&block[2..end_offset]);
    while (cur.position() as usize) < cur.get_ref().len() {
        let oid = read_u64(&mut cur).map_err(io_err)?;
        let len_byte = read_u8(&mut cur).map_err(io_err)?;
        let cow = len_byte & COW_BIT != 0;
        let len = (len_byte & NAME_LEN_MASK) as usize;
        let mut name_buf = vec![0u8; len];
        cur.read_exact(&mut name_buf).map_err(io_err)?;
        let name = String::from_utf8(name_buf).map_err(|_| Error::client(EINVAL, "bad utf-8 name"))?;
        entries.push(DirEntry { oid, cow, name });
    }
    if cur.position() as usize + 2 != end_offset {
        return Err(Error::client(EINVAL, "directory iterator offset mismatch"));
    }
    Ok(entries)
}

fn io_err(_e: io::Error) -> Error {
    Error::client(EINVAL, "directory codec io error")
}

/// Sets the CoW bit on every entry of an already-encoded block; used
/// when cloning a directory object for snapshot (spec §4.3).
pub fn clone_block(block: &[u8]) -> Result<[u8; BLOCK_SIZE]> {
    let entries = decode_block(block)?;
    let flagged: Vec<DirEntry> = entries.into_iter().map(|mut e| { e.cow = true; e }).collect();
    encode_block(&flagged)
}

/// Cache key: `(lease id, oid, block number)`.
pub type BlockCacheKey = (u64, Oid, u32);

/// Directory-block cache shared across leases, per spec §4.3
/// ("maintains a directory-block cache keyed by (lease, oid, block#)").
#[derive(Clone)]
pub struct BlockCache {
    inner: Cache<BlockCacheKey, Arc<[u8; BLOCK_SIZE]>>,
}

impl BlockCache {
    pub fn new(max_capacity: u64) -> Self {
        BlockCache { inner: Cache::new(max_capacity) }
    }

    pub fn get(&self, key: BlockCacheKey) -> Option<Arc<[u8; BLOCK_SIZE]>> {
        self.inner.get(&key)
    }

    pub fn put(&self, key: BlockCacheKey, block: [u8; BLOCK_SIZE]) {
        self.inner.insert(key, Arc::new(block));
    }

    pub fn invalidate_oid(&self, lease_id: u64, oid: Oid) {
        self.inner.invalidate_entries_if(move |k, _| k.0 == lease_id && k.1 == oid).ok();
    }
}

/// A locked directory claim's block-structured content, addressed by
/// OID under a particular lease.
pub struct Directory<'a, C: ObjectClient> {
    pub client: &'a C,
    pub cache: &'a BlockCache,
    pub lease_id: u64,
    pub oid: Oid,
}

impl<'a, C: ObjectClient> Directory<'a, C> {
    async fn block_count(&self) -> Result<u32> {
        let stat = self.client.stat(self.oid, "").await?;
        Ok(((stat.length as usize + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32)
    }

    async fn read_block(&self, block_no: u32) -> Result<[u8; BLOCK_SIZE]> {
        if let Some(b) = self.cache.get((self.lease_id, self.oid, block_no)) {
            return Ok(*b);
        }
        let bytes = self
            .client
            .read(self.oid, 0, block_no as u64 * BLOCK_SIZE as u64, BLOCK_SIZE as u32)
            .await?;
        let mut block = [0u8; BLOCK_SIZE];
        block[..bytes.len()].copy_from_slice(&bytes);
        self.cache.put((self.lease_id, self.oid, block_no), block);
        Ok(block)
    }

    async fn write_block(&self, block_no: u32, block: [u8; BLOCK_SIZE]) -> Result<()> {
        self.cache.put((self.lease_id, self.oid, block_no), block);
        self.client
            .write(self.oid, 0, block_no as u64 * BLOCK_SIZE as u64, &block)
            .await?;
        Ok(())
    }

    /// Iterates every entry across every block via one internal
    /// callback, so mutation and read share the same block-walking
    /// logic (spec §4.3).
    async fn for_each_entry<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u32, &[DirEntry]) -> ControlFlow,
    {
        let blocks = self.block_count().await?;
        for block_no in 0..blocks {
            let raw = self.read_block(block_no).await?;
            let entries = decode_block(&raw)?;
            if let ControlFlow::Stop = f(block_no, &entries) {
                return Ok(());
            }
        }
        Ok(())
    }

    pub async fn read_entries(&self) -> Result<Vec<DirEntry>> {
        let mut all = Vec::new();
        self.for_each_entry(|_, entries| {
            all.extend(entries.iter().cloned());
            ControlFlow::Continue
        })
        .await?;
        Ok(all)
    }

    pub async fn find_entry(&self, name: &str) -> Result<Option<DirEntry>> {
        let mut found = None;
        self.for_each_entry(|_, entries| {
            if let Some(e) = entries.iter().find(|e| e.name == name) {
                found = Some(e.clone());
                return ControlFlow::Stop;
            }
            ControlFlow::Continue
        })
        .await?;
        Ok(found)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.read_entries().await?.is_empty())
    }

    /// Refuses duplicates; packs into the first block with room;
    /// extends the directory object if every existing block is full.
    pub async fn create_entry(&self, name: &str, oid: Oid, cow: bool) -> Result<()> {
        if self.find_entry(name).await?.is_some() {
            return Err(Error::client(EEXIST, "directory entry already exists"));
        }
        let new_entry = DirEntry { oid, cow, name: name.to_string() };
        let blocks = self.block_count().await?;
        for block_no in 0..blocks {
            let raw = self.read_block(block_no).await?;
            let mut entries = decode_block(&raw)?;
            entries.push(new_entry.clone());
            if let Ok(encoded) = encode_block(&entries) {
                self.write_block(block_no, encoded).await?;
                return Ok(());
            }
        }
        let encoded = encode_block(std::slice::from_ref(&new_entry))?;
        self.write_block(blocks, encoded).await
    }

    pub async fn remove_entry(&self, name: &str) -> Result<()> {
        let mut removed = false;
        let blocks = self.block_count().await?;
        for block_no in 0..blocks {
            let raw = self.read_block(block_no).await?;
            let mut entries = decode_block(&raw)?;
            let before = entries.len();
            entries.retain(|e| e.name != name);
            if entries.len() != before {
                let encoded = encode_block(&entries)?;
                self.write_block(block_no, encoded).await?;
                removed = true;
                break;
            }
        }
        if !removed {
            return Err(Error::client(ENOENT, "directory entry not found"));
        }
        Ok(())
    }

    /// Atomic rename: finds `old`, deletes any existing `new`, adds an
    /// entry for `new` copying `oid`/`cow` from `old` (spec §4.3).
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_entry = self.find_entry(old).await?.ok_or_else(|| Error::client(ENOENT, "rename: source missing"))?;
        if self.find_entry(new).await?.is_some() {
            self.remove_entry(new).await?;
        }
        self.remove_entry(old).await?;
        self.create_entry(new, old_entry.oid, old_entry.cow).await
    }

    /// Changes `name`'s target OID/cow flag, returning the old OID.
    pub async fn change_oid(&self, name: &str, new_oid: Oid, cow: bool) -> Result<Oid> {
        let blocks = self.block_count().await?;
        for block_no in 0..blocks {
            let raw = self.read_block(block_no).await?;
            let mut entries = decode_block(&raw)?;
            if let Some(e) = entries.iter_mut().find(|e| e.name == name) {
                let old_oid = e.oid;
                e.oid = new_oid;
                e.cow = cow;
                let encoded = encode_block(&entries)?;
                self.write_block(block_no, encoded).await?;
                return Ok(old_oid);
            }
        }
        Err(Error::client(ENOENT, "change_oid: entry not found"))
    }
}

enum ControlFlow {
    Continue,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_client::mock::MockObjectClient;

    fn entries(names: &[(&str, u64, bool)]) -> Vec<DirEntry> {
        names.iter().map(|(n, oid, cow)| DirEntry { oid: *oid, cow: *cow, name: n.to_string() }).collect()
    }

    #[test]
    fn block_codec_round_trip_preserves_cow_flags() {
        // Scenario S6.
        let entries = entries(&[("a", 1, false), ("aa", 2, true), ("bbbbb", 3, false)]);
        let block = encode_block(&entries).unwrap();
        let decoded = decode_block(&block).unwrap();
        assert_eq!(decoded, entries);
        assert!(!decoded[0].cow);
        assert!(decoded[1].cow);
        assert!(!decoded[2].cow);
    }

    #[test]
    fn rejects_block_with_bad_end_offset() {
        let mut block = [0u8; BLOCK_SIZE];
        write_u16(&mut Cursor::new(&mut block[0..2]), (BLOCK_SIZE + 1) as u16).unwrap();
        assert!(decode_block(&block).is_err());
    }

    #[test]
    fn clone_block_sets_cow_on_every_entry() {
        let entries = entries(&[("a", 1, false), ("b", 2, false)]);
        let block = encode_block(&entries).unwrap();
        let cloned = clone_block(&block).unwrap();
        let decoded = decode_block(&cloned).unwrap();
        assert!(decoded.iter().all(|e| e.cow));
    }

    #[tokio::test]
    async fn create_find_remove_round_trip() {
        let client = MockObjectClient::new();
        client.seed(100, vec![0u8; BLOCK_SIZE]);
        let cache = BlockCache::new(64);
        let dir = Directory { client: &client, cache: &cache, lease_id: 1, oid: 100 };

        dir.create_entry("file", 5, false).await.unwrap();
        assert!(dir.find_entry("file").await.unwrap().is_some());
        assert!(dir.create_entry("file", 6, false).await.is_err());

        dir.remove_entry("file").await.unwrap();
        assert!(dir.find_entry("file").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rename_moves_oid_and_cow_flag() {
        let client = MockObjectClient::new();
        client.seed(100, vec![0u8; BLOCK_SIZE]);
        let cache = BlockCache::new(64);
        let dir = Directory { client: &client, cache: &cache, lease_id: 1, oid: 100 };

        dir.create_entry("old", 9, true).await.unwrap();
        dir.rename("old", "new").await.unwrap();

        let e = dir.find_entry("new").await.unwrap().unwrap();
        assert_eq!(e.oid, 9);
        assert!(e.cow);
        assert!(dir.find_entry("old").await.unwrap().is_none());
    }
}
