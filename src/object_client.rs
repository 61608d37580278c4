//! Object client (C2): thin RPC veneer over a storage server.
//!
//! Routes every operation by OID to one storage server. No caching or
//! replication lives here — that is the storage server's concern.
//! Defined as an `async_trait` so a real RPC implementation and an
//! in-memory test double are interchangeable.

use async_trait::async_trait;

use crate::error::Result;
use crate::wire::StatRecord;

pub type Oid = u64;

/// Extension payload for symlink targets / device specs passed to
/// `create` (spec §4.2, §6 `MAX_EXTENSION_LEN`).
#[derive(Debug, Clone, Default)]
pub struct CreateExt(pub String);

#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Reserves a fresh OID from the storage server's allocator.
    async fn reserve_oid(&self) -> Result<Oid>;

    async fn create(
        &self,
        oid: Oid,
        mode: u32,
        ctime: u32,
        uid: u32,
        gid: u32,
        ext: CreateExt,
    ) -> Result<()>;

    /// Clones the object at `old` into a fresh object at `new`,
    /// duplicating its content (used by thaw, spec §4.4).
    async fn clone_oid(&self, old: Oid, new: Oid) -> Result<()>;

    async fn read(&self, oid: Oid, atime: u32, offset: u64, count: u32) -> Result<Vec<u8>>;

    /// Returns the number of bytes actually written.
    async fn write(&self, oid: Oid, mtime: u32, offset: u64, data: &[u8]) -> Result<u32>;

    async fn stat(&self, oid: Oid, name: &str) -> Result<StatRecord>;

    async fn wstat(&self, oid: Oid, delta: StatDelta) -> Result<()>;

    async fn delete(&self, oid: Oid) -> Result<()>;

    /// Hints the storage server to warm its cache for `oid`; best
    /// effort, never returns a hard failure to the caller.
    async fn prime_cache(&self, oid: Oid) -> Result<()>;
}

/// Partial update applied by `wstat`; unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct StatDelta {
    pub mode: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub length: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub name: Option<String>,
}

#[cfg(test)]
pub mod mock {
    //! In-memory `ObjectClient` used by unit/integration tests. The
    //! real RPC-over-the-wire implementation is an external
    //! collaborator (spec §1); tests exercise the control plane
    //! against this double instead.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Object {
        data: Vec<u8>,
        stat: StatRecordPieces,
    }

    #[derive(Clone, Default)]
    struct StatRecordPieces {
        mode: u32,
        atime: u32,
        mtime: u32,
        uid: u32,
        gid: u32,
    }

    pub struct MockObjectClient {
        next_oid: AtomicU64,
        objects: Mutex<HashMap<Oid, Object>>,
    }

    impl MockObjectClient {
        pub fn new() -> Self {
            MockObjectClient { next_oid: AtomicU64::new(1), objects: Mutex::new(HashMap::new()) }
        }

        pub fn seed(&self, oid: Oid, data: Vec<u8>) {
            self.objects.lock().unwrap().insert(oid, Object { data, stat: Default::default() });
        }

        pub fn data_of(&self, oid: Oid) -> Vec<u8> {
            self.objects.lock().unwrap().get(&oid).map(|o| o.data.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ObjectClient for MockObjectClient {
        async fn reserve_oid(&self) -> Result<Oid> {
            Ok(self.next_oid.fetch_add(1, Ordering::SeqCst))
        }

        async fn create(
            &self,
            oid: Oid,
            mode: u32,
            ctime: u32,
            uid: u32,
            gid: u32,
            _ext: CreateExt,
        ) -> Result<()> {
            self.objects.lock().unwrap().insert(
                oid,
                Object {
                    data: Vec::new(),
                    stat: StatRecordPieces { mode, atime: ctime, mtime: ctime, uid, gid },
                },
            );
            Ok(())
        }

        async fn clone_oid(&self, old: Oid, new: Oid) -> Result<()> {
            let obj = self.objects.lock().unwrap().get(&old).cloned();
            if let Some(obj) = obj {
                self.objects.lock().unwrap().insert(new, obj);
            }
            Ok(())
        }

        async fn read(&self, oid: Oid, _atime: u32, offset: u64, count: u32) -> Result<Vec<u8>> {
            let objects = self.objects.lock().unwrap();
            let obj = objects.get(&oid).cloned().unwrap_or_default();
            let start = (offset as usize).min(obj.data.len());
            let end = (start + count as usize).min(obj.data.len());
            Ok(obj.data[start..end].to_vec())
        }

        async fn write(&self, oid: Oid, _mtime: u32, offset: u64, data: &[u8]) -> Result<u32> {
            let mut objects = self.objects.lock().unwrap();
            let obj = objects.entry(oid).or_default();
            let end = offset as usize + data.len();
            if obj.data.len() < end {
                obj.data.resize(end, 0);
            }
            obj.data[offset as usize..end].copy_from_slice(data);
            Ok(data.len() as u32)
        }

        async fn stat(&self, oid: Oid, name: &str) -> Result<StatRecord> {
            let objects = self.objects.lock().unwrap();
            let obj = objects.get(&oid).cloned().unwrap_or_default();
            Ok(StatRecord {
                qid: crate::wire::Qid::new(0, 0, oid),
                mode: obj.stat.mode,
                atime: obj.stat.atime,
                mtime: obj.stat.mtime,
                length: obj.data.len() as u64,
                uid: obj.stat.uid,
                gid: obj.stat.gid,
                muid: obj.stat.uid,
                owner: String::new(),
                group: String::new(),
                muid_name: String::new(),
                name: name.to_string(),
                extension: String::new(),
            })
        }

        async fn wstat(&self, oid: Oid, delta: StatDelta) -> Result<()> {
            let mut objects = self.objects.lock().unwrap();
            let obj = objects.entry(oid).or_default();
            if let Some(mode) = delta.mode {
                obj.stat.mode = mode;
            }
            if let Some(atime) = delta.atime {
                obj.stat.atime = atime;
            }
            if let Some(mtime) = delta.mtime {
                obj.stat.mtime = mtime;
            }
            if let Some(length) = delta.length {
                obj.data.resize(length as usize, 0);
            }
            Ok(())
        }

        async fn delete(&self, oid: Oid) -> Result<()> {
            self.objects.lock().unwrap().remove(&oid);
            Ok(())
        }

        async fn prime_cache(&self, _oid: Oid) -> Result<()> {
            Ok(())
        }
    }
}
