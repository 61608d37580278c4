//! Lease table (C5, spec §4.5).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::claim::{Access, ClaimArena};
use crate::dir::BlockCache;
use crate::error::{Error, Result, EACCES};
use crate::ids::{ClaimId, FidKey, LeaseId};
use crate::object_client::ObjectClient;
use crate::peer::Peer;
use crate::wire::primitive::TEGRANT_OVERHEAD;
use crate::wire::records::{chunk_grant_payload, FidRecord, LeaseRecord};
use crate::wire::Address;
use crate::worker::lock::LeaseLock;

pub enum LeaseKind {
    Local(LocalLease),
    RemoteExit,
}

pub struct LocalLease {
    pub claims: ClaimArena,
    pub root: ClaimId,
    /// Immediate non-local subtrees (spec §3 `wavefront`).
    pub wavefront: Vec<String>,
    /// Recently released claims, also linked into the global LRU
    /// (spec §3, §4.4).
    pub claim_cache: HashMap<String, ClaimId>,
}

pub struct Lease {
    pub id: LeaseId,
    pub pathname: String,
    pub kind: LeaseKind,
    /// For `Local`: the parent envoy that granted this lease. For
    /// `RemoteExit`: the owning envoy.
    pub addr: Address,
    pub fids: HashSet<FidKey>,
    pub readonly: bool,
    pub lock: Arc<LeaseLock>,
    pub change_exits: Vec<LeaseRecord>,
    pub change_fids: Vec<FidRecord>,
}

impl Lease {
    pub fn local(&self) -> Option<&LocalLease> {
        match &self.kind {
            LeaseKind::Local(l) => Some(l),
            LeaseKind::RemoteExit => None,
        }
    }

    pub fn local_mut(&mut self) -> Option<&mut LocalLease> {
        match &mut self.kind {
            LeaseKind::Local(l) => Some(l),
            LeaseKind::RemoteExit => None,
        }
    }

    pub fn is_exit_point_parent(&self, path: &str) -> bool {
        match &self.kind {
            LeaseKind::Local(l) => l.wavefront.iter().any(|exit| parent_of(exit) == path),
            LeaseKind::RemoteExit => false,
        }
    }
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((p, _)) => p.to_string(),
        None => "/".to_string(),
    }
}

/// Directory of leases keyed by pathname (spec §4.5). Per spec §5 the
/// lease directory itself is only touched under the biglock, so a
/// plain map suffices; individual leases carry their own
/// shared/exclusive lock for cross-worker coordination.
#[derive(Default)]
pub struct LeaseTable {
    by_pathname: HashMap<String, LeaseId>,
    leases: HashMap<LeaseId, Lease>,
    next_id: AtomicU64,
}

impl LeaseTable {
    pub fn new() -> Self {
        LeaseTable { next_id: AtomicU64::new(1), ..Default::default() }
    }

    fn alloc_id(&self) -> LeaseId {
        LeaseId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn insert_local(&mut self, pathname: String, addr: Address, root_oid: u64) -> LeaseId {
        let id = self.alloc_id();
        let mut claims = ClaimArena::new();
        let root = claims.new_root(pathname.clone(), Access::Writable, root_oid);
        let local = LocalLease { claims, root, wavefront: Vec::new(), claim_cache: HashMap::new() };
        let lease = Lease {
            id,
            pathname: pathname.clone(),
            kind: LeaseKind::Local(local),
            addr,
            fids: HashSet::new(),
            readonly: false,
            lock: LeaseLock::new(),
            change_exits: Vec::new(),
            change_fids: Vec::new(),
        };
        self.by_pathname.insert(pathname, id);
        self.leases.insert(id, lease);
        id
    }

    pub fn insert_remote_exit(&mut self, pathname: String, owner: Address) -> LeaseId {
        let id = self.alloc_id();
        let lease = Lease {
            id,
            pathname: pathname.clone(),
            kind: LeaseKind::RemoteExit,
            addr: owner,
            fids: HashSet::new(),
            readonly: false,
            lock: LeaseLock::new(),
            change_exits: Vec::new(),
            change_fids: Vec::new(),
        };
        self.by_pathname.insert(pathname, id);
        self.leases.insert(id, lease);
        id
    }

    pub fn get(&self, id: LeaseId) -> &Lease {
        self.leases.get(&id).expect("dangling LeaseId")
    }

    pub fn get_mut(&mut self, id: LeaseId) -> &mut Lease {
        self.leases.get_mut(&id).expect("dangling LeaseId")
    }

    pub fn remove(&mut self, id: LeaseId) -> Option<Lease> {
        let lease = self.leases.remove(&id)?;
        self.by_pathname.remove(&lease.pathname);
        Some(lease)
    }

    /// Walks `path` upward until a lease is found. Returns `None` if
    /// the closest ancestor lease is a `RemoteExit` ("not local",
    /// spec §4.5 `find_root`).
    pub fn find_root(&self, path: &str) -> Option<LeaseId> {
        let id = self.find_nearest(path)?;
        match self.get(id).kind {
            LeaseKind::Local(_) => Some(id),
            LeaseKind::RemoteExit => None,
        }
    }

    /// Walks `path` upward to the nearest known lease, regardless of kind.
    pub fn find_nearest(&self, path: &str) -> Option<LeaseId> {
        let mut cur = path.to_string();
        loop {
            if let Some(id) = self.by_pathname.get(&cur) {
                return Some(*id);
            }
            if cur == "/" {
                return None;
            }
            cur = parent_of(&cur);
        }
    }

    /// Returns the `RemoteExit` lease rooted exactly at `path`, if any.
    pub fn get_remote(&self, path: &str) -> Option<LeaseId> {
        let id = *self.by_pathname.get(path)?;
        matches!(self.get(id).kind, LeaseKind::RemoteExit).then_some(id)
    }

    /// Grant (split, spec §4.5): hands subtree `claim` rooted at
    /// `subtree_path` under `local_id` off to `target`. The caller
    /// must already hold `local_id`'s exclusive lock and have flushed
    /// the walk cache. Returns the record sequence to send over the
    /// wire (root plus size-bounded exit/fid chunks).
    pub async fn grant<C: ObjectClient>(
        &mut self,
        local_id: LeaseId,
        subtree_path: &str,
        target: Address,
        client: &C,
        dir_cache: &BlockCache,
        self_addr: Address,
        msize: usize,
    ) -> Result<(LeaseRecord, Vec<crate::wire::records::GrantChunk>)> {
        let lease = self.get_mut(local_id);
        let readonly = lease.readonly;
        let owner_addr = lease.addr;
        let fid_count = lease.fids.len();
        let local = lease.local_mut().ok_or_else(|| Error::client(EACCES, "grant target is not a local lease"))?;

        let subtree = local
            .claims
            .get_child_in_tree(local.root, subtree_path.rsplit('/').next().unwrap_or(""))
            .filter(|id| local.claims.get(*id).pathname == subtree_path)
            .or_else(|| (local.claims.get(local.root).pathname == subtree_path).then_some(local.root))
            .ok_or_else(|| Error::client(crate::error::ENOENT, "grant: subtree not found"))?;

        if local.claims.get(subtree).access == Access::CoW {
            crate::claim::thaw(&mut local.claims, client, dir_cache, local_id.0, subtree, |_| false).await?;
        }

        let root_oid = local.claims.get(subtree).oid;
        let descendant_exits: Vec<LeaseRecord> = local
            .wavefront
            .iter()
            .filter(|p| p.starts_with(subtree_path))
            .map(|p| LeaseRecord { pathname: p.clone(), readonly, oid: 0, address: owner_addr })
            .collect();

        let fids_under: Vec<FidRecord> = (0..fid_count)
            .map(|_| FidRecord {
                fid: 0,
                pathname: subtree_path.to_string(),
                user: String::new(),
                status: 0,
                omode: 0,
                readdir_cookie: 0,
                address: self_addr,
            })
            .collect();

        local.wavefront.retain(|p| !p.starts_with(subtree_path));
        if let Some(parent) = local.claims.get(subtree).parent {
            local.claims.get_mut(parent).children.retain(|c| *c != subtree);
        }
        local.claim_cache.retain(|p, _| !p.starts_with(subtree_path));

        let root_record = LeaseRecord { pathname: subtree_path.to_string(), readonly, oid: root_oid, address: self_addr };
        self.by_pathname.remove(subtree_path);
        if subtree_path == self.get(local_id).pathname {
            self.leases.remove(&local_id);
        }
        self.insert_remote_exit(subtree_path.to_string(), target);
        if let Some(parent_id) = self.find_root(&parent_of(subtree_path)) {
            if let Some(l) = self.get_mut(parent_id).local_mut() {
                l.wavefront.push(subtree_path.to_string());
            }
        }

        let chunks = chunk_grant_payload(TEGRANT_OVERHEAD, msize, descendant_exits, fids_under);
        Ok((root_record, chunks))
    }

    /// Accept (merge on grant arrival, spec §4.5): creates a local
    /// lease at the granted root and installs the received exits,
    /// merging back any that point at `self_addr`.
    pub fn accept_grant(
        &mut self,
        root: LeaseRecord,
        exits: Vec<LeaseRecord>,
        self_addr: Address,
    ) -> LeaseId {
        let id = self.insert_local(root.pathname.clone(), root.address, root.oid);
        for exit in exits {
            if exit.address == self_addr {
                // This exit actually points back at us: fold it in as
                // a local sub-lease instead of a remote exit.
                self.insert_local(exit.pathname, self_addr, exit.oid);
            } else {
                self.insert_remote_exit(exit.pathname.clone(), exit.address);
                if let Some(l) = self.get_mut(id).local_mut() {
                    l.wavefront.push(exit.pathname);
                }
            }
        }
        id
    }

    /// Merges a remote exit back into local ownership: drops the exit
    /// marker and removes it from the parent's wavefront. Rebuilding
    /// the claim subtree itself happens the same way any other local
    /// resolve does, lazily, the next time a walk reaches that path.
    pub fn merge(&mut self, parent_id: LeaseId, child_exit_path: &str) -> Result<()> {
        let child_id = self
            .get_remote(child_exit_path)
            .ok_or_else(|| Error::client(crate::error::ENOENT, "merge: no such remote exit"))?;
        self.remove(child_id);
        let parent = self.get_mut(parent_id);
        if let Some(local) = parent.local_mut() {
            local.wavefront.retain(|p| p != child_exit_path);
        }
        Ok(())
    }

    /// Freezes the claim subtree rooted at `lease_id`, then
    /// recursively snapshots every descendant wavefront lease via
    /// `peer`, thawing and rewriting each exit's parent directory
    /// entry with the returned OID. Returns the new OID of the
    /// (now-frozen) root (spec §4.5 `snapshot`).
    pub async fn snapshot<C: ObjectClient, P: Peer>(
        &mut self,
        lease_id: LeaseId,
        client: &C,
        dir_cache: &BlockCache,
        peer: &P,
    ) -> Result<u64> {
        let lease = self.get_mut(lease_id);
        let owner_addr = lease.addr;
        let local = lease.local_mut().ok_or_else(|| Error::client(EACCES, "snapshot target is not local"))?;
        local.claims.freeze_subtree(local.root);
        let root_oid = local.claims.get(local.root).oid;

        let exits: Vec<LeaseRecord> = local
            .wavefront
            .iter()
            .map(|p| LeaseRecord { pathname: p.clone(), readonly: false, oid: 0, address: owner_addr })
            .collect();
        if exits.is_empty() {
            return Ok(root_oid);
        }

        let results = peer.remote_snapshot(&exits).await?;
        let lease = self.get_mut(lease_id);
        let local = lease.local_mut().expect("still local");
        for (exit_path, new_oid) in results {
            let parent_path = parent_of(&exit_path);
            if let Some(parent_claim) = find_claim_by_path(local, &parent_path) {
                crate::claim::thaw(&mut local.claims, client, dir_cache, lease_id.0, parent_claim, |_| false).await?;
                let parent_oid = local.claims.get(parent_claim).oid;
                let name = exit_path.rsplit('/').next().unwrap_or("").to_string();
                let dir = crate::dir::Directory { client, cache: dir_cache, lease_id: lease_id.0, oid: parent_oid };
                dir.change_oid(&name, new_oid, false).await?;
            }
        }
        Ok(root_oid)
    }
}

fn find_claim_by_path(local: &LocalLease, path: &str) -> Option<ClaimId> {
    if local.claims.get(local.root).pathname == path {
        return Some(local.root);
    }
    local.claim_cache.get(path).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_client::mock::MockObjectClient;
    use crate::peer::mock::MockPeer;

    fn addr(n: u32) -> Address {
        Address { ip: n, port: 9922 }
    }

    #[test]
    fn find_root_walks_up_to_nearest_lease() {
        let mut table = LeaseTable::new();
        table.insert_local("/".into(), addr(1), 1);
        assert_eq!(table.find_root("/a/b/c"), table.find_root("/"));
    }

    #[test]
    fn find_root_returns_none_through_a_remote_exit() {
        let mut table = LeaseTable::new();
        table.insert_local("/".into(), addr(1), 1);
        table.insert_remote_exit("/a".into(), addr(2));
        assert!(table.find_root("/a/b").is_none());
        assert!(table.get_remote("/a").is_some());
    }

    #[test]
    fn is_exit_point_parent_detects_immediate_children_only() {
        let mut table = LeaseTable::new();
        let root = table.insert_local("/".into(), addr(1), 1);
        table.get_mut(root).local_mut().unwrap().wavefront.push("/a/b".into());
        assert!(table.get(root).is_exit_point_parent("/a"));
        assert!(!table.get(root).is_exit_point_parent("/a/b"));
    }

    #[tokio::test]
    async fn grant_replaces_local_subtree_with_remote_exit() {
        let client = MockObjectClient::new();
        let dir_cache = BlockCache::new(16);
        let mut table = LeaseTable::new();
        let local = table.insert_local("/a".into(), addr(1), 100);

        let (root_rec, chunks) = table
            .grant(local, "/a", addr(2), &client, &dir_cache, addr(1), 1024)
            .await
            .unwrap();
        assert_eq!(root_rec.pathname, "/a");
        assert_eq!(chunks.last().unwrap().kind, crate::wire::records::ChunkKind::Single);
        assert!(table.get_remote("/a").is_some());
        assert!(table.find_root("/a").is_none());
    }

    #[tokio::test]
    async fn snapshot_with_no_wavefront_just_freezes() {
        let client = MockObjectClient::new();
        let dir_cache = BlockCache::new(16);
        let peer = MockPeer::default();
        let mut table = LeaseTable::new();
        let local = table.insert_local("/s".into(), addr(1), 100);

        let oid = table.snapshot(local, &client, &dir_cache, &peer).await.unwrap();
        assert_eq!(oid, 100);
        assert_eq!(
            table.get(local).local().unwrap().claims.get(table.get(local).local().unwrap().root).access,
            Access::CoW
        );
    }
}
