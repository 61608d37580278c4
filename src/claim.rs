//! Claim tree (C4, spec §4.4, §8 invariants, §9 Open Question 2).
//!
//! Claims are owned by the `Local` lease they belong to, arena-style:
//! a claim refers to its parent/children by `ClaimId` index rather
//! than by pointer, which sidesteps the claim↔lease↔fid reference
//! cycles the original design has (spec §9).

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::ids::{ClaimId, FidKey};
use crate::object_client::{ObjectClient, Oid};
use crate::wire::StatRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Writable,
    ReadOnly,
    CoW,
}

/// Child-access inheritance rule (spec §4.7): a `CoW`-linked child of
/// a writable parent is itself `CoW`; otherwise it inherits the
/// parent's access mode.
pub fn access_child(parent: Access, cow_link: bool) -> Access {
    if parent == Access::Writable && cow_link {
        Access::CoW
    } else {
        parent
    }
}

#[derive(Debug, Clone)]
pub struct Claim {
    pub pathname: String,
    pub oid: Oid,
    pub access: Access,
    pub parent: Option<ClaimId>,
    pub children: Vec<ClaimId>,
    pub fids: HashSet<FidKey>,
    /// Positive = live users. `0` = no live users. `-1` = delete
    /// sentinel blocking further `request`s (spec §3).
    pub refcount: i64,
    pub exclusive: bool,
    pub deleted: bool,
    pub info: Option<StatRecord>,
}

impl Claim {
    fn new(pathname: String, access: Access, oid: Oid, parent: Option<ClaimId>) -> Self {
        Claim {
            pathname,
            oid,
            access,
            parent,
            children: Vec::new(),
            fids: HashSet::new(),
            refcount: 1,
            exclusive: false,
            deleted: false,
            info: None,
        }
    }

    pub fn is_cache_eligible(&self, is_wavefront_exit_parent: bool) -> bool {
        self.refcount == 0
            && self.children.is_empty()
            && self.fids.is_empty()
            && !is_wavefront_exit_parent
            && self.parent.is_some()
    }
}

/// Claims owned by one `Local` lease, arena-style with a free list so
/// released slots are reused, a slab-reuse pattern.
#[derive(Debug, Default)]
pub struct ClaimArena {
    slots: Vec<Option<Claim>>,
    free: Vec<u32>,
}

impl ClaimArena {
    pub fn new() -> Self {
        ClaimArena::default()
    }

    fn insert(&mut self, claim: Claim) -> ClaimId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(claim);
            ClaimId(idx)
        } else {
            self.slots.push(Some(claim));
            ClaimId((self.slots.len() - 1) as u32)
        }
    }

    pub fn get(&self, id: ClaimId) -> &Claim {
        self.slots[id.0 as usize].as_ref().expect("dangling ClaimId")
    }

    pub fn get_mut(&mut self, id: ClaimId) -> &mut Claim {
        self.slots[id.0 as usize].as_mut().expect("dangling ClaimId")
    }

    fn remove(&mut self, id: ClaimId) -> Claim {
        let claim = self.slots[id.0 as usize].take().expect("dangling ClaimId");
        self.free.push(id.0);
        claim
    }

    /// Constructs the lease root claim (spec §4.4 `new_root`).
    pub fn new_root(&mut self, pathname: String, access: Access, oid: Oid) -> ClaimId {
        self.insert(Claim::new(pathname, access, oid, None))
    }

    /// Constructs a child claim under `parent` (spec §4.4 `new`).
    pub fn new_child(&mut self, parent: ClaimId, name: &str, access: Access, oid: Oid) -> ClaimId {
        let parent_path = self.get(parent).pathname.clone();
        let pathname = join_path(&parent_path, name);
        let id = self.insert(Claim::new(pathname, access, oid, Some(parent)));
        self.get_mut(parent).children.push(id);
        id
    }

    /// Rejects if `refcount < 0` (delete sentinel); otherwise
    /// increments and returns (spec §4.4 `request`).
    pub fn request(&mut self, id: ClaimId) -> Result<ClaimId> {
        let claim = self.get_mut(id);
        if claim.refcount < 0 {
            return Err(Error::client(crate::error::EBADF, "claim is being deleted"));
        }
        claim.refcount += 1;
        Ok(id)
    }

    /// Decrements the refcount, then walks up from `id` while each
    /// ancestor is cache-eligible (Open Question 2 resolution: no
    /// fids, no children, not a wavefront-exit parent, has a parent),
    /// detaching and handing each one to `on_cache` before continuing
    /// upward. Returns the still-live claims that were detached, in
    /// detach order, so the caller (the owning `Lease`) can move them
    /// into its `claim_cache` + the global LRU.
    pub fn release<F>(&mut self, id: ClaimId, is_wavefront_exit_parent: F) -> Vec<Claim>
    where
        F: Fn(&str) -> bool,
    {
        self.get_mut(id).refcount -= 1;

        let mut detached = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let claim = self.get(cur);
            let eligible = claim.is_cache_eligible(is_wavefront_exit_parent(&claim.pathname));
            if !eligible {
                break;
            }
            let parent_id = claim.parent.expect("eligible implies has parent");
            let removed = self.remove(cur);
            self.get_mut(parent_id).children.retain(|c| *c != cur);
            current = Some(parent_id);
            detached.push(removed);
        }
        detached
    }

    /// Rebuilds the absolute path from the lease root down to `child`
    /// (spec §4.4 `get_parent`, "for a reached lease root, rebuild the
    /// path from the lease root claim").
    pub fn get_parent(&self, child: ClaimId) -> Option<ClaimId> {
        self.get(child).parent
    }

    /// Looks up a named child in the live tree only (callers fall back
    /// to the lease claim cache, then the directory engine, per spec
    /// §4.4 `get_child`).
    pub fn get_child_in_tree(&self, parent: ClaimId, name: &str) -> Option<ClaimId> {
        let target = join_path(&self.get(parent).pathname, name);
        self.get(parent).children.iter().copied().find(|c| self.get(*c).pathname == target)
    }

    /// Sets every descendant's access `Writable -> CoW` (`ReadOnly` is
    /// idempotent); used by freeze/snapshot (spec §4.4).
    pub fn freeze_subtree(&mut self, root: ClaimId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let claim = self.get_mut(id);
            if claim.access == Access::Writable {
                claim.access = Access::CoW;
            }
            stack.extend(self.get(id).children.iter().copied());
        }
    }

    /// Collects the chain of claims from the lease root down to
    /// `target` (inclusive), used to drive thaw.
    pub fn path_to_root(&self, mut target: ClaimId) -> Vec<ClaimId> {
        let mut chain = vec![target];
        while let Some(parent) = self.get(target).parent {
            chain.push(parent);
            target = parent;
        }
        chain.reverse();
        chain
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Thaws a `CoW` claim by cloning every `CoW` ancestor from the lease
/// root down to (and including) `target`: reserve a fresh OID, clone
/// the object, rewrite the parent directory entry, and mark the claim
/// `Writable` (spec §4.4). Directory objects get their CoW bit
/// propagated across the clone via [`crate::dir::clone_block`].
pub async fn thaw<C: ObjectClient>(
    arena: &mut ClaimArena,
    client: &C,
    dir_cache: &crate::dir::BlockCache,
    lease_id: u64,
    target: ClaimId,
    is_dir: impl Fn(ClaimId) -> bool,
) -> Result<()> {
    let chain = arena.path_to_root(target);
    for id in chain {
        if arena.get(id).access != Access::CoW {
            continue;
        }
        let old_oid = arena.get(id).oid;
        let new_oid = client.reserve_oid().await?;
        client.clone_oid(old_oid, new_oid).await?;
        if is_dir(id) {
            if let Some(block) = dir_cache.get((lease_id, old_oid, 0)) {
                let cloned = crate::dir::clone_block(block.as_ref())?;
                dir_cache.put((lease_id, new_oid, 0), cloned);
            }
        }
        if let Some(parent) = arena.get(id).parent {
            let name = arena.get(id).pathname.rsplit('/').next().unwrap_or("").to_string();
            let parent_oid = arena.get(parent).oid;
            let dir = crate::dir::Directory { client, cache: dir_cache, lease_id, oid: parent_oid };
            dir.change_oid(&name, new_oid, false).await?;
        }
        let claim = arena.get_mut(id);
        claim.oid = new_oid;
        claim.access = Access::Writable;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_exit(_: &str) -> bool {
        false
    }

    #[test]
    fn release_detaches_eligible_chain_up_to_non_eligible_ancestor() {
        let mut arena = ClaimArena::new();
        let root = arena.new_root("/a".into(), Access::Writable, 1);
        let child = arena.new_child(root, "b", Access::Writable, 2);
        let grandchild = arena.new_child(child, "c", Access::Writable, 3);

        // grandchild has refcount 1 from construction; release it.
        let detached = arena.release(grandchild, never_exit);
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].pathname, "/a/b/c");
        // child now has no children and refcount 1 (still referenced by its own "open").
        assert!(arena.get(child).children.is_empty());

        let detached2 = arena.release(child, never_exit);
        assert_eq!(detached2.len(), 1);
        assert_eq!(detached2[0].pathname, "/a/b");
        // root is never detached: it has no parent.
        assert!(arena.get(root).children.is_empty());
    }

    #[test]
    fn release_stops_at_wavefront_exit_parent() {
        let mut arena = ClaimArena::new();
        let root = arena.new_root("/a".into(), Access::Writable, 1);
        let child = arena.new_child(root, "b", Access::Writable, 2);

        let detached = arena.release(child, |p| p == "/a");
        assert!(detached.is_empty(), "root is a wavefront-exit parent, must not be pruned");
    }

    #[test]
    fn request_rejects_delete_sentinel() {
        let mut arena = ClaimArena::new();
        let root = arena.new_root("/a".into(), Access::Writable, 1);
        arena.get_mut(root).refcount = -1;
        assert!(arena.request(root).is_err());
    }

    #[test]
    fn freeze_marks_writable_cow_and_leaves_readonly_alone() {
        let mut arena = ClaimArena::new();
        let root = arena.new_root("/a".into(), Access::Writable, 1);
        let child = arena.new_child(root, "b", Access::ReadOnly, 2);
        arena.freeze_subtree(root);
        assert_eq!(arena.get(root).access, Access::CoW);
        assert_eq!(arena.get(child).access, Access::ReadOnly);
    }

    #[test]
    fn access_child_inherits_cow_only_through_cow_link() {
        assert_eq!(access_child(Access::Writable, true), Access::CoW);
        assert_eq!(access_child(Access::Writable, false), Access::Writable);
        assert_eq!(access_child(Access::ReadOnly, true), Access::ReadOnly);
    }

    #[tokio::test]
    async fn thaw_clones_cow_claim_and_rewrites_parent_entry() {
        use crate::object_client::mock::MockObjectClient;

        let client = MockObjectClient::new();
        client.seed(1, vec![0u8; crate::dir::BLOCK_SIZE]); // parent dir object
        client.seed(10, b"old-bytes".to_vec());

        let dir_cache = crate::dir::BlockCache::new(16);
        let dir = crate::dir::Directory { client: &client, cache: &dir_cache, lease_id: 1, oid: 1 };
        dir.create_entry("f", 10, true).await.unwrap();

        let mut arena = ClaimArena::new();
        let root = arena.new_root("/s".into(), Access::Writable, 1);
        let leaf = arena.new_child(root, "f", Access::CoW, 10);

        thaw(&mut arena, &client, &dir_cache, 1, leaf, |_| false).await.unwrap();

        assert_eq!(arena.get(leaf).access, Access::Writable);
        assert_ne!(arena.get(leaf).oid, 10);
        let entry = dir.find_entry("f").await.unwrap().unwrap();
        assert_eq!(entry.oid, arena.get(leaf).oid);
        assert!(!entry.cow);
    }
}
