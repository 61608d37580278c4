//! Envoy-to-envoy RPC surface (spec §4.6, §4.5, §6).
//!
//! The byte-level socket transport is an external collaborator (spec
//! §1); this trait is the Rust-level contract the walk engine and
//! lease table depend on. A real implementation frames these calls as
//! `TEWALKREMOTE`/`TEGRANT`/... messages over the wire; tests use an
//! in-memory double that talks directly to another envoy's state.

use async_trait::async_trait;

use crate::error::Result;
use crate::wire::records::{GrantChunk, LeaseRecord};
use crate::wire::{Address, Qid};

#[derive(Debug, Clone)]
pub struct RemoteWalkOutcome {
    pub errno: i32,
    pub wqid: Vec<Qid>,
    /// `Some` when the walk needs to continue at a further envoy.
    pub next: Option<Address>,
}

#[async_trait]
pub trait Peer: Send + Sync {
    async fn remote_walk(
        &self,
        to: Address,
        fid: u32,
        newfid: u32,
        names: &[String],
        user: &str,
        pathname: &str,
    ) -> Result<RemoteWalkOutcome>;

    async fn remote_closefid(&self, to: Address, fid: u32) -> Result<()>;

    async fn remote_stat(&self, to: Address, pathname: &str) -> Result<crate::wire::StatRecord>;

    /// Sends one chunk of a grant. The caller drives the `Start`/
    /// `Continue`/`End`/`Single` sequence (spec §4.5 step 4).
    async fn grant_chunk(
        &self,
        to: Address,
        source: Address,
        root: &LeaseRecord,
        chunk: &GrantChunk,
    ) -> Result<()>;

    async fn revoke(&self, to: Address, pathname: &str) -> Result<()>;

    /// Asks the owner of each exit to snapshot itself, returning each
    /// exit's new frozen-root OID (spec §4.5 `snapshot`).
    async fn remote_snapshot(&self, exits: &[LeaseRecord]) -> Result<Vec<(String, u64)>>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockPeer {
        pub snapshot_results: Mutex<HashMap<String, u64>>,
    }

    #[async_trait]
    impl Peer for MockPeer {
        async fn remote_walk(
            &self,
            _to: Address,
            _fid: u32,
            _newfid: u32,
            _names: &[String],
            _user: &str,
            _pathname: &str,
        ) -> Result<RemoteWalkOutcome> {
            Ok(RemoteWalkOutcome { errno: 0, wqid: Vec::new(), next: None })
        }

        async fn remote_closefid(&self, _to: Address, _fid: u32) -> Result<()> {
            Ok(())
        }

        async fn remote_stat(&self, _to: Address, pathname: &str) -> Result<crate::wire::StatRecord> {
            Ok(crate::wire::StatRecord {
                qid: Qid::new(0, 0, 0),
                mode: 0,
                atime: 0,
                mtime: 0,
                length: 0,
                uid: 0,
                gid: 0,
                muid: 0,
                owner: String::new(),
                group: String::new(),
                muid_name: String::new(),
                name: pathname.to_string(),
                extension: String::new(),
            })
        }

        async fn grant_chunk(
            &self,
            _to: Address,
            _source: Address,
            _root: &LeaseRecord,
            _chunk: &GrantChunk,
        ) -> Result<()> {
            Ok(())
        }

        async fn revoke(&self, _to: Address, _pathname: &str) -> Result<()> {
            Ok(())
        }

        async fn remote_snapshot(&self, exits: &[LeaseRecord]) -> Result<Vec<(String, u64)>> {
            let results = self.snapshot_results.lock().unwrap();
            Ok(exits
                .iter()
                .map(|e| (e.pathname.clone(), *results.get(&e.pathname).unwrap_or(&e.oid)))
                .collect())
        }
    }
}
