//! Request dispatcher (C8, spec §4.8).
//!
//! Tag-based transaction tracking, connection-role upgrade on
//! version negotiation, and the handler table that turns a decoded
//! [`Request`] into a [`Response`] by driving C1 (worker/retry), C4
//! (claim tree), C5 (lease table), C6 (walk), and C7 (fid registry).
//! The byte-level framing that produces `Request`/consumes `Response`
//! is an external collaborator (spec §1); this module is what a real
//! framing layer calls into.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::claim::Access;
use crate::dir::{BlockCache, Directory};
use crate::error::{Error, Result, EACCES, EBADF, EIO};
use crate::fid::{Binding, Fid, FidRegistry, FidStatus};
use crate::ids::{ConnId, FidKey};
use crate::lease::LeaseTable;
use crate::object_client::{CreateExt, ObjectClient};
use crate::peer::Peer;
use crate::wire::message::{ConnRole, Request, Response, Tag, CLIENT_VERSION, ENVOY_VERSION};
use crate::wire::primitive::{GLOBAL_MAX_SIZE, GLOBAL_MIN_SIZE};
use crate::wire::qid::{qid_type_from_mode, DMDIR};
use crate::wire::{Address, Qid};
use crate::worker::Scheduler;

/// One client/peer socket's negotiated state (spec §4.8).
pub struct Connection {
    pub id: ConnId,
    pub role: ConnRole,
    pub msize: u32,
    /// Tags with an outstanding reply; a repeated tag before its
    /// predecessor completes is a protocol violation (spec §4.8).
    outstanding: HashSet<Tag>,
}

impl Connection {
    pub fn new(id: ConnId) -> Self {
        Connection { id, role: ConnRole::Unknown, msize: GLOBAL_MIN_SIZE, outstanding: HashSet::new() }
    }

    fn begin(&mut self, tag: Tag) -> Result<()> {
        if !self.outstanding.insert(tag) {
            return Err(Error::client(EIO, "tag already has an outstanding transaction"));
        }
        Ok(())
    }

    fn end(&mut self, tag: Tag) {
        self.outstanding.remove(&tag);
    }
}

/// Ties together every subsystem a handler needs. One instance is
/// shared by every connection's worker tasks.
pub struct Dispatcher<C: ObjectClient, P: Peer> {
    pub scheduler: Arc<Scheduler>,
    pub leases: Mutex<LeaseTable>,
    pub fids: Mutex<FidRegistry>,
    pub client: C,
    pub peer: P,
    pub dir_cache: BlockCache,
    pub walk_cache: crate::walk::WalkCache,
    pub self_addr: Address,
    pub server_msize: u32,
    next_conn_id: AtomicU64,
}

impl<C: ObjectClient, P: Peer> Dispatcher<C, P> {
    pub fn new(client: C, peer: P, self_addr: Address, server_msize: u32) -> Self {
        Dispatcher {
            scheduler: Scheduler::new(),
            leases: Mutex::new(LeaseTable::new()),
            fids: Mutex::new(FidRegistry::new()),
            client,
            peer,
            dir_cache: BlockCache::new(4096),
            walk_cache: crate::walk::WalkCache::new(4096),
            self_addr,
            server_msize: server_msize.clamp(GLOBAL_MIN_SIZE, GLOBAL_MAX_SIZE),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn new_connection(&self) -> Connection {
        Connection::new(ConnId(self.next_conn_id.fetch_add(1, Ordering::SeqCst)))
    }

    /// Routes one request. Until version negotiation has set
    /// `conn.role`, only `Version` is accepted (spec §4.8
    /// "version-negotiation-only handler on unknown connections").
    pub async fn dispatch(&self, conn: &mut Connection, tag: Tag, req: Request) -> Response {
        if let Err(e) = conn.begin(tag) {
            return Response::Error { errno: e.errno(), ename: e.to_string() };
        }
        let result = self.route(conn, req).await;
        conn.end(tag);
        match result {
            Ok(resp) => resp,
            Err(e) => Response::Error { errno: e.errno(), ename: e.to_string() },
        }
    }

    async fn route(&self, conn: &mut Connection, req: Request) -> Result<Response> {
        if conn.role == ConnRole::Unknown {
            return match req {
                Request::Version { msize, version } => Ok(self.negotiate(conn, msize, &version)),
                _ => Err(Error::client(EIO, "version negotiation required before any other request")),
            };
        }

        // A manual retry loop rather than `run_retryable`: handlers
        // need `&mut conn` across the attempt, and a `FnMut` closure
        // cannot re-borrow it on every iteration.
        loop {
            let _g = self.scheduler.acquire().await;
            let attempt = match &req {
                Request::Version { msize, version } => Ok(self.negotiate(conn, *msize, version)),
                Request::Attach { fid, uname, aname, .. } => self.handle_attach(conn, *fid, uname, aname).await,
                Request::Walk { fid, newfid, wnames } => self.handle_walk(conn, *fid, *newfid, wnames).await,
                Request::Clunk { fid } => self.handle_clunk(conn, *fid).await,
                Request::Stat { fid } => self.handle_stat(conn, *fid).await,
                Request::Open { fid, mode } => self.handle_open(conn, *fid, *mode).await,
                Request::Create { fid, name, perm, mode } => self.handle_create(conn, *fid, name, *perm, *mode).await,
                Request::Read { fid, offset, count } => self.handle_read(conn, *fid, *offset, *count).await,
                Request::Write { fid, offset, data } => self.handle_write(conn, *fid, *offset, data).await,
                Request::Remove { fid } => self.handle_remove(conn, *fid).await,
                _ => Err(Error::client(EIO, "unsupported request in this dispatcher build")),
            };
            drop(_g);
            match attempt {
                Err(e) if e.is_retryable() => {
                    self.walk_cache.flush();
                    tracing::debug!(error = %e, "dispatcher retry");
                    continue;
                }
                other => return other,
            }
        }
    }

    fn negotiate(&self, conn: &mut Connection, client_msize: u32, version: &str) -> Response {
        let msize = client_msize.min(self.server_msize).clamp(GLOBAL_MIN_SIZE, GLOBAL_MAX_SIZE);
        conn.msize = msize;
        conn.role = match version {
            ENVOY_VERSION => ConnRole::EnvoyIn,
            _ => ConnRole::ClientIn,
        };
        let negotiated = if version == ENVOY_VERSION { ENVOY_VERSION } else { CLIENT_VERSION };
        Response::Version { msize, version: negotiated.to_string() }
    }

    async fn handle_attach(&self, conn: &Connection, fid: u32, uname: &str, aname: &str) -> Result<Response> {
        let mut leases = self.leases.lock().await;
        let lease_id = leases.find_root(aname).ok_or_else(|| Error::client(EACCES, "attach: no local lease at that path"))?;
        let root_claim = leases.get(lease_id).local().expect("find_root only returns local leases").root;
        let oid = leases.get(lease_id).local().unwrap().claims.get(root_claim).oid;
        drop(leases);

        let stat = self.client.stat(oid, "").await?;
        let qid = Qid::from_stat(oid, qid_type_from_mode(stat.mode), stat.mtime.into(), stat.length);

        let mut fids = self.fids.lock().await;
        fids.insert_local(
            FidKey(conn.id, fid),
            Fid {
                pathname: aname.to_string(),
                user: uname.to_string(),
                status: FidStatus::Unopened,
                omode: 0,
                readdir_cookie: 0,
                readdir_env: Vec::new(),
                binding: Binding::Local { lease: lease_id, claim: root_claim },
            },
        );
        Ok(Response::Attach { qid })
    }

    async fn handle_walk(&self, conn: &Connection, fid: u32, newfid: u32, wnames: &[String]) -> Result<Response> {
        let fids = self.fids.lock().await;
        let start = fids.lookup(FidKey(conn.id, fid)).ok_or_else(|| Error::client(EBADF, "unknown fid"))?.clone();
        drop(fids);

        let binding = match start.binding {
            Binding::Local { lease, claim } => crate::walk::ResolvedBinding::Local { lease, claim },
            Binding::Remote { addr, remote_fid } => crate::walk::ResolvedBinding::Remote { addr, remote_fid },
        };

        let mut leases = self.leases.lock().await;
        let outcome = crate::walk::walk(
            &mut leases,
            &self.client,
            &self.dir_cache,
            &self.walk_cache,
            &self.peer,
            self.self_addr,
            newfid,
            &start.pathname,
            binding,
            wnames,
            &start.user,
        )
        .await?;
        drop(leases);

        if outcome.qids.len() == wnames.len() {
            let new_binding = match outcome.binding {
                crate::walk::ResolvedBinding::Local { lease, claim } => Binding::Local { lease, claim },
                crate::walk::ResolvedBinding::Remote { addr, remote_fid } => Binding::Remote { addr, remote_fid },
            };
            let mut fids = self.fids.lock().await;
            fids.insert_local(
                FidKey(conn.id, newfid),
                Fid {
                    pathname: outcome.final_pathname,
                    user: start.user,
                    status: FidStatus::Unopened,
                    omode: 0,
                    readdir_cookie: 0,
                    readdir_env: Vec::new(),
                    binding: new_binding,
                },
            );
        }
        Ok(Response::Walk { wqids: outcome.qids })
    }

    async fn handle_clunk(&self, conn: &Connection, fid: u32) -> Result<Response> {
        let mut fids = self.fids.lock().await;
        let key = FidKey(conn.id, fid);
        let removed = fids.lookup(key).ok_or_else(|| Error::client(EBADF, "unknown fid"))?.clone();
        if let Binding::Local { lease, claim } = removed.binding {
            let mut leases = self.leases.lock().await;
            if let Some(local) = leases.get_mut(lease).local_mut() {
                local.claims.release(claim, |_| false);
            }
        }
        fids.remove(key, false, 0, Access::ReadOnly);
        Ok(Response::Clunk)
    }

    async fn handle_stat(&self, conn: &Connection, fid: u32) -> Result<Response> {
        let (oid, name) = self.resolve_local_oid(conn, fid).await?;
        let stat = self.client.stat(oid, &name).await?;
        Ok(Response::Stat { stat })
    }

    async fn handle_open(&self, conn: &Connection, fid: u32, mode: u32) -> Result<Response> {
        let (oid, name) = self.resolve_local_oid(conn, fid).await?;
        let stat = self.client.stat(oid, &name).await?;
        let qid = Qid::from_stat(oid, qid_type_from_mode(stat.mode), stat.mtime.into(), stat.length);
        let status = if stat.mode & DMDIR != 0 { FidStatus::OpenDir } else { FidStatus::OpenFile };
        let mut fids = self.fids.lock().await;
        fids.update_local(FidKey(conn.id, fid), |f| {
            f.status = status;
            f.omode = mode;
        })?;
        Ok(Response::Open { qid })
    }

    async fn handle_create(&self, conn: &Connection, fid: u32, name: &str, perm: u32, mode: u32) -> Result<Response> {
        let (parent_oid, lease, parent_claim) = self.resolve_local_claim(conn, fid).await?;
        let new_oid = self.client.reserve_oid().await?;
        self.client.create(new_oid, perm, 0, 0, 0, CreateExt::default()).await?;

        let mut leases = self.leases.lock().await;
        let local = leases.get_mut(lease).local_mut().ok_or_else(|| Error::client(EACCES, "create on non-local lease"))?;
        let dir = Directory { client: &self.client, cache: &self.dir_cache, lease_id: lease.0, oid: parent_oid };
        dir.create_entry(name, new_oid, false).await?;
        let access = local.claims.get(parent_claim).access;
        let child = local.claims.new_child(parent_claim, name, access, new_oid);
        drop(leases);

        let stat = self.client.stat(new_oid, name).await?;
        let qid = Qid::from_stat(new_oid, qid_type_from_mode(perm), stat.mtime.into(), stat.length);
        let mut fids = self.fids.lock().await;
        fids.update_local(FidKey(conn.id, fid), |f| {
            f.binding = Binding::Local { lease, claim: child };
            f.status = FidStatus::OpenFile;
            f.omode = mode;
        })?;
        Ok(Response::Create { qid })
    }

    async fn handle_read(&self, conn: &Connection, fid: u32, offset: u64, count: u32) -> Result<Response> {
        let (oid, _name) = self.resolve_local_oid(conn, fid).await?;
        let data = self.client.read(oid, 0, offset, count).await?;
        Ok(Response::Read { data })
    }

    async fn handle_write(&self, conn: &Connection, fid: u32, offset: u64, data: &[u8]) -> Result<Response> {
        let (oid, _name) = self.resolve_local_oid(conn, fid).await?;
        let count = self.client.write(oid, 0, offset, data).await?;
        Ok(Response::Write { count })
    }

    async fn handle_remove(&self, conn: &Connection, fid: u32) -> Result<Response> {
        let (_parent_oid, lease, claim) = self.resolve_local_claim(conn, fid).await?;
        let mut leases = self.leases.lock().await;
        let local = leases.get_mut(lease).local_mut().ok_or_else(|| Error::client(EACCES, "remove on non-local lease"))?;
        if let Some(parent) = local.claims.get_parent(claim) {
            let name = local.claims.get(claim).pathname.rsplit('/').next().unwrap_or("").to_string();
            let parent_oid = local.claims.get(parent).oid;
            let dir = Directory { client: &self.client, cache: &self.dir_cache, lease_id: lease.0, oid: parent_oid };
            dir.remove_entry(&name).await?;
        }
        local.claims.get_mut(claim).deleted = true;
        drop(leases);
        self.handle_clunk(conn, fid).await.map(|_| Response::Remove)
    }

    async fn resolve_local_oid(&self, conn: &Connection, fid: u32) -> Result<(u64, String)> {
        let (oid, _lease, _claim) = self.resolve_local_claim(conn, fid).await?;
        let fids = self.fids.lock().await;
        let name = fids.lookup(FidKey(conn.id, fid)).map(|f| f.pathname.clone()).unwrap_or_default();
        Ok((oid, name))
    }

    async fn resolve_local_claim(&self, conn: &Connection, fid: u32) -> Result<(u64, crate::ids::LeaseId, crate::ids::ClaimId)> {
        let fids = self.fids.lock().await;
        let f = fids.lookup(FidKey(conn.id, fid)).ok_or_else(|| Error::client(EBADF, "unknown fid"))?;
        let (lease, claim) = match f.binding {
            Binding::Local { lease, claim } => (lease, claim),
            Binding::Remote { .. } => return Err(Error::client(EIO, "fid is bound remotely; route via peer RPC")),
        };
        drop(fids);
        let leases = self.leases.lock().await;
        let oid = leases.get(lease).local().ok_or_else(|| Error::client(EACCES, "lease is not local"))?.claims.get(claim).oid;
        Ok((oid, lease, claim))
    }
}
