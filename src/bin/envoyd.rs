//! `envoyd` - CLI entrypoint for the envoy control plane.
//!
//! Loads static configuration, wires up the dispatcher, and accepts
//! connections. Turning accepted sockets' bytes into [`envoy_fs::wire`]
//! values is the external 9P wire codec (spec §1) and is not
//! implemented here; this binary demonstrates the composition a real
//! transport would sit in front of.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::net::TcpListener;

use envoy_fs::config::Config;
use envoy_fs::dispatch::Dispatcher;
use envoy_fs::error::{Error, Result, EIO};
use envoy_fs::object_client::{CreateExt, ObjectClient, Oid, StatDelta};
use envoy_fs::peer::{Peer, RemoteWalkOutcome};
use envoy_fs::wire::records::{GrantChunk, LeaseRecord};
use envoy_fs::wire::{Address, Qid, StatRecord};

#[derive(Parser, Debug)]
#[command(name = "envoyd", about = "9P2000.envoy control plane daemon")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

/// Placeholder `ObjectClient` used until a real storage-RPC transport
/// is wired in. Every call fails loudly rather than pretending to
/// succeed.
struct UnwiredObjectClient;

#[async_trait]
impl ObjectClient for UnwiredObjectClient {
    async fn reserve_oid(&self) -> Result<Oid> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn create(&self, _oid: Oid, _mode: u32, _ctime: u32, _uid: u32, _gid: u32, _ext: CreateExt) -> Result<()> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn clone_oid(&self, _old: Oid, _new: Oid) -> Result<()> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn read(&self, _oid: Oid, _atime: u32, _offset: u64, _count: u32) -> Result<Vec<u8>> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn write(&self, _oid: Oid, _mtime: u32, _offset: u64, _data: &[u8]) -> Result<u32> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn stat(&self, _oid: Oid, _name: &str) -> Result<StatRecord> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn wstat(&self, _oid: Oid, _delta: StatDelta) -> Result<()> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn delete(&self, _oid: Oid) -> Result<()> {
        Err(Error::client(EIO, "no storage backend configured"))
    }
    async fn prime_cache(&self, _oid: Oid) -> Result<()> {
        Ok(())
    }
}

/// Placeholder `Peer` used until the envoy-to-envoy RPC transport is
/// wired in.
struct UnwiredPeer;

#[async_trait]
impl Peer for UnwiredPeer {
    async fn remote_walk(&self, _to: Address, _fid: u32, _newfid: u32, _names: &[String], _user: &str, _pathname: &str) -> Result<RemoteWalkOutcome> {
        Err(Error::client(EIO, "no peer transport configured"))
    }
    async fn remote_closefid(&self, _to: Address, _fid: u32) -> Result<()> {
        Err(Error::client(EIO, "no peer transport configured"))
    }
    async fn remote_stat(&self, _to: Address, _pathname: &str) -> Result<StatRecord> {
        Err(Error::client(EIO, "no peer transport configured"))
    }
    async fn grant_chunk(&self, _to: Address, _source: Address, _root: &LeaseRecord, _chunk: &GrantChunk) -> Result<()> {
        Err(Error::client(EIO, "no peer transport configured"))
    }
    async fn revoke(&self, _to: Address, _pathname: &str) -> Result<()> {
        Err(Error::client(EIO, "no peer transport configured"))
    }
    async fn remote_snapshot(&self, _exits: &[LeaseRecord]) -> Result<Vec<(String, u64)>> {
        Err(Error::client(EIO, "no peer transport configured"))
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.config)?;
    let config = Config::from_toml_str(&raw)?;

    let self_addr: Address = config.listen.into();
    let dispatcher = Arc::new(Dispatcher::new(UnwiredObjectClient, UnwiredPeer, self_addr, config.max_message_size));

    let listener = TcpListener::bind((config.listen.ip, config.listen.port)).await?;
    tracing::info!(addr = ?self_addr, "envoyd listening");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        socket.set_nodelay(true).ok();
        tracing::info!(%peer_addr, "accepted connection");
        let dispatcher = dispatcher.clone();
        let (_inbound, _outbound, _handle) = envoy_fs::server::spawn_connection(dispatcher);
        // A real transport would pump decoded `Request`s into
        // `_inbound` and frame `_outbound` back onto `socket`; that
        // bridge is the external wire codec (spec §1).
        drop(socket);
    }
}
