//! Request/response message vocabulary the dispatcher (C8) routes on.
//!
//! Full byte-level framing (`size[4] id[1] tag[2]` plus per-type body)
//! is the external 9P wire codec (spec §1); this module models the
//! decoded Rust-level shape a codec hands the control plane, which is
//! the contract the core actually depends on.

use num_derive::{FromPrimitive, ToPrimitive};

use super::qid::{Address, Qid};
use super::records::{FidRecord, LeaseRecord};
use super::stat::StatRecord;

pub type Tag = u16;
pub type Fid = u32;

/// 9P message type identifiers (client-facing subset plus the
/// envoy-to-envoy additions from spec §4.8/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum MsgType {
    TVersion = 100,
    RVersion = 101,
    TAttach = 104,
    RAttach = 105,
    RError = 107,
    TWalk = 110,
    RWalk = 111,
    TOpen = 112,
    ROpen = 113,
    TCreate = 114,
    RCreate = 115,
    TRead = 116,
    RRead = 117,
    TWrite = 118,
    RWrite = 119,
    TClunk = 120,
    RClunk = 121,
    TRemove = 122,
    RRemove = 123,
    TStat = 124,
    RStat = 125,
    TWStat = 126,
    RWStat = 127,
    // Envoy-to-envoy additions.
    TWalkRemote = 200,
    RWalkRemote = 201,
    TCloseFid = 202,
    RCloseFid = 203,
    TStatRemote = 204,
    RStatRemote = 205,
    TGrant = 206,
    RGrant = 207,
    TRevoke = 208,
    RRevoke = 209,
    TMigrate = 210,
    RMigrate = 211,
    TSnapshot = 212,
    RSnapshot = 213,
    TRenameTree = 214,
    RRenameTree = 215,
}

/// The connection's negotiated role, set by version negotiation
/// (spec §4.8): a connection starts `Unknown`, and the first
/// successful `TVersion` upgrades it based on the version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnRole {
    Unknown,
    ClientIn,
    EnvoyIn,
}

pub const CLIENT_VERSION: &str = "9P2000.u";
pub const ENVOY_VERSION: &str = "9P2000.envoy";

#[derive(Debug, Clone)]
pub enum Request {
    Version { msize: u32, version: String },
    Attach { fid: Fid, afid: Option<Fid>, uname: String, aname: String },
    Walk { fid: Fid, newfid: Fid, wnames: Vec<String> },
    Open { fid: Fid, mode: u32 },
    Create { fid: Fid, name: String, perm: u32, mode: u32 },
    Read { fid: Fid, offset: u64, count: u32 },
    Write { fid: Fid, offset: u64, data: Vec<u8> },
    Clunk { fid: Fid },
    Remove { fid: Fid },
    Stat { fid: Fid },
    WStat { fid: Fid, stat: StatRecord },
    WalkRemote { fid: Fid, newfid: Fid, wnames: Vec<String>, user: String, pathname: String },
    CloseFid { fid: Fid },
    StatRemote { pathname: String },
    Grant { kind: super::records::ChunkKind, root: LeaseRecord, source: Address, exits: Vec<LeaseRecord>, fids: Vec<FidRecord> },
    Revoke { pathname: String },
    Migrate { pathname: String, target: Address },
    Snapshot { pathname: String },
    RenameTree { old_pathname: String, new_pathname: String },
}

#[derive(Debug, Clone)]
pub enum Response {
    Version { msize: u32, version: String },
    Attach { qid: Qid },
    Error { errno: i32, ename: String },
    Walk { wqids: Vec<Qid> },
    Open { qid: Qid },
    Create { qid: Qid },
    Read { data: Vec<u8> },
    Write { count: u32 },
    Clunk,
    Remove,
    Stat { stat: StatRecord },
    WStat,
    WalkRemote { errno: i32, nwqid: usize, wqid: Vec<Qid>, next: Option<Address> },
    CloseFid,
    StatRemote { stat: StatRecord },
    Grant,
    Revoke,
    Migrate,
    Snapshot { oid: u64 },
    RenameTree,
}

/// An in-flight transaction as tracked by the dispatcher's tag table.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub tag: Tag,
    pub role: ConnRole,
}
