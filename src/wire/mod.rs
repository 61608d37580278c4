//! Wire-level types the core depends on directly (spec §3, §6).
//!
//! The byte-level socket transport and the general 9P codec are
//! external collaborators; this module only covers the parts the
//! control plane itself packs or unpacks: qids, stat records,
//! lease/fid transfer records, and the message vocabulary the
//! dispatcher routes on.

pub mod message;
pub mod primitive;
pub mod qid;
pub mod records;
pub mod stat;

pub use qid::{Address, Qid};
pub use stat::StatRecord;

/// All-ones sentinel OID (spec §3).
pub const NOOID: u64 = u64::MAX;
