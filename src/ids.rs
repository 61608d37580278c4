//! Shared identifier newtypes (spec §9: "arena + index" realization of
//! the claim↔lease↔fid reference cycles).

/// Identifies a client connection for the purpose of scoping local
/// fids (`Fid` is keyed by `(connection, u32)`, spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

/// A client-visible fid number, scoped to a `ConnId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FidKey(pub ConnId, pub u32);

/// Index into a lease's claim arena. Only meaningful paired with the
/// `LeaseId` that owns the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClaimId(pub u32);

/// Identifies a lease within the process-wide lease table. Leases are
/// also addressable by pathname; this is the stable handle used once
/// a pathname lookup has resolved to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeaseId(pub u64);

/// Slot index into the process-wide remote-fid slab (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemoteFidSlot(pub u32);
