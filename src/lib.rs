//! envoy-fs - a federated 9P2000.envoy distributed file server control plane.
//!
//! An envoy owns a tree of *leases* (subtrees of the namespace), each
//! backed by content-addressed storage objects reached through a
//! thin [`object_client`] RPC veneer. Client paths resolve through a
//! per-lease *claim* tree with copy-on-write state; a [`walk`] may
//! bounce across envoys at a lease's exit points, triggering ownership
//! transfer (grant/merge) or CoW thawing along the way. A cooperative
//! [`worker`] runtime with typed resource locks and a retry-on-stale
//! discipline glues the subsystems together; [`dispatch`] is the
//! request router sitting on top of it all.

pub mod claim;
pub mod config;
pub mod dir;
pub mod dispatch;
pub mod error;
pub mod fid;
pub mod ids;
pub mod lease;
pub mod object_client;
pub mod peer;
pub mod policy;
pub mod server;
pub mod walk;
pub mod wire;
pub mod worker;

pub use dispatch::Dispatcher;
pub use error::{Error, Result};
