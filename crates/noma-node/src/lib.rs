#![forbid(unsafe_code)]

//! Host integrations that run on top of provisioned USB storage.
//!
//! `host` implements `NodeServices` from `noma-core`; the other modules each
//! own one piece of the node: bitcoind, lnd, nginx, swap, and the compose stack.

pub mod bitcoind;
pub mod compose;
mod host;
pub mod lnd;
pub mod nginx;
pub mod rpcauth;
pub mod swap;

pub use host::SystemNodeServices;
