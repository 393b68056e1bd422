//! Per-node data-plane reconciler for a cluster service proxy.
//!
//! The upstream control plane delivers the complete desired service and
//! endpoint state on every callback. The reconciler diffs it against the
//! previously applied state through two content-addressed stores, plans the
//! minimal ordered delta, and patches three kernel resources to match: IPVS
//! virtual servers, named ipset memberships, and addresses on a dedicated
//! dummy interface.

pub mod diffstore;
pub mod error;
pub mod handlers;
pub mod ipset;
pub mod patch;
pub mod proxier;
pub mod reconciler;
pub mod record;
pub mod setup;
pub mod shim;
pub mod snapshot;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
pub use reconciler::Reconciler;
