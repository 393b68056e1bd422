//! Patch model: the per-service delta between two snapshots and the order
//! in which it is applied.

use tracing::{debug, error};

use crate::handlers::FlavorHandler;
use crate::proxier::Proxier;
use crate::record::{EndpointInfo, ServicePortInfo};

/// The discriminant order matters: groups are applied in descending order,
/// so every `Delete` runs before any `Create` or `NoOp`. `Update` exists in
/// the type but the planner never emits it; content-hashed keys turn every
/// update into a delete of the old key plus a create of the new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    NoOp,
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug)]
pub struct ServicePatch {
    pub info: ServicePortInfo,
    pub op: Operation,
}

#[derive(Clone, Debug)]
pub struct EndpointPatch {
    pub endpoint: EndpointInfo,
    pub op: Operation,
}

/// One service's combined service-level and endpoint-level delta for a
/// single reconciliation. Groups are independent of each other, which is
/// what would permit applying them concurrently later.
#[derive(Clone, Debug)]
pub struct PatchGroup {
    pub svc: ServicePatch,
    pub eps: Vec<EndpointPatch>,
}

impl PatchGroup {
    /// Apply through the given handler, in the fixed intra-group order:
    /// create service before its endpoints, delete endpoints before their
    /// service, endpoint-only groups in arrival order.
    pub fn apply(&self, handler: &dyn FlavorHandler, proxier: &mut Proxier) {
        match self.svc.op {
            Operation::NoOp => self.apply_endpoints(handler, proxier),
            Operation::Create => {
                handler.create_service(proxier, &self.svc.info);
                self.apply_endpoints(handler, proxier);
            }
            Operation::Delete => {
                self.apply_endpoints(handler, proxier);
                handler.delete_service(proxier, &self.svc.info);
            }
            Operation::Update => {
                error!(
                    "update operation reached patch application for {}",
                    self.svc.info.namespaced_name()
                );
                panic!("update operations must be decomposed into delete+create");
            }
        }
    }

    fn apply_endpoints(&self, handler: &dyn FlavorHandler, proxier: &mut Proxier) {
        for ep in &self.eps {
            match ep.op {
                Operation::Create => handler.create_endpoint(proxier, &ep.endpoint, &self.svc.info),
                Operation::Delete => handler.delete_endpoint(proxier, &ep.endpoint, &self.svc.info),
                Operation::NoOp => {}
                Operation::Update => {
                    error!(
                        "update operation reached endpoint patch for {}",
                        self.svc.info.namespaced_name()
                    );
                    panic!("update operations must be decomposed into delete+create");
                }
            }
        }
    }
}

/// Order groups for application: all service deletes strictly before any
/// create or no-op, so a service re-identity tears down the old kernel
/// state before the replacement is built. The sort is stable, so groups
/// with equal operations keep their planner order.
pub fn order_for_apply(groups: &mut [PatchGroup]) {
    groups.sort_by(|a, b| b.svc.op.cmp(&a.svc.op));
    for group in groups.iter() {
        debug!(
            "patch group: service={} op={:?} endpoints={}",
            group.svc.info.namespaced_name(),
            group.svc.op,
            group.eps.len()
        );
    }
}
