//! The reconciler: one full-state callback in, the minimal ordered kernel
//! delta out.
//!
//! Each callback drains the snapshot channel, ingests every record into the
//! two diff stores, assembles per-service patch groups from the stores'
//! change lists, orders them delete-first and dispatches each group to the
//! handler registered for its flavor. A mutex serializes callbacks; the
//! kernel-facing part runs without suspension points because the shims are
//! not reentrant.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

use crate::diffstore::DiffStore;
use crate::handlers::{default_registry, HandlerRegistry};
use crate::patch::{order_for_apply, EndpointPatch, Operation, PatchGroup, ServicePatch};
use crate::proxier::Proxier;
use crate::record::{EndpointInfo, ServicePortInfo, DEFAULT_SCHEDULING_METHOD, DEFAULT_WEIGHT};
use crate::snapshot::{ServiceEndpoints, ServiceType};

pub struct Reconciler {
    inner: Mutex<Inner>,
}

struct Inner {
    svc_store: DiffStore<ServicePortInfo>,
    ep_store: DiffStore<EndpointInfo>,
    proxier: Proxier,
    handlers: HandlerRegistry,
}

impl Reconciler {
    pub fn new(proxier: Proxier) -> Self {
        Self::with_handlers(proxier, default_registry())
    }

    pub fn with_handlers(proxier: Proxier, handlers: HandlerRegistry) -> Self {
        Reconciler {
            inner: Mutex::new(Inner {
                svc_store: DiffStore::new(),
                ep_store: DiffStore::new(),
                proxier,
                handlers,
            }),
        }
    }

    /// One full-state callback: drain the channel until the producer closes
    /// it, then reconcile. The channel is drained before the lock is taken
    /// so no await point sits inside the kernel-facing section.
    pub async fn callback(&self, mut rx: Receiver<ServiceEndpoints>) {
        let mut batch = Vec::new();
        while let Some(record) = rx.recv().await {
            batch.push(record);
        }
        self.sync(batch);
    }

    /// Reconcile one complete desired state.
    pub fn sync(&self, snapshot: impl IntoIterator<Item = ServiceEndpoints>) {
        let start = Instant::now();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.ingest(snapshot);
        let mut groups = plan_groups(&mut inner.svc_store, &mut inner.ep_store);
        order_for_apply(&mut groups);
        inner.apply(&groups);
        debug!(
            "synced snapshot: {} patch groups, {} services tracked, took {} ms",
            groups.len(),
            inner.svc_store.len(),
            start.elapsed().as_millis()
        );
    }
}

impl Inner {
    fn ingest(&mut self, snapshot: impl IntoIterator<Item = ServiceEndpoints>) {
        self.svc_store.reset();
        self.ep_store.reset();

        for record in snapshot {
            let service = &record.service;
            debug!(
                "received service {} with {} endpoints",
                service.namespaced_name(),
                record.endpoints.len()
            );

            for port in &service.ports {
                if service.service_type == ServiceType::NodePort && port.node_port == 0 {
                    warn!(
                        "skipping port {} of node-exposed service {}: node port is unset",
                        port.port,
                        service.namespaced_name()
                    );
                    continue;
                }
                let sp =
                    ServicePortInfo::new(service, port, DEFAULT_SCHEDULING_METHOD, DEFAULT_WEIGHT);
                let svc_key = sp.key();
                let svc_hash = sp.content_hash();
                self.svc_store.set(svc_key.clone(), svc_hash, sp);

                for endpoint in &record.endpoints {
                    for raw_ip in &endpoint.ips.v4 {
                        let ip = match raw_ip.parse() {
                            Ok(ip) => ip,
                            Err(e) => {
                                warn!(
                                    %e,
                                    "skipping unparseable endpoint IP {} of service {}",
                                    raw_ip,
                                    service.namespaced_name()
                                );
                                continue;
                            }
                        };
                        let ep = EndpointInfo::new(&svc_key, ip, endpoint);
                        let ep_hash = ep.content_hash();
                        self.ep_store.set(ep.key(), ep_hash, ep);
                    }
                }
            }
        }
    }

    fn apply(&mut self, groups: &[PatchGroup]) {
        for group in groups {
            let flavor = group.svc.info.service_type;
            match self.handlers.get(&flavor) {
                Some(handler) => group.apply(handler.as_ref(), &mut self.proxier),
                None => info!(
                    "no handler registered for {} services; skipping {}",
                    flavor,
                    group.svc.info.namespaced_name()
                ),
            }
        }
    }
}

/// Assemble per-service patch groups from the stores' change lists. Service
/// changes open the groups; endpoint changes attach to them, with a no-op
/// service patch synthesized (record recovered from the service store) when
/// only endpoints moved. Endpoint deletions are attached before endpoint
/// creations so stale backends leave before replacements arrive. Handled
/// deletions are dropped from the stores so they do not resurface next
/// snapshot.
fn plan_groups(
    svc_store: &mut DiffStore<ServicePortInfo>,
    ep_store: &mut DiffStore<EndpointInfo>,
) -> Vec<PatchGroup> {
    let svc_changes = svc_store.changes();
    let ep_changes = ep_store.changes();

    let mut groups: BTreeMap<String, PatchGroup> = BTreeMap::new();

    for entry in svc_changes.created {
        groups.insert(
            entry.key,
            PatchGroup {
                svc: ServicePatch {
                    info: entry.value,
                    op: Operation::Create,
                },
                eps: Vec::new(),
            },
        );
    }

    for entry in svc_changes.deleted {
        groups.insert(
            entry.key.clone(),
            PatchGroup {
                svc: ServicePatch {
                    info: entry.value,
                    op: Operation::Delete,
                },
                eps: Vec::new(),
            },
        );
        svc_store.delete(&entry.key);
    }

    for entry in ep_changes.deleted {
        let svc_key = entry.value.svc_key.clone();
        match groups.get_mut(&svc_key) {
            Some(group) => group.eps.push(EndpointPatch {
                endpoint: entry.value,
                op: Operation::Delete,
            }),
            None => match lookup_service(svc_store, &svc_key) {
                Some(sp) => {
                    groups.insert(
                        svc_key,
                        PatchGroup {
                            svc: ServicePatch {
                                info: sp,
                                op: Operation::NoOp,
                            },
                            eps: vec![EndpointPatch {
                                endpoint: entry.value,
                                op: Operation::Delete,
                            }],
                        },
                    );
                }
                None => warn!(
                    "dropping endpoint {} whose service record is gone",
                    entry.key
                ),
            },
        }
        ep_store.delete(&entry.key);
    }

    for entry in ep_changes.created {
        let svc_key = entry.value.svc_key.clone();
        match groups.get_mut(&svc_key) {
            Some(group) => group.eps.push(EndpointPatch {
                endpoint: entry.value,
                op: Operation::Create,
            }),
            None => match lookup_service(svc_store, &svc_key) {
                Some(sp) => {
                    groups.insert(
                        svc_key,
                        PatchGroup {
                            svc: ServicePatch {
                                info: sp,
                                op: Operation::NoOp,
                            },
                            eps: vec![EndpointPatch {
                                endpoint: entry.value,
                                op: Operation::Create,
                            }],
                        },
                    );
                }
                None => warn!(
                    "dropping endpoint {} without an owning service record",
                    entry.key
                ),
            },
        }
    }

    groups.into_values().collect()
}

fn lookup_service(
    svc_store: &DiffStore<ServicePortInfo>,
    svc_key: &str,
) -> Option<ServicePortInfo> {
    svc_store
        .get_by_prefix(svc_key)
        .into_iter()
        .find(|e| e.key == svc_key)
        .map(|e| e.value)
}
