//! Randomized full-state soak: synthetic snapshots with churning services
//! and endpoints, driven through the reconciler back to back. Reseeded per
//! callback so a run is reproducible from its base seed.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use svclb::snapshot::{
    AddrSet, Endpoint, PortMapping, Protocol, Service, ServiceEndpoints, ServiceType,
};
use svclb::Reconciler;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::StressArgs;

const PORTS: [u16; 4] = [80, 3000, 5000, 8080];
const PROTOCOLS: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Sctp];
const SERVICE_TYPES: [ServiceType; 2] = [ServiceType::ClusterIp, ServiceType::NodePort];

pub async fn run(
    reconciler: Arc<Reconciler>,
    args: StressArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let start = Instant::now();
    for i in 0..args.callbacks {
        if cancel.is_cancelled() {
            info!("cancelled after {i} callbacks");
            break;
        }
        let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(i as u64));
        info!("callback {i}");

        let snapshot = generate_snapshot(&mut rng, &args);
        let (tx, rx) = tokio::sync::mpsc::channel(args.data_plane.channel_capacity);
        tokio::spawn(async move {
            for record in snapshot {
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });
        reconciler.callback(rx).await;
    }
    info!(
        "processed {} callbacks in {} ms",
        args.callbacks,
        start.elapsed().as_millis()
    );
    Ok(())
}

fn generate_snapshot(rng: &mut StdRng, args: &StressArgs) -> Vec<ServiceEndpoints> {
    let services = rng.gen_range(args.min_services..=args.max_services);
    (0..services)
        .map(|s| ServiceEndpoints {
            service: Service {
                namespace: "stress".into(),
                name: format!("svc-{s}"),
                service_type: *SERVICE_TYPES.choose(rng).unwrap(),
                cluster_ips: AddrSet {
                    v4: vec![format!("172.18.{}.{}", s / 255, s % 255)],
                    v6: vec![],
                },
                ports: port_mappings(rng),
                ..Default::default()
            },
            endpoints: endpoints(rng, s, args),
        })
        .collect()
}

fn port_mappings(rng: &mut StdRng) -> Vec<PortMapping> {
    let mut ports = PORTS;
    ports.shuffle(rng);
    let count = rng.gen_range(1..PORTS.len());
    ports[..count]
        .iter()
        .enumerate()
        .map(|(i, port)| PortMapping {
            name: format!("port-{}", i + 1),
            protocol: *PROTOCOLS.choose(rng).unwrap(),
            port: *port,
            node_port: rng.gen_range(30000..32767),
            target_port: *port,
            target_port_name: format!("target-port-{}", i + 1),
        })
        .collect()
}

fn endpoints(rng: &mut StdRng, s: usize, args: &StressArgs) -> Vec<Endpoint> {
    let count = rng.gen_range(args.min_endpoints..=args.max_endpoints);
    (0..count)
        .map(|_| {
            let local = rng.gen_bool(1.0 / args.nodes as f64);
            let hostname = if local {
                "this-node".to_owned()
            } else {
                format!("host-{}", rng.gen_range(0..args.nodes))
            };
            Endpoint {
                hostname,
                ips: AddrSet {
                    v4: vec![format!(
                        "10.{}.{}.{}",
                        s % 255,
                        rng.gen_range(0..255),
                        rng.gen_range(0..255)
                    )],
                    v6: vec![],
                },
                local,
                ..Default::default()
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DataPlaneArgs;

    fn args() -> StressArgs {
        StressArgs {
            data_plane: DataPlaneArgs {
                dummy_interface: "svclb0".into(),
                node_ips: vec![],
                dry_run: true,
                channel_capacity: 100,
            },
            callbacks: 1,
            nodes: 20,
            min_services: 5,
            max_services: 10,
            min_endpoints: 1,
            max_endpoints: 5,
            seed: 42,
        }
    }

    #[test]
    fn test_same_seed_same_snapshot() {
        let args = args();
        let a = generate_snapshot(&mut StdRng::seed_from_u64(7), &args);
        let b = generate_snapshot(&mut StdRng::seed_from_u64(7), &args);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generated_services_are_well_formed() {
        let args = args();
        let snapshot = generate_snapshot(&mut StdRng::seed_from_u64(1), &args);
        assert!(snapshot.len() >= args.min_services);
        for record in &snapshot {
            assert!(!record.service.ports.is_empty());
            for port in &record.service.ports {
                assert!((30000..32767).contains(&port.node_port));
            }
            for ep in &record.endpoints {
                assert_eq!(ep.ips.v4.len(), 1);
                assert!(ep.ips.v4[0].parse::<std::net::IpAddr>().is_ok());
            }
        }
    }
}
