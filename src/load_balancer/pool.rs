//! Target pool management.
//!
//! # Responsibilities
//! - Build targets for the configured addresses and protocol
//! - Apply the load balancing algorithm to select a target

use std::sync::Arc;

use crate::config::UpstreamProto;
use crate::load_balancer::{round_robin::RoundRobin, target::Target, LoadBalancer};
use crate::upstream::transport::{Transport, TransportError};

/// Fixed, ordered set of targets plus the selection strategy.
#[derive(Debug)]
pub struct TargetPool {
    targets: Vec<Arc<Target>>,
    balancer: Box<dyn LoadBalancer>,
}

impl TargetPool {
    /// Round-robin pool over `targets`.
    pub fn new(targets: Vec<Arc<Target>>) -> Result<Self, TransportError> {
        if targets.is_empty() {
            return Err(TransportError::NoTargets);
        }
        Ok(Self {
            targets,
            balancer: Box::new(RoundRobin::new()),
        })
    }

    /// Build one target per address.
    ///
    /// Targets share a single transport, except `unix` where each socket path
    /// gets its own.
    pub fn from_addrs(
        proto: UpstreamProto,
        addrs: &[String],
        max_idle: usize,
    ) -> Result<Self, TransportError> {
        let targets = match proto {
            UpstreamProto::Unix => addrs
                .iter()
                .map(|addr| {
                    let transport = Arc::new(Transport::unix(addr, max_idle));
                    Arc::new(Target::new(addr.clone(), transport))
                })
                .collect(),
            _ => {
                let shared = Arc::new(Transport::for_proto(proto, max_idle)?);
                addrs
                    .iter()
                    .map(|addr| Arc::new(Target::new(addr.clone(), shared.clone())))
                    .collect()
            }
        };

        for addr in addrs {
            tracing::info!(target_addr = %addr, proto = %proto, "Registered upstream target");
        }

        Self::new(targets)
    }

    pub fn select(&self) -> Option<Arc<Target>> {
        self.balancer.next_target(&self.targets)
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_select_wraps() {
        let pool =
            TargetPool::from_addrs(UpstreamProto::Http, &addrs(&["a:80", "b:80"]), 8).unwrap();

        let picked: Vec<_> = (0..5)
            .map(|_| pool.select().unwrap().addr().to_string())
            .collect();
        assert_eq!(picked, vec!["a:80", "b:80", "a:80", "b:80", "a:80"]);
    }

    #[tokio::test]
    async fn test_each_target_once_per_cycle() {
        let pool =
            TargetPool::from_addrs(UpstreamProto::H2c, &addrs(&["a:1", "b:2", "c:3"]), 8).unwrap();

        let mut picked: Vec<_> = (0..pool.len())
            .map(|_| pool.select().unwrap().addr().to_string())
            .collect();
        picked.sort();
        assert_eq!(picked, vec!["a:1", "b:2", "c:3"]);
    }

    #[tokio::test]
    async fn test_shared_and_owned_transports() {
        let pool =
            TargetPool::from_addrs(UpstreamProto::Http, &addrs(&["a:80", "b:80"]), 8).unwrap();
        let [a, b] = pool.targets() else { panic!("two targets") };
        assert!(std::ptr::eq(a.transport(), b.transport()));

        let sockets = addrs(&["/tmp/a.sock", "/tmp/b.sock"]);
        let pool = TargetPool::from_addrs(UpstreamProto::Unix, &sockets, 8).unwrap();
        let [a, b] = pool.targets() else { panic!("two targets") };
        assert!(!std::ptr::eq(a.transport(), b.transport()));
        assert_eq!(a.authority(), "localhost");
    }

    #[tokio::test]
    async fn test_empty_pool_rejected() {
        assert!(matches!(
            TargetPool::from_addrs(UpstreamProto::Http, &[], 8),
            Err(TransportError::NoTargets)
        ));
    }
}
