//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{target::Target, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through targets.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_target(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        Some(targets[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::transport::Transport;

    fn targets(addrs: &[&str]) -> Vec<Arc<Target>> {
        let transport = Arc::new(Transport::http(4));
        addrs
            .iter()
            .map(|addr| Arc::new(Target::new(addr.to_string(), transport.clone())))
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin() {
        let lb = RoundRobin::new();
        let targets = targets(&["a:80", "b:80", "c:80"]);

        let picked: Vec<_> = (0..4)
            .map(|_| lb.next_target(&targets).unwrap().addr().to_string())
            .collect();
        assert_eq!(picked, vec!["a:80", "b:80", "c:80", "a:80"]);
    }

    #[test]
    fn test_empty() {
        let lb = RoundRobin::new();
        assert!(lb.next_target(&[]).is_none());
    }
}
