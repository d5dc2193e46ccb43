//! Per-user queue depth selection.
//!
//! Keeps a local copy of the last cluster stats report and routes each query
//! to the cluster where the requesting user has the fewest queued queries,
//! breaking ties on cluster-wide queued and then running counts. After every
//! pick the local copy is bumped so that queries arriving before the next
//! monitor tick see the effect of earlier decisions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::health::HealthStatus;
use crate::load_balancer::{BackendDescriptor, ClusterStats, SelectionStrategy, UniformRandom};

/// Strategy-local, mutable view of one cluster's load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStats {
    pub cluster_id: String,
    pub routing_group: String,
    pub running_query_count: u32,
    pub queued_query_count: u32,
    pub status: HealthStatus,
    pub user_queued_count: HashMap<String, u32>,
}

impl From<&ClusterStats> for LocalStats {
    fn from(stats: &ClusterStats) -> Self {
        Self {
            cluster_id: stats.cluster_id.clone(),
            routing_group: stats.routing_group.clone(),
            running_query_count: stats.running_query_count,
            queued_query_count: stats.queued_query_count,
            status: stats.status,
            user_queued_count: stats.user_queued_count.clone().unwrap_or_default(),
        }
    }
}

impl LocalStats {
    fn user_queued(&self, user: &str) -> u32 {
        self.user_queued_count.get(user).copied().unwrap_or(0)
    }

    /// Assume the routed query queues if the user already has queued work
    /// here, otherwise assume it starts running.
    fn record_routed(&mut self, user: &str) {
        let queued = self.user_queued(user);
        if queued > 0 {
            self.user_queued_count.insert(user.to_string(), queued + 1);
        } else {
            self.running_query_count += 1;
        }
    }
}

fn compare_stats(lhs: &LocalStats, rhs: &LocalStats, user: &str) -> Ordering {
    lhs.user_queued(user)
        .cmp(&rhs.user_queued(user))
        .then(lhs.queued_query_count.cmp(&rhs.queued_query_count))
        .then(lhs.running_query_count.cmp(&rhs.running_query_count))
}

/// Per-user queue depth selector.
#[derive(Debug, Default)]
pub struct QueryCountBased {
    cluster_stats: Mutex<Vec<LocalStats>>,
}

impl QueryCountBased {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the local stats, including optimistic updates.
    pub fn local_stats(&self) -> Vec<LocalStats> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LocalStats>> {
        // Stats are plain counters; a panic mid-update leaves them usable.
        self.cluster_stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SelectionStrategy for QueryCountBased {
    fn select(
        &self,
        routing_group: &str,
        candidates: &[BackendDescriptor],
        user: &str,
    ) -> Option<BackendDescriptor> {
        if candidates.is_empty() {
            return None;
        }

        // Selection and the optimistic bump happen under one lock.
        let mut stats = self.lock();

        let known: Vec<&mut LocalStats> = stats
            .iter_mut()
            .filter(|s| s.routing_group == routing_group)
            .filter(|s| candidates.iter().any(|c| c.name == s.cluster_id))
            .collect();

        if known.is_empty() {
            tracing::debug!(
                routing_group = %routing_group,
                "No cluster stats for candidates yet, falling back to random"
            );
            return UniformRandom::pick(candidates);
        }

        let mut least: Option<&mut LocalStats> = None;
        for entry in known.into_iter().filter(|s| s.status.is_healthy()) {
            let replace = match &least {
                None => true,
                // Strictly less keeps the first minimum on ties.
                Some(current) => compare_stats(entry, current, user) == Ordering::Less,
            };
            if replace {
                least = Some(entry);
            }
        }

        let chosen = least?;
        tracing::debug!(
            user = %user,
            routing_group = %routing_group,
            cluster = %chosen.cluster_id,
            user_queued = chosen.user_queued(user),
            queued = chosen.queued_query_count,
            running = chosen.running_query_count,
            "Selected least loaded cluster"
        );
        chosen.record_routed(user);

        let cluster_id = chosen.cluster_id.clone();
        candidates.iter().find(|c| c.name == cluster_id).cloned()
    }

    fn update_cluster_stats(&self, stats: &[ClusterStats]) {
        let fresh: Vec<LocalStats> = stats.iter().map(LocalStats::from).collect();
        *self.lock() = fresh;
    }

    fn name(&self) -> &'static str {
        "query_count"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn backend(name: &str, group: &str) -> BackendDescriptor {
        BackendDescriptor::new(name, group, format!("http://{name}:8080"), name)
    }

    fn healthy(name: &str, group: &str, queued: u32, running: u32) -> ClusterStats {
        ClusterStats::new(name, group)
            .with_status(HealthStatus::Healthy)
            .with_queued(queued)
            .with_running(running)
    }

    #[test]
    fn test_user_queue_takes_precedence() {
        let lb = QueryCountBased::new();
        lb.update_cluster_stats(&[
            healthy("c1", "adhoc", 0, 0).with_user_queued("u1", 4),
            healthy("c2", "adhoc", 50, 50).with_user_queued("u1", 1),
        ]);
        let candidates = vec![backend("c1", "adhoc"), backend("c2", "adhoc")];

        let picked = lb.select("adhoc", &candidates, "u1").unwrap();
        assert_eq!(picked.name, "c2");
    }

    #[test]
    fn test_ties_break_on_cluster_queue_then_running() {
        let lb = QueryCountBased::new();
        // Equal per-user queue counts everywhere.
        lb.update_cluster_stats(&[
            healthy("c1", "etl", 5, 9).with_user_queued("u1", 5),
            healthy("c2", "etl", 5, 3).with_user_queued("u1", 5),
            healthy("c3", "etl", 6, 0).with_user_queued("u1", 5),
        ]);
        let candidates = vec![backend("c1", "etl"), backend("c2", "etl"), backend("c3", "etl")];

        let picked = lb.select("etl", &candidates, "u1").unwrap();
        assert_eq!(picked.name, "c2");
    }

    #[test]
    fn test_first_minimum_wins_on_full_tie() {
        let lb = QueryCountBased::new();
        lb.update_cluster_stats(&[healthy("c1", "etl", 1, 1), healthy("c2", "etl", 1, 1)]);
        let candidates = vec![backend("c1", "etl"), backend("c2", "etl")];

        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c1");
    }

    #[test]
    fn test_optimistic_update_bumps_running_when_user_not_queued() {
        let lb = QueryCountBased::new();
        lb.update_cluster_stats(&[healthy("c1", "etl", 0, 0), healthy("c2", "etl", 0, 0)]);
        let candidates = vec![backend("c1", "etl"), backend("c2", "etl")];

        // c1 first (tie), then c2 because c1 now runs one more.
        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c1");
        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c2");
        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c1");

        let stats = lb.local_stats();
        assert_eq!(stats[0].running_query_count, 2);
        assert_eq!(stats[1].running_query_count, 1);
    }

    #[test]
    fn test_optimistic_update_bumps_user_queue_when_queued() {
        let lb = QueryCountBased::new();
        lb.update_cluster_stats(&[
            healthy("c1", "etl", 0, 0).with_user_queued("u1", 2),
            healthy("c2", "etl", 0, 0).with_user_queued("u1", 3),
        ]);
        let candidates = vec![backend("c1", "etl"), backend("c2", "etl")];

        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c1");
        let stats = lb.local_stats();
        assert_eq!(stats[0].user_queued_count.get("u1"), Some(&3));
        assert_eq!(stats[0].running_query_count, 0);

        // Tied on user queue now, cluster queue equal, running equal: c1 again.
        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c1");
        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c2");
    }

    #[test]
    fn test_refresh_replaces_optimistic_state() {
        let lb = QueryCountBased::new();
        lb.update_cluster_stats(&[healthy("c1", "etl", 0, 0)]);
        let candidates = vec![backend("c1", "etl")];
        lb.select("etl", &candidates, "u1");
        assert_eq!(lb.local_stats()[0].running_query_count, 1);

        lb.update_cluster_stats(&[healthy("c1", "etl", 0, 0)]);
        assert_eq!(lb.local_stats()[0].running_query_count, 0);
    }

    #[test]
    fn test_unhealthy_stats_are_skipped() {
        let lb = QueryCountBased::new();
        lb.update_cluster_stats(&[
            healthy("c1", "etl", 0, 0).with_status(HealthStatus::Unhealthy),
            healthy("c2", "etl", 100, 100),
        ]);
        let candidates = vec![backend("c1", "etl"), backend("c2", "etl")];
        assert_eq!(lb.select("etl", &candidates, "u1").unwrap().name, "c2");
    }

    #[test]
    fn test_no_healthy_stats_in_group_returns_none() {
        let lb = QueryCountBased::new();
        lb.update_cluster_stats(&[
            healthy("c1", "etl", 0, 0).with_status(HealthStatus::Pending),
            healthy("a1", "adhoc", 0, 0),
        ]);
        let candidates = vec![backend("c1", "etl")];
        assert!(lb.select("etl", &candidates, "u1").is_none());
    }

    #[test]
    fn test_missing_stats_falls_back_to_random() {
        let lb = QueryCountBased::new();
        let candidates = vec![backend("c1", "etl"), backend("c2", "etl")];
        let picked = lb.select("etl", &candidates, "u1").unwrap();
        assert!(picked.name == "c1" || picked.name == "c2");
    }

    #[test]
    fn test_concurrent_selects_record_every_pick() {
        const THREADS: u32 = 8;
        const PICKS: u32 = 500;

        let lb = Arc::new(QueryCountBased::new());
        lb.update_cluster_stats(&[
            healthy("c1", "etl", 0, 0),
            healthy("c2", "etl", 0, 0),
            healthy("c3", "etl", 0, 0),
            healthy("c4", "etl", 0, 0),
        ]);
        let candidates = Arc::new(vec![
            backend("c1", "etl"),
            backend("c2", "etl"),
            backend("c3", "etl"),
            backend("c4", "etl"),
        ]);

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let lb = lb.clone();
                let candidates = candidates.clone();
                std::thread::spawn(move || {
                    let user = format!("u{t}");
                    for _ in 0..PICKS {
                        assert!(lb.select("etl", &candidates, &user).is_some());
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let running: Vec<u32> = lb.local_stats().iter().map(|s| s.running_query_count).collect();
        assert_eq!(running.iter().sum::<u32>(), THREADS * PICKS);
        // Each pick goes to a current minimum, so the spread never exceeds one.
        let max = running.iter().max().copied().unwrap();
        let min = running.iter().min().copied().unwrap();
        assert!(max - min <= 1, "unbalanced running counts {running:?}");
    }
}
