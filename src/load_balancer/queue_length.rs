//! Weighted selection from cluster queue lengths.
//!
//! # Responsibilities
//! - Turn each routing group's queue lengths into a cumulative weight table
//! - Draw a backend from the table, favouring short queues
//! - Route a user to the cluster where they have the fewest queued queries
//!   when that breakdown is available and not uniform
//!
//! # Weighting
//! ```text
//! sorted ascending by queue length: q0 <= q1 <= ... <= qmax
//! non-maximum backend:  ceil(MAX_WT - q * MAX_WT / qmax)
//! maximum backend:      interpolated between MIN_WT and MAX_WT from
//!                       q0, the second largest queue and the group mean
//! ```
//! When every queue is the same length, running counts are used instead.
//!
//! # Design Decisions
//! - Tables are immutable once built; updates build a fresh map of group
//!   tables and swap it in, so readers never see a half-built table
//! - Writers serialize on one mutex; readers never take it
//! - No weight is ever zero

use arc_swap::ArcSwap;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use crate::load_balancer::{BackendDescriptor, ClusterStats, SelectionStrategy, UniformRandom};
use crate::observability::metrics;

pub const MIN_WT: u64 = 1;
pub const MAX_WT: u64 = 100;

/// Cumulative weight table for one routing group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightTable {
    /// Cumulative weight -> backend owning the bucket ending there.
    buckets: BTreeMap<u64, String>,
    total: u64,
}

impl WeightTable {
    /// Build a table from backend -> queue length. Returns `None` for an
    /// empty input.
    pub fn build(queue_lengths: &HashMap<String, u32>) -> Option<Self> {
        if queue_lengths.is_empty() {
            return None;
        }

        if queue_lengths.len() == 1 {
            let name = queue_lengths.keys().next()?.clone();
            return Some(Self {
                buckets: BTreeMap::from([(MAX_WT, name)]),
                total: MAX_WT,
            });
        }

        let mut sorted: Vec<(&String, u32)> =
            queue_lengths.iter().map(|(name, len)| (name, *len)).collect();
        sorted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let max_queue = sorted[sorted.len() - 1].1;
        let max_weight = weight_for_max_queue(&sorted);

        let mut buckets = BTreeMap::new();
        let mut sum = 0;
        for (name, len) in &sorted[..sorted.len() - 1] {
            let weight = if *len == max_queue {
                max_weight
            } else {
                let fraction = f64::from(*len) * MAX_WT as f64 / f64::from(max_queue);
                ((MAX_WT as f64 - fraction).ceil() as u64).max(MIN_WT)
            };
            sum += weight;
            buckets.insert(sum, (*name).clone());
        }
        sum += max_weight;
        buckets.insert(sum, sorted[sorted.len() - 1].0.clone());

        Some(Self { buckets, total: sum })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Backend owning the first bucket strictly greater than `point`.
    pub fn draw(&self, point: u64) -> Option<&str> {
        self.buckets
            .range((Bound::Excluded(point), Bound::Unbounded))
            .next()
            .map(|(_, name)| name.as_str())
    }

    /// Random weighted pick.
    pub fn pick(&self) -> Option<&str> {
        if self.is_empty() {
            return None;
        }
        let point = rand::thread_rng().gen_range(0..self.total);
        self.draw(point)
    }

    /// Individual (non-cumulative) weight per backend.
    pub fn weights(&self) -> HashMap<String, u64> {
        let mut previous = 0;
        self.buckets
            .iter()
            .map(|(cumulative, name)| {
                let weight = cumulative - previous;
                previous = *cumulative;
                (name.clone(), weight)
            })
            .collect()
    }
}

/// Weight of the backend with the longest queue. `sorted` is ascending and
/// has at least two entries.
fn weight_for_max_queue(sorted: &[(&String, u32)]) -> u64 {
    let buckets = sorted.len();
    let queue_sum: u64 = sorted.iter().map(|(_, len)| u64::from(*len)).sum();
    let equal_distribution = queue_sum / buckets as u64;

    let smallest = u64::from(sorted[0].1);
    let max_queue = u64::from(sorted[buckets - 1].1);
    let last_but_one = if buckets > 2 {
        u64::from(sorted[buckets - 2].1)
    } else {
        smallest
    };

    let weight = if max_queue == 0 {
        MAX_WT
    } else if last_but_one == 0 || last_but_one == max_queue {
        MIN_WT
    } else {
        let last_but_one_weight =
            (MAX_WT as f64 - (last_but_one * MAX_WT) as f64 / max_queue as f64).ceil();
        let fraction = smallest as f64 / max_queue as f64;

        let skewed = last_but_one < equal_distribution
            || (last_but_one > equal_distribution && smallest <= equal_distribution);
        if skewed {
            if smallest == 0 {
                MIN_WT
            } else {
                (fraction * fraction * last_but_one_weight).ceil() as u64
            }
        } else {
            (fraction * last_but_one_weight).ceil() as u64
        }
    };

    weight.max(MIN_WT)
}

/// Routing state for one group, rebuilt as a whole on every change.
#[derive(Debug, Clone, Default)]
struct GroupRouting {
    /// The discriminator the table was built from (queue or running counts).
    queue_lengths: HashMap<String, u32>,
    /// user -> backend -> queued count.
    user_queue_lengths: HashMap<String, HashMap<String, u32>>,
    table: Option<WeightTable>,
}

impl GroupRouting {
    fn new(
        queue_lengths: HashMap<String, u32>,
        user_queue_lengths: HashMap<String, HashMap<String, u32>>,
    ) -> Self {
        let table = WeightTable::build(&queue_lengths);
        Self {
            queue_lengths,
            user_queue_lengths,
            table,
        }
    }

    fn without_inactive(&self, candidates: &[BackendDescriptor]) -> Self {
        let queue_lengths = self
            .queue_lengths
            .iter()
            .filter(|(name, _)| candidates.iter().any(|c| &c.name == *name))
            .map(|(name, len)| (name.clone(), *len))
            .collect();
        Self::new(queue_lengths, self.user_queue_lengths.clone())
    }

    fn has_inactive(&self, candidates: &[BackendDescriptor]) -> bool {
        self.queue_lengths
            .keys()
            .any(|name| !candidates.iter().any(|c| &c.name == name))
    }

    /// The known candidate with the fewest queued queries for `user`, when
    /// the counts are not all equal. Missing entries count as zero.
    fn least_queued_for_user<'a>(
        &self,
        candidates: &'a [BackendDescriptor],
        user: &str,
    ) -> Option<&'a BackendDescriptor> {
        let per_backend = self.user_queue_lengths.get(user)?;
        if per_backend.is_empty() {
            return None;
        }

        let mut least: Option<(&BackendDescriptor, u32)> = None;
        let mut max_count = 0;
        for candidate in candidates
            .iter()
            .filter(|c| self.queue_lengths.contains_key(&c.name))
        {
            let count = per_backend.get(&candidate.name).copied().unwrap_or(0);
            if least.map_or(true, |(_, min)| count < min) {
                least = Some((candidate, count));
            }
            max_count = max_count.max(count);
        }

        match least {
            Some((backend, min)) if min != max_count => Some(backend),
            _ => None,
        }
    }
}

type RoutingTable = HashMap<String, Arc<GroupRouting>>;

/// Weighted queue-length selector.
#[derive(Debug)]
pub struct QueueLengthRouting {
    groups: ArcSwap<RoutingTable>,
    update_lock: Mutex<()>,
}

impl Default for QueueLengthRouting {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueLengthRouting {
    pub fn new() -> Self {
        Self {
            groups: ArcSwap::from_pointee(HashMap::new()),
            update_lock: Mutex::new(()),
        }
    }

    /// Replace the routing table with one built from new queue, running and
    /// per-user counts, each keyed group -> backend.
    pub fn update_routing_table(
        &self,
        queue_lengths: HashMap<String, HashMap<String, u32>>,
        running_lengths: HashMap<String, HashMap<String, u32>>,
        user_queue_lengths: HashMap<String, HashMap<String, HashMap<String, u32>>>,
    ) {
        let _guard = self.lock_updates();
        let mut user_queue_lengths = user_queue_lengths;

        let mut table = RoutingTable::new();
        for (group, queues) in queue_lengths {
            if queues.is_empty() {
                tracing::warn!(routing_group = %group, "No active clusters in routing group");
                continue;
            }

            let min = queues.values().min().copied().unwrap_or(0);
            let max = queues.values().max().copied().unwrap_or(0);
            let discriminator = match running_lengths.get(&group) {
                Some(running) if min == max && queues.len() > 1 => {
                    tracing::debug!(
                        routing_group = %group,
                        queue_length = max,
                        "Queue lengths equal, weighting by running counts"
                    );
                    queues
                        .keys()
                        .map(|name| (name.clone(), running.get(name).copied().unwrap_or(0)))
                        .collect()
                }
                _ => queues,
            };

            let users = user_queue_lengths.remove(&group).unwrap_or_default();
            let routing = GroupRouting::new(discriminator, users);
            if let Some(weight_table) = &routing.table {
                let weights = weight_table.weights();
                for (backend, weight) in &weights {
                    metrics::record_routing_weight(&group, backend, *weight);
                }
                tracing::debug!(routing_group = %group, weights = ?weights, "Rebuilt weight table");
            }
            table.insert(group, Arc::new(routing));
        }

        self.groups.store(Arc::new(table));
    }

    /// Individual weights currently assigned in `routing_group`.
    pub fn weights(&self, routing_group: &str) -> Option<HashMap<String, u64>> {
        let groups = self.groups.load();
        groups
            .get(routing_group)
            .and_then(|g| g.table.as_ref())
            .map(WeightTable::weights)
    }

    /// Queue lengths (or running counts, when queues were equal) the current
    /// table for `routing_group` was built from.
    pub fn queue_lengths(&self, routing_group: &str) -> Option<HashMap<String, u32>> {
        self.groups
            .load()
            .get(routing_group)
            .map(|g| g.queue_lengths.clone())
    }

    fn lock_updates(&self) -> std::sync::MutexGuard<'_, ()> {
        self.update_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop backends that are no longer candidates from the group's table.
    fn prune(&self, routing_group: &str, candidates: &[BackendDescriptor]) -> Option<Arc<GroupRouting>> {
        let current = self.groups.load().get(routing_group).cloned()?;
        if !current.has_inactive(candidates) {
            return Some(current);
        }

        let _guard = self.lock_updates();
        let groups = self.groups.load_full();
        let latest = groups.get(routing_group).cloned()?;
        if !latest.has_inactive(candidates) {
            return Some(latest);
        }

        tracing::debug!(
            routing_group = %routing_group,
            candidates = candidates.len(),
            "Removing inactive backends from weight table"
        );
        let pruned = Arc::new(latest.without_inactive(candidates));
        let mut next = (*groups).clone();
        next.insert(routing_group.to_string(), pruned.clone());
        self.groups.store(Arc::new(next));
        Some(pruned)
    }
}

impl SelectionStrategy for QueueLengthRouting {
    fn select(
        &self,
        routing_group: &str,
        candidates: &[BackendDescriptor],
        user: &str,
    ) -> Option<BackendDescriptor> {
        if candidates.is_empty() {
            return None;
        }

        if let Some(group) = self.prune(routing_group, candidates) {
            if !user.is_empty() {
                if let Some(backend) = group.least_queued_for_user(candidates, user) {
                    tracing::debug!(
                        user = %user,
                        routing_group = %routing_group,
                        backend = %backend.name,
                        "Routing to cluster with least queued queries for user"
                    );
                    return Some(backend.clone());
                }
            }

            if let Some(name) = group.table.as_ref().and_then(WeightTable::pick) {
                if let Some(backend) = candidates.iter().find(|c| c.name == name) {
                    tracing::debug!(
                        routing_group = %routing_group,
                        backend = %backend.name,
                        "Routing to weighted backend"
                    );
                    return Some(backend.clone());
                }
            }
        }

        tracing::debug!(routing_group = %routing_group, "Falling back to random distribution");
        UniformRandom::pick(candidates)
    }

    fn update_cluster_stats(&self, stats: &[ClusterStats]) {
        let mut queue_lengths: HashMap<String, HashMap<String, u32>> = HashMap::new();
        let mut running_lengths: HashMap<String, HashMap<String, u32>> = HashMap::new();
        let mut user_queue_lengths: HashMap<String, HashMap<String, HashMap<String, u32>>> =
            HashMap::new();

        for s in stats.iter().filter(|s| s.is_healthy()) {
            queue_lengths
                .entry(s.routing_group.clone())
                .or_default()
                .insert(s.cluster_id.clone(), s.queued_query_count);
            running_lengths
                .entry(s.routing_group.clone())
                .or_default()
                .insert(s.cluster_id.clone(), s.running_query_count);

            if let Some(per_user) = &s.user_queued_count {
                let group_users = user_queue_lengths.entry(s.routing_group.clone()).or_default();
                for (user, count) in per_user {
                    group_users
                        .entry(user.clone())
                        .or_default()
                        .insert(s.cluster_id.clone(), *count);
                }
            }
        }

        self.update_routing_table(queue_lengths, running_lengths, user_queue_lengths);
    }

    fn name(&self) -> &'static str {
        "queue_length"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;

    fn backends(group: &str, n: usize) -> Vec<BackendDescriptor> {
        (0..n)
            .map(|i| {
                let name = format!("{group}{i}");
                BackendDescriptor::new(&name, group, format!("http://{name}:8080"), "gateway")
            })
            .collect()
    }

    fn stats(group: &str, queued: &[u32], running: &[u32]) -> Vec<ClusterStats> {
        queued
            .iter()
            .zip(running)
            .enumerate()
            .map(|(i, (q, r))| {
                ClusterStats::new(format!("{group}{i}"), group)
                    .with_status(HealthStatus::Healthy)
                    .with_queued(*q)
                    .with_running(*r)
            })
            .collect()
    }

    fn lengths(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(n, l)| (n.to_string(), *l)).collect()
    }

    fn route(lb: &QueueLengthRouting, group: &str, candidates: &[BackendDescriptor], user: &str, n: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let picked = lb.select(group, candidates, user).unwrap();
            *counts.entry(picked.name).or_default() += 1;
        }
        counts
    }

    #[test]
    fn test_single_backend_gets_full_range() {
        let table = WeightTable::build(&lengths(&[("a", 42)])).unwrap();
        assert_eq!(table.total(), MAX_WT);
        assert_eq!(table.draw(0), Some("a"));
        assert_eq!(table.draw(MAX_WT - 1), Some("a"));
    }

    #[test]
    fn test_empty_input_has_no_table() {
        assert!(WeightTable::build(&HashMap::new()).is_none());
    }

    #[test]
    fn test_zero_queues_get_equal_weight() {
        let table = WeightTable::build(&lengths(&[("a", 0), ("b", 0), ("c", 0)])).unwrap();
        let weights = table.weights();
        assert!(weights.values().all(|w| *w == MAX_WT), "{weights:?}");
    }

    #[test]
    fn test_saturated_max_gets_min_weight() {
        // Largest equals second largest.
        let weights = WeightTable::build(&lengths(&[("a", 2), ("b", 5), ("c", 5)]))
            .unwrap()
            .weights();
        assert_eq!(weights["a"], 60);
        assert_eq!(weights["b"], MIN_WT);
        assert_eq!(weights["c"], MIN_WT);
    }

    #[test]
    fn test_overloaded_backend_weight_is_minimal_and_monotonic() {
        let weights = WeightTable::build(&lengths(&[
            ("a", 0),
            ("b", 10),
            ("c", 20),
            ("d", 30),
            ("e", 500),
        ]))
        .unwrap()
        .weights();

        assert_eq!(weights["a"], 100);
        assert_eq!(weights["b"], 98);
        assert_eq!(weights["c"], 96);
        assert_eq!(weights["d"], 94);
        assert_eq!(weights["e"], MIN_WT);
    }

    #[test]
    fn test_max_weight_never_zero() {
        // lb == mean and smallest == 0 would compute a zero weight unclamped.
        let weights = WeightTable::build(&lengths(&[("a", 0), ("b", 5), ("c", 10)]))
            .unwrap()
            .weights();
        assert!(weights["c"] >= MIN_WT);
        assert!(weights["c"] < weights["b"]);
        assert!(weights["b"] < weights["a"]);
    }

    #[test]
    fn test_far_above_backend_weighs_less_than_all_others() {
        let weights = WeightTable::build(&lengths(&[("a", 1), ("b", 2), ("c", 100)]))
            .unwrap()
            .weights();
        assert!(weights["c"] >= MIN_WT);
        assert!(weights["c"] < weights["b"]);
        assert!(weights["c"] < weights["a"]);
    }

    #[test]
    fn test_draw_follows_bucket_boundaries() {
        // a=0 -> 100, b=50 -> 50, c=100 -> interpolated.
        let table = WeightTable::build(&lengths(&[("a", 0), ("b", 50), ("c", 100)])).unwrap();
        let weights = table.weights();
        assert_eq!(table.draw(0), Some("a"));
        assert_eq!(table.draw(weights["a"] - 1), Some("a"));
        assert_eq!(table.draw(weights["a"]), Some("b"));
        assert_eq!(table.draw(table.total() - 1), Some("c"));
        assert_eq!(table.draw(table.total()), None);
    }

    #[test]
    fn test_equal_zero_queues_distribute_uniformly() {
        let lb = QueueLengthRouting::new();
        let candidates = backends("adhoc", 2);
        lb.update_cluster_stats(&stats("adhoc", &[0, 0], &[0, 0]));

        let counts = route(&lb, "adhoc", &candidates, "", 10_000);
        for count in counts.values() {
            assert!((4500..=5500).contains(count), "skewed: {counts:?}");
        }
    }

    #[test]
    fn test_equal_queues_fall_back_to_running_counts() {
        let lb = QueueLengthRouting::new();
        lb.update_cluster_stats(&stats("adhoc", &[3, 3], &[0, 100]));

        assert_eq!(lb.queue_lengths("adhoc").unwrap()["adhoc1"], 100);
        let weights = lb.weights("adhoc").unwrap();
        assert_eq!(weights["adhoc0"], MAX_WT);
        assert_eq!(weights["adhoc1"], MIN_WT);
    }

    #[test]
    fn test_longest_queue_routed_least() {
        let lb = QueueLengthRouting::new();
        let candidates = backends("adhoc", 4);
        lb.update_cluster_stats(&stats("adhoc", &[3, 6, 9, 12], &[0, 0, 0, 0]));

        let requests = 1000;
        let counts = route(&lb, "adhoc", &candidates, "", requests);
        let busiest = counts.get("adhoc3").copied().unwrap_or(0);
        assert!(busiest <= requests / 4, "busiest got {busiest} of {requests}");
        assert_eq!(counts.values().sum::<usize>(), requests);
    }

    #[test]
    fn test_user_queue_routes_to_least_queued() {
        let lb = QueueLengthRouting::new();
        let candidates = backends("adhoc", 2);
        let mut s = stats("adhoc", &[0, 0], &[0, 0]);
        s[0] = s[0].clone().with_user_queued("user", 1);
        s[1] = s[1].clone().with_user_queued("user", 2);
        lb.update_cluster_stats(&s);

        for _ in 0..1000 {
            assert_eq!(lb.select("adhoc", &candidates, "user").unwrap().name, "adhoc0");
        }
    }

    #[test]
    fn test_user_missing_on_cluster_counts_as_zero() {
        let lb = QueueLengthRouting::new();
        let candidates = backends("adhoc", 2);
        let mut s = stats("adhoc", &[0, 0], &[0, 0]);
        s[0] = s[0].clone().with_user_queued("user", 1);
        lb.update_cluster_stats(&s);

        for _ in 0..1000 {
            assert_eq!(lb.select("adhoc", &candidates, "user").unwrap().name, "adhoc1");
        }
    }

    #[test]
    fn test_uniform_user_queue_uses_weights() {
        let lb = QueueLengthRouting::new();
        let candidates = backends("adhoc", 2);
        let mut s = stats("adhoc", &[0, 0], &[0, 0]);
        s[0] = s[0].clone().with_user_queued("user", 2);
        s[1] = s[1].clone().with_user_queued("user", 2);
        lb.update_cluster_stats(&s);

        let counts = route(&lb, "adhoc", &candidates, "user", 10_000);
        for count in counts.values() {
            assert!((4500..=5500).contains(count), "skewed: {counts:?}");
        }
    }

    #[test]
    fn test_inactive_backends_pruned_from_table() {
        let lb = QueueLengthRouting::new();
        let all = backends("adhoc", 3);
        lb.update_cluster_stats(&stats("adhoc", &[0, 0, 0], &[0, 0, 0]));

        let active = &all[..2];
        let counts = route(&lb, "adhoc", active, "", 500);
        assert!(!counts.contains_key("adhoc2"));
        assert!(!lb.weights("adhoc").unwrap().contains_key("adhoc2"));
    }

    #[test]
    fn test_missing_table_falls_back_to_random() {
        let lb = QueueLengthRouting::new();
        let candidates = backends("etl", 2);
        let counts = route(&lb, "etl", &candidates, "u1", 1000);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_unhealthy_stats_excluded_from_table() {
        let lb = QueueLengthRouting::new();
        let mut s = stats("adhoc", &[0, 0], &[0, 0]);
        s[1].status = HealthStatus::Unhealthy;
        lb.update_cluster_stats(&s);
        let weights = lb.weights("adhoc").unwrap();
        assert_eq!(weights.len(), 1);
        assert!(weights.contains_key("adhoc0"));
    }

    #[test]
    fn test_readers_see_complete_tables_during_updates() {
        let lb = Arc::new(QueueLengthRouting::new());
        let candidates = Arc::new(backends("adhoc", 5));
        lb.update_cluster_stats(&stats("adhoc", &[1, 2, 3, 4, 5], &[0; 5]));

        let writer = {
            let lb = lb.clone();
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    lb.update_cluster_stats(&stats("adhoc", &[i, i + 1, i * 2, 7, 0], &[0; 5]));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                let candidates = candidates.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let picked = lb.select("adhoc", &candidates, "").unwrap();
                        assert!(candidates.iter().any(|c| c.name == picked.name));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
