//! Worker selection strategies.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::WorkerInfo;

/// Picks one worker for a queue out of the registry's current map.
pub trait WorkerSelector: Send + Sync {
    fn name(&self) -> &'static str;

    fn pick(
        &self,
        workers: &HashMap<String, WorkerInfo>,
        queue: &str,
        exclude_id: Option<&str>,
    ) -> Option<WorkerInfo>;
}

fn collect<'a>(
    workers: &'a HashMap<String, WorkerInfo>,
    queue: &str,
    exclude_id: Option<&str>,
    include_cooling_down: bool,
) -> Vec<&'a WorkerInfo> {
    workers
        .values()
        .filter(|w| Some(w.id.as_str()) != exclude_id)
        .filter(|w| w.is_alive())
        .filter(|w| w.serves_queue(queue))
        .filter(|w| !w.is_full())
        .filter(|w| include_cooling_down || !w.is_cooling_down())
        .collect()
}

/// Cooldown-honoring pass first; when that yields nothing, retry ignoring
/// cooldown so a flapping fleet cannot starve dispatch entirely.
fn candidates<'a>(
    workers: &'a HashMap<String, WorkerInfo>,
    queue: &str,
    exclude_id: Option<&str>,
) -> Vec<&'a WorkerInfo> {
    let strict = collect(workers, queue, exclude_id, false);
    if !strict.is_empty() {
        return strict;
    }
    collect(workers, queue, exclude_id, true)
}

/// Minimum `running_tasks`, ties broken by id.
pub struct LeastLoadSelector;

impl WorkerSelector for LeastLoadSelector {
    fn name(&self) -> &'static str {
        "least-load"
    }

    fn pick(
        &self,
        workers: &HashMap<String, WorkerInfo>,
        queue: &str,
        exclude_id: Option<&str>,
    ) -> Option<WorkerInfo> {
        candidates(workers, queue, exclude_id)
            .into_iter()
            .min_by(|a, b| a.running_tasks.cmp(&b.running_tasks).then_with(|| a.id.cmp(&b.id)))
            .cloned()
    }
}

/// Per-queue cursor over the id-sorted candidate list.
pub struct RoundRobinSelector {
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self { cursors: Mutex::new(HashMap::new()) }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelector for RoundRobinSelector {
    fn name(&self) -> &'static str {
        "rr"
    }

    fn pick(
        &self,
        workers: &HashMap<String, WorkerInfo>,
        queue: &str,
        exclude_id: Option<&str>,
    ) -> Option<WorkerInfo> {
        let mut list = candidates(workers, queue, exclude_id);
        if list.is_empty() {
            return None;
        }
        list.sort_by(|a, b| a.id.cmp(&b.id));

        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(queue.to_string()).or_insert(0);
        if *cursor >= list.len() {
            *cursor = 0;
        }
        let picked = list[*cursor].clone();
        *cursor = (*cursor + 1) % list.len();
        Some(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn fleet() -> HashMap<String, WorkerInfo> {
        let mut map = HashMap::new();
        for (id, load) in [("w1", 2), ("w2", 0), ("w3", 1)] {
            let mut w = WorkerInfo::new(id, "127.0.0.1", 9000);
            w.max_running_tasks = 4;
            w.running_tasks = load;
            map.insert(id.to_string(), w);
        }
        map
    }

    #[test]
    fn least_load_picks_minimum() {
        let picked = LeastLoadSelector.pick(&fleet(), "default", None).unwrap();
        assert_eq!(picked.id, "w2");
    }

    #[test]
    fn full_workers_never_selected() {
        let mut workers = fleet();
        workers.get_mut("w2").unwrap().running_tasks = 4;
        let picked = LeastLoadSelector.pick(&workers, "default", None).unwrap();
        assert_eq!(picked.id, "w3");
    }

    #[test]
    fn exclusion_skips_self() {
        let picked = LeastLoadSelector.pick(&fleet(), "default", Some("w2")).unwrap();
        assert_eq!(picked.id, "w3");
    }

    #[test]
    fn cooldown_honored_until_everyone_cools() {
        let mut workers = fleet();
        workers.get_mut("w2").unwrap().dispatch_cooldown_until =
            Some(Instant::now() + std::time::Duration::from_secs(60));
        let picked = LeastLoadSelector.pick(&workers, "default", None).unwrap();
        assert_eq!(picked.id, "w3");

        for w in workers.values_mut() {
            w.dispatch_cooldown_until = Some(Instant::now() + std::time::Duration::from_secs(60));
        }
        // Relaxed pass: still dispatches rather than starving.
        assert!(LeastLoadSelector.pick(&workers, "default", None).is_some());
    }

    #[test]
    fn round_robin_cycles_sorted_candidates() {
        let selector = RoundRobinSelector::new();
        let workers = fleet();
        let seq: Vec<String> =
            (0..4).map(|_| selector.pick(&workers, "default", None).unwrap().id).collect();
        assert_eq!(seq, vec!["w1", "w2", "w3", "w1"]);
    }

    #[test]
    fn queue_mismatch_yields_none() {
        assert!(LeastLoadSelector.pick(&fleet(), "gpu", None).is_none());
    }
}
