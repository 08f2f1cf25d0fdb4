use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastActive,
    Random,
    WeightedRoundRobin,
}

impl Strategy {
    /// Parses the configuration name; unknown values fall back to
    /// round-robin.
    pub fn from_name(name: &str) -> Self {
        match name {
            "least_connections" | "least_active" => Strategy::LeastActive,
            "random" => Strategy::Random,
            "weighted" | "weighted_round_robin" => Strategy::WeightedRoundRobin,
            _ => Strategy::RoundRobin,
        }
    }
}

/// What the balancer needs to know about a worker to pick one.
#[derive(Clone, Copy, Debug)]
pub struct WorkerView {
    pub index: usize,
    pub active_jobs: usize,
    pub total_jobs: u64,
    pub success_jobs: u64,
}

#[derive(Debug)]
pub struct LoadBalancer {
    strategy: Strategy,
    next: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            next: AtomicUsize::new(0),
        }
    }

    pub fn select(&self, workers: &[WorkerView]) -> Option<usize> {
        if workers.is_empty() {
            return None;
        }
        let picked = match self.strategy {
            Strategy::RoundRobin => {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                workers[n % workers.len()].index
            }
            Strategy::LeastActive => {
                workers
                    .iter()
                    .min_by_key(|w| w.active_jobs)
                    .map(|w| w.index)?
            }
            Strategy::Random => {
                let i = rand::thread_rng().gen_range(0..workers.len());
                workers[i].index
            }
            Strategy::WeightedRoundRobin => self.select_weighted(workers),
        };
        Some(picked)
    }

    /// Weight is the success rate scaled to 100, with 100 as the default
    /// when a worker has no history yet. Weights recompute on every call.
    fn select_weighted(&self, workers: &[WorkerView]) -> usize {
        let weights: Vec<u64> = workers
            .iter()
            .map(|w| {
                if w.total_jobs == 0 {
                    100
                } else {
                    (w.success_jobs * 100 / w.total_jobs).max(1)
                }
            })
            .collect();
        let total: u64 = weights.iter().sum();
        if total == 0 {
            return workers[0].index;
        }
        let mut pick = rand::thread_rng().gen_range(0..total);
        for (w, weight) in workers.iter().zip(&weights) {
            if pick < *weight {
                return w.index;
            }
            pick -= weight;
        }
        workers[0].index
    }
}
