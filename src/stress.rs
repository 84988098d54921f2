//! Counter stress runs used by the `softmutex` binary and the tests.
//!
//! Every run has `threads` workers each doing `ops_per_thread` protected increments of a shared
//! counter. The increment is a separate load and store, so any overlap inside the lock shows up
//! as a lost update.

use std::hint::black_box;
use std::panic;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::error::Result;
use crate::sync::{delegation::Delegation, lamports_bakery::Bakery, Spin};

pub const THREAD_COUNTS: [usize; 4] = [1, 2, 4, 8];

/// Critical-section workloads of the full benchmark matrix.
pub const WORKLOADS: [usize; 4] = [0, 10, 100, 1000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub threads: usize,
    pub ops_per_thread: usize,
    /// Busy iterations inside the critical section.
    pub work: usize,
    /// Upper bound of random busy iterations between two operations.
    pub outside_work: usize,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 10_000,
            work: 0,
            outside_work: 0,
        }
    }
}

impl Workload {
    pub fn expected(&self) -> u64 {
        (self.threads as u64).saturating_mul(self.ops_per_thread as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub counter: u64,
    pub expected: u64,
    /// Most workers ever seen inside the critical section at once.
    pub max_inside: usize,
    /// Longest single wait, in spin iterations. Always zero for delegation.
    pub max_spins: u64,
    pub elapsed: Duration,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.counter == self.expected && self.max_inside <= 1
    }

    pub fn throughput(&self) -> f64 {
        self.expected as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

#[derive(Default)]
struct Shared {
    counter: AtomicU64,
    inside: AtomicUsize,
    max_inside: AtomicUsize,
}

impl Shared {
    fn critical_section(&self, work: usize) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);

        let c = self.counter.load(Ordering::Relaxed);
        busy(work);
        self.counter.store(c + 1, Ordering::Relaxed);

        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    fn report(&self, w: &Workload, max_spins: u64, elapsed: Duration) -> Report {
        Report {
            counter: self.counter.load(Ordering::SeqCst),
            expected: w.expected(),
            max_inside: self.max_inside.load(Ordering::SeqCst),
            max_spins,
            elapsed,
        }
    }
}

fn busy(iters: usize) {
    let mut acc = 0usize;
    for i in 0..iters {
        acc = black_box(acc.wrapping_add(i));
    }
    black_box(acc);
}

fn outside(rng: &mut impl Rng, bound: usize) {
    if bound > 0 {
        busy(rng.gen_range(0..=bound));
    }
}

pub fn run_bakery(w: &Workload, spin: Spin) -> Result<Report> {
    let mu = Arc::new(Bakery::with_spin(w.threads, spin)?);
    let shared = Arc::new(Shared::default());
    let max_spins = Arc::new(AtomicU64::new(0));
    debug!(?w, ?spin, "bakery run starting");

    let start = Instant::now();
    let ths = (0..w.threads)
        .map(|id| {
            let (w, mu, shared, max_spins) = (*w, mu.clone(), shared.clone(), max_spins.clone());
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut longest = 0;
                for _ in 0..w.ops_per_thread {
                    let entry = mu.acquire_counted(id);
                    shared.critical_section(w.work);
                    mu.release(id);
                    longest = longest.max(entry.spins);
                    outside(&mut rng, w.outside_work);
                }
                max_spins.fetch_max(longest, Ordering::Relaxed);
            })
        })
        .collect::<Vec<_>>();
    ths.into_iter()
        .for_each(|th| th.join().unwrap_or_else(|e| panic::resume_unwind(e)));
    let elapsed = start.elapsed();

    let report = shared.report(w, max_spins.load(Ordering::Relaxed), elapsed);
    info!(threads = w.threads, work = w.work, ?elapsed, passed = report.passed(), "bakery run");
    Ok(report)
}

pub fn run_delegation(w: &Workload) -> Result<Report> {
    let d = Arc::new(Delegation::new()?);
    let shared = Arc::new(Shared::default());
    debug!(?w, "delegation run starting");

    let start = Instant::now();
    let ths = (0..w.threads)
        .map(|_| {
            let (w, d, shared) = (*w, d.clone(), shared.clone());
            std::thread::spawn(move || -> Result<()> {
                let mut rng = rand::thread_rng();
                for _ in 0..w.ops_per_thread {
                    let shared = shared.clone();
                    d.delegate(move || shared.critical_section(w.work))?;
                    outside(&mut rng, w.outside_work);
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();
    for th in ths {
        th.join().unwrap_or_else(|e| panic::resume_unwind(e))?;
    }
    let elapsed = start.elapsed();
    d.shutdown();

    let report = shared.report(w, 0, elapsed);
    info!(threads = w.threads, work = w.work, ?elapsed, passed = report.passed(), "delegation run");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use crate::stress::{run_bakery, run_delegation, Workload, THREAD_COUNTS};
    use crate::sync::Spin;
    use rand::Rng;

    #[test]
    fn bakery_four_by_ten_thousand() {
        let w = Workload {
            threads: 4,
            ops_per_thread: 10_000,
            ..Workload::default()
        };
        let report = run_bakery(&w, Spin::Yield).unwrap();
        assert_eq!(report.counter, 40_000);
        assert_eq!(report.max_inside, 1);
        assert!(report.passed());
    }

    #[test]
    fn every_thread_count_passes() {
        for threads in THREAD_COUNTS {
            let w = Workload {
                threads,
                ops_per_thread: 1_000,
                work: 10,
                outside_work: 20,
            };
            let bakery = run_bakery(&w, Spin::Backoff).unwrap();
            assert!(bakery.passed(), "bakery {bakery:?}");
            let delegation = run_delegation(&w).unwrap();
            assert!(delegation.passed(), "delegation {delegation:?}");
            assert_eq!(delegation.max_spins, 0);
        }
    }

    #[test]
    fn random_shapes() {
        let mut rng = rand::thread_rng();
        for _ in 0..4 {
            let w = Workload {
                threads: rng.gen_range(1..=8),
                ops_per_thread: rng.gen_range(1..=500),
                work: rng.gen_range(0..=100),
                outside_work: rng.gen_range(0..=100),
            };
            assert_eq!(run_bakery(&w, Spin::Yield).unwrap().counter, w.expected());
            assert_eq!(run_delegation(&w).unwrap().counter, w.expected());
        }
    }

    #[test]
    fn eight_threads_wait_is_bounded() {
        let w = Workload {
            threads: 8,
            ops_per_thread: 2_000,
            work: 10,
            outside_work: 10,
        };
        let report = run_bakery(&w, Spin::Yield).unwrap();
        assert!(report.passed(), "{report:?}");
        assert!(report.max_spins < 10_000_000, "{report:?}");
    }

    #[test]
    fn expected_saturates() {
        let w = Workload {
            threads: usize::MAX,
            ops_per_thread: usize::MAX,
            ..Workload::default()
        };
        assert_eq!(w.expected(), u64::MAX);
        assert_eq!(Workload::default().expected(), 40_000);
    }

    #[test]
    fn too_many_threads_for_bakery() {
        let w = Workload {
            threads: 65,
            ..Workload::default()
        };
        assert!(run_bakery(&w, Spin::Yield).is_err());
    }
}
