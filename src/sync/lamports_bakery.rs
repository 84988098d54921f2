use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tracing::{debug, trace, warn};

use super::{
    spin::{Spin, Waiter},
    Mutex, MutexGuard,
};
use crate::error::{Error, Result};

/// Largest number of participants a single bakery accepts.
pub const MAX_PARTICIPANTS: usize = 64;

/// Lamport's bakery lock for a fixed set of participants `0..n`.
///
/// Every slot of `choosing` and `tickets` is written only by its own participant, so the
/// decision who enters is made with plain loads and stores. All of them are `SeqCst`: with
/// anything weaker the "choosing" and "ticket" stores can be reordered against other
/// participants' reads and two participants may enter together.
#[derive(Debug)]
pub struct Bakery {
    choosing: Vec<AtomicBool>,
    tickets: Vec<AtomicU64>,
    spin: Spin,
}

/// What a single `acquire_counted` observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub ticket: u64,
    /// Wait iterations spent before entering.
    pub spins: u64,
}

impl Bakery {
    const FREE: u64 = 0;

    pub fn new(n: usize) -> Result<Self> {
        Self::with_spin(n, Spin::default())
    }

    pub fn with_spin(n: usize, spin: Spin) -> Result<Self> {
        if n == 0 || n > MAX_PARTICIPANTS {
            return Err(Error::ParticipantCount(n));
        }
        debug!(participants = n, ?spin, "bakery created");
        Ok(Self {
            choosing: (0..n).map(|_| AtomicBool::new(false)).collect(),
            tickets: (0..n).map(|_| AtomicU64::new(Bakery::FREE)).collect(),
            spin,
        })
    }

    pub fn participants(&self) -> usize {
        self.tickets.len()
    }

    /// Whether any participant holds or is waiting for the lock. Only a snapshot.
    pub fn is_locked(&self) -> bool {
        self.tickets
            .iter()
            .any(|t| t.load(Ordering::SeqCst) != Bakery::FREE)
    }

    /// The ticket participant `id` currently holds, if it is requesting or holding the lock.
    pub fn ticket_of(&self, id: usize) -> Option<u64> {
        self.check(id);
        match self.tickets[id].load(Ordering::SeqCst) {
            Bakery::FREE => None,
            ticket => Some(ticket),
        }
    }

    /// Blocks (spinning) until participant `id` may enter its critical section.
    ///
    /// # Panics
    ///
    /// If `id` is not below [`Bakery::participants`]. Using the same `id` from two threads at
    /// once is not detected.
    pub fn acquire(&self, id: usize) {
        self.acquire_counted(id);
    }

    /// Same as [`Bakery::acquire`], also reporting the drawn ticket and how long it waited.
    pub fn acquire_counted(&self, id: usize) -> Entry {
        self.check(id);
        let mut waiter = self.spin.waiter();
        let ticket = self.draw(id, &mut waiter);

        for (j, (choosing, other)) in self.choosing.iter().zip(&self.tickets).enumerate() {
            if j == id {
                continue;
            }
            // j may be halfway through reading the tickets; its slot is not stable yet
            while choosing.load(Ordering::SeqCst) {
                waiter.wait();
            }
            // Lower (ticket, id) goes first
            loop {
                let theirs = other.load(Ordering::SeqCst);
                if theirs == Bakery::FREE || (ticket, id) < (theirs, j) {
                    break;
                }
                waiter.wait();
            }
        }

        trace!(id, ticket, spins = waiter.spins(), "bakery entered");
        Entry {
            ticket,
            spins: waiter.spins(),
        }
    }

    /// Leaves the critical section entered with `acquire(id)`.
    pub fn release(&self, id: usize) {
        self.check(id);
        self.tickets[id].store(Bakery::FREE, Ordering::SeqCst);
        trace!(id, "bakery released");
    }

    // Doorway: take a ticket larger than every ticket currently visible.
    fn draw(&self, id: usize, waiter: &mut Waiter) -> u64 {
        let mut warned = false;
        loop {
            self.choosing[id].store(true, Ordering::SeqCst);
            let max = self
                .tickets
                .iter()
                .fold(Bakery::FREE, |acc, t| t.load(Ordering::SeqCst).max(acc));

            if let Some(ticket) = max.checked_add(1) {
                self.tickets[id].store(ticket, Ordering::SeqCst);
                self.choosing[id].store(false, Ordering::SeqCst);
                return ticket;
            }

            // Out of tickets: step aside until the current holders drain.
            self.choosing[id].store(false, Ordering::SeqCst);
            if !warned {
                warn!(id, "bakery ticket space exhausted, waiting for holders to drain");
                warned = true;
            }
            waiter.wait();
        }
    }

    fn check(&self, id: usize) {
        assert!(
            id < self.participants(),
            "participant {id} out of range for a bakery of {}",
            self.participants()
        );
    }
}

/// Handle for participant `n` of a shared [`Bakery`].
#[derive(Debug)]
pub struct BakeryN {
    n: usize,
    bakery: Arc<Bakery>,
}

impl BakeryN {
    pub fn new(n: usize, bakery: &Arc<Bakery>) -> Result<Self> {
        if n >= bakery.participants() {
            return Err(Error::ParticipantId {
                id: n,
                n: bakery.participants(),
            });
        }
        Ok(Self {
            n,
            bakery: bakery.clone(),
        })
    }

    /// One handle per participant, in id order.
    pub fn all(bakery: &Arc<Bakery>) -> Vec<Self> {
        (0..bakery.participants())
            .map(|n| Self {
                n,
                bakery: bakery.clone(),
            })
            .collect()
    }

    pub fn id(&self) -> usize {
        self.n
    }
}

impl Mutex for BakeryN {
    fn acquire(&self) -> MutexGuard<'_, Self> {
        self.bakery.acquire(self.n);
        MutexGuard { mutex: self }
    }
    fn release(&self) {
        self.bakery.release(self.n)
    }
}
