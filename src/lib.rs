//! Software mutual exclusion without read-modify-write instructions in the entry decision.
//!
//! - [`Bakery`]: Lamport's bakery lock for a fixed set of participants, first come first served.
//! - [`Delegation`]: one server thread runs every critical section submitted by its clients.

pub mod error;
pub mod stress;
pub mod sync;

pub use error::{Error, Result};
pub use sync::delegation::{Builder, Completion, Delegation, ShutdownPolicy};
pub use sync::lamports_bakery::{Bakery, BakeryN, Entry, MAX_PARTICIPANTS};
pub use sync::{Mutex, MutexGuard, Spin};
