use crossbeam_utils::Backoff;

/// How a spinning waiter pauses between two reads of a shared slot.
///
/// The policy only decides how long to pause. Every iteration still re-reads the slots with
/// the ordering the caller chose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Spin {
    /// `std::hint::spin_loop`, never gives up the processor.
    Hint,
    /// `std::thread::yield_now` on every iteration. Required under cooperative schedulers.
    #[default]
    Yield,
    /// Exponential backoff that falls back to yielding once saturated.
    Backoff,
}

impl Spin {
    pub(crate) fn waiter(self) -> Waiter {
        Waiter {
            spin: self,
            backoff: Backoff::new(),
            spins: 0,
        }
    }
}

impl std::str::FromStr for Spin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hint" => Ok(Spin::Hint),
            "yield" => Ok(Spin::Yield),
            "backoff" => Ok(Spin::Backoff),
            _ => Err(format!("unknown spin policy `{s}`, expected hint|yield|backoff")),
        }
    }
}

/// Per-acquire wait state. Counts iterations so callers can bound waiting time.
pub(crate) struct Waiter {
    spin: Spin,
    backoff: Backoff,
    spins: u64,
}

impl Waiter {
    pub(crate) fn wait(&mut self) {
        self.spins += 1;
        match self.spin {
            Spin::Hint => std::hint::spin_loop(),
            Spin::Yield => std::thread::yield_now(),
            Spin::Backoff => self.backoff.snooze(),
        }
    }

    pub(crate) fn spins(&self) -> u64 {
        self.spins
    }
}

#[cfg(test)]
mod tests {
    use super::Spin;

    #[test]
    fn counts_every_wait() {
        for spin in [Spin::Hint, Spin::Yield, Spin::Backoff] {
            let mut w = spin.waiter();
            (0..10).for_each(|_| w.wait());
            assert_eq!(w.spins(), 10);
        }
    }

    #[test]
    fn parses_names() {
        assert_eq!("hint".parse::<Spin>(), Ok(Spin::Hint));
        assert_eq!("yield".parse::<Spin>(), Ok(Spin::Yield));
        assert_eq!("backoff".parse::<Spin>(), Ok(Spin::Backoff));
        assert!("busy".parse::<Spin>().is_err());
        assert_eq!(Spin::default(), Spin::Yield);
    }
}
