use std::ops::Add;
use std::ops::AddAssign;
use std::ops::Sub;
use std::time::Duration;

/// Monotonic simulation time in whole milliseconds.
///
/// Subtraction saturates at zero; ticks never go negative.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Ticks(u64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn millis(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(other.0))
    }

    pub fn to_duration(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Add<Ticks> for Ticks {
    type Output = Ticks;

    fn add(self, rhs: Ticks) -> Ticks {
        Ticks(self.0 + rhs.0)
    }
}

impl Add<u64> for Ticks {
    type Output = Ticks;

    fn add(self, ms: u64) -> Ticks {
        Ticks(self.0 + ms)
    }
}

impl Add<Duration> for Ticks {
    type Output = Ticks;

    fn add(self, d: Duration) -> Ticks {
        Ticks(self.0 + d.as_millis() as u64)
    }
}

impl AddAssign<u64> for Ticks {
    fn add_assign(&mut self, ms: u64) {
        self.0 += ms;
    }
}

impl Sub<Ticks> for Ticks {
    type Output = Ticks;

    fn sub(self, rhs: Ticks) -> Ticks {
        self.saturating_sub(rhs)
    }
}

impl std::fmt::Display for Ticks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The process-wide tick source: a monotonic epoch fixed at startup.
#[derive(Clone, Copy, Debug)]
pub struct GlobalClock {
    epoch: tokio::time::Instant,
}

impl GlobalClock {
    /// Start the clock. Called once per process; every component measures
    /// against the same epoch.
    pub fn start() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> Ticks {
        Ticks(self.epoch.elapsed().as_millis() as u64)
    }

    pub fn advance_by(&self, d: Duration) -> Ticks {
        self.now() + d
    }

    /// The wall deadline for a given tick, for `sleep_until`.
    pub fn instant_at(&self, t: Ticks) -> tokio::time::Instant {
        self.epoch + t.to_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_saturates() {
        let a = Ticks::from_millis(5);
        let b = Ticks::from_millis(20);
        assert_eq!(b - a, Ticks::from_millis(15));
        assert_eq!(a - b, Ticks::ZERO);
        assert_eq!(a.saturating_sub(b), Ticks::ZERO);
    }

    #[test]
    fn addition_takes_ticks_millis_and_durations() {
        let t = Ticks::from_millis(10);
        assert_eq!(t + Ticks::from_millis(5), Ticks::from_millis(15));
        assert_eq!(t + 5u64, Ticks::from_millis(15));
        assert_eq!(t + Duration::from_millis(5), Ticks::from_millis(15));
        assert!(t < t + 1);
    }

    #[tokio::test]
    async fn clock_is_monotonic() {
        let clock = GlobalClock::start();
        let a = clock.now();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.advance_by(Duration::from_millis(50)) >= b + 50u64);
    }
}
