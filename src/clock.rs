//! Virtual time source.
//!
//! Every other component reads "now" exclusively through a [`Clock`];
//! nothing in the crate calls `Instant::now()` or `SystemTime::now()`
//! directly outside of this module, so tests can supply a fixed origin
//! and replay a schedule deterministically at any speed factor.

use std::time::{Duration, Instant};

/// A point in virtual time, measured in milliseconds since the clock's
/// origin. Kept as a distinct type so it can't be mixed up with a wall
/// clock `Instant` or a raw millisecond count from somewhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualInstant(pub u64);

impl VirtualInstant {
    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_duration_since(self, earlier: VirtualInstant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Virtual time source driven by a fixed speed factor.
///
/// `virtual_now = origin_virtual + (wall_now - origin_wall) * speed_factor`.
#[derive(Debug, Clone)]
pub struct Clock {
    origin_wall: Instant,
    origin_virtual_ms: u64,
    speed_factor: f64,
}

impl Clock {
    /// Start a clock whose virtual time begins at zero now.
    pub fn start(speed_factor: f64) -> Self {
        Self::with_origin(Instant::now(), 0, speed_factor)
    }

    /// Start a clock at an explicit `(wall, virtual)` origin pair.
    ///
    /// Used by tests to pin virtual time without racing `Instant::now()`.
    pub fn with_origin(origin_wall: Instant, origin_virtual_ms: u64, speed_factor: f64) -> Self {
        // Zero or negative speed would make sleep() divide by zero or
        // run time backwards; clamp to a sane minimum instead of
        // propagating an error for a clearly-misconfigured value.
        let speed_factor = if speed_factor.is_finite() && speed_factor > 0.0 {
            speed_factor
        } else {
            1.0
        };
        Self {
            origin_wall,
            origin_virtual_ms,
            speed_factor,
        }
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualInstant {
        let wall_elapsed = self.origin_wall.elapsed().as_secs_f64();
        let virtual_elapsed_ms = (wall_elapsed * self.speed_factor * 1000.0).max(0.0);
        VirtualInstant(self.origin_virtual_ms + virtual_elapsed_ms as u64)
    }

    /// Suspend the caller for `virtual_duration` of virtual time.
    pub async fn sleep(&self, virtual_duration: Duration) {
        let wall_duration = virtual_duration.div_f64(self.speed_factor);
        tokio::time::sleep(wall_duration).await;
    }

    /// Convert a virtual duration to the wall-clock duration it takes
    /// to elapse at this clock's speed factor.
    pub fn to_wall_duration(&self, virtual_duration: Duration) -> Duration {
        virtual_duration.div_f64(self.speed_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_factor_one_tracks_wall_clock() {
        let origin = Instant::now() - Duration::from_millis(500);
        let clock = Clock::with_origin(origin, 0, 1.0);
        let now = clock.now();
        assert!(now.as_millis() >= 490 && now.as_millis() <= 600);
    }

    #[test]
    fn speed_factor_scales_elapsed_time() {
        let origin = Instant::now() - Duration::from_millis(100);
        let clock = Clock::with_origin(origin, 0, 600.0);
        let now = clock.now();
        // 100ms wall * 600x should be roughly 60s virtual.
        assert!(now.as_millis() >= 50_000);
    }

    #[test]
    fn non_positive_speed_factor_clamps_to_one() {
        let clock = Clock::with_origin(Instant::now(), 0, -5.0);
        assert_eq!(clock.speed_factor(), 1.0);
        let clock = Clock::with_origin(Instant::now(), 0, 0.0);
        assert_eq!(clock.speed_factor(), 1.0);
        let clock = Clock::with_origin(Instant::now(), 0, f64::NAN);
        assert_eq!(clock.speed_factor(), 1.0);
    }

    #[test]
    fn virtual_time_is_monotonic_non_decreasing() {
        let clock = Clock::start(100.0);
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 >= t1);
    }

    #[tokio::test]
    async fn sleep_scales_by_speed_factor() {
        let clock = Clock::start(1000.0);
        let start = Instant::now();
        clock.sleep(Duration::from_secs(1)).await;
        // 1 virtual second at 1000x should take ~1ms wall time.
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
