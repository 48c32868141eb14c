use super::*;

/// `1 - e^(-x)`, numerically stable. Zero at x=0, saturating to 1.0.
fn exponential_saturation(x: f64) -> f64 {
    // Past this ratio `e^(-x)` is below f64 epsilon and the result rounds
    // to exactly 1.0.
    -(-x.min(36.0)).exp_m1()
}

/// Exponentially decaying events-per-second estimate. Each recorded batch
/// is blended against the existing value with a weight derived from the
/// time elapsed since the previous sample; reading between samples decays
/// toward zero.
#[derive(Debug, Clone)]
pub(crate) struct DecayingRate {
    value: f64,
    window: Duration,
    last_update: Instant,
}

impl DecayingRate {
    pub(crate) fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub(crate) fn starting_at(window: Duration, start: Instant) -> Self {
        assert!(!window.is_zero(), "window must be non-zero");

        Self {
            value: 0.0,
            window,
            last_update: start,
        }
    }

    pub(crate) fn record(&mut self, count: f64, now: Instant) {
        let elapsed = now
            .checked_duration_since(self.last_update)
            .unwrap_or_default()
            .as_secs_f64();

        if elapsed <= 0.0 {
            return;
        }

        let decay_factor = exponential_saturation(elapsed / self.window.as_secs_f64());
        let normalizer = 1.0 + decay_factor;

        self.value = (self.value + (count / elapsed) * decay_factor) / normalizer;
        self.last_update = now;
    }

    pub(crate) fn value_at(&self, now: Instant) -> f64 {
        let elapsed = now
            .checked_duration_since(self.last_update)
            .unwrap_or_default()
            .as_secs_f64();

        if elapsed <= 0.0 {
            return self.value;
        }

        self.value * (1.0 - exponential_saturation(elapsed / self.window.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[test]
    fn starts_at_zero() {
        let start = Instant::now();
        let rate = DecayingRate::starting_at(WINDOW, start);
        assert_eq!(rate.value_at(start), 0.0);
    }

    #[test]
    fn steady_events_approach_the_true_rate() {
        let start = Instant::now();
        let mut rate = DecayingRate::starting_at(WINDOW, start);

        // One event per second for two windows.
        for second in 1..=600 {
            rate.record(1.0, start + Duration::from_secs(second));
        }

        let value = rate.value_at(start + Duration::from_secs(600));
        assert!(
            (value - 1.0).abs() < 0.2,
            "expected ~1 event/s, got {value}"
        );
    }

    #[test]
    fn value_decays_when_events_stop() {
        let start = Instant::now();
        let mut rate = DecayingRate::starting_at(WINDOW, start);

        for second in 1..=300 {
            rate.record(1.0, start + Duration::from_secs(second));
        }

        let active = rate.value_at(start + Duration::from_secs(300));
        let idle = rate.value_at(start + Duration::from_secs(1500));

        assert!(idle < active / 2.0, "active {active}, idle {idle}");
    }

    #[test]
    fn samples_at_the_same_instant_are_ignored() {
        let start = Instant::now();
        let mut rate = DecayingRate::starting_at(WINDOW, start);

        rate.record(1.0, start);

        assert_eq!(rate.value_at(start), 0.0);
    }

    #[test]
    fn never_negative() {
        let start = Instant::now();
        let mut rate = DecayingRate::starting_at(WINDOW, start);
        rate.record(3.0, start + Duration::from_secs(10));

        for second in [20u64, 500, 5000] {
            assert!(rate.value_at(start + Duration::from_secs(second)) >= 0.0);
        }
    }
}
