//! Monotonic progress percentage

/// Percentage that only moves forward.
///
/// Samples that would lower the value are ignored, as are all samples after
/// [`freeze`](Self::freeze). The value is always within `0..=100`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressRatchet {
    percent: u8,
    frozen: bool,
}

impl ProgressRatchet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a `completed / estimated` sample.
    ///
    /// Returns the new percentage when it advanced, `None` otherwise. A zero
    /// estimate carries no information and is ignored.
    pub fn observe(&mut self, completed: u64, estimated: u64) -> Option<u8> {
        if self.frozen || estimated == 0 {
            return None;
        }

        let raw = (completed as u128 * 100) / estimated as u128;
        let percent = raw.min(100) as u8;
        if percent > self.percent {
            self.percent = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Jump straight to 100 and freeze
    pub fn force_complete(&mut self) -> Option<u8> {
        if self.frozen {
            return None;
        }
        let advanced = self.percent < 100;
        self.percent = 100;
        self.frozen = true;
        advanced.then_some(100)
    }

    /// Stop accepting samples, keeping the current value
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_decreases() {
        let mut ratchet = ProgressRatchet::new();
        assert_eq!(ratchet.observe(40, 100), Some(40));
        assert_eq!(ratchet.observe(25, 100), None);
        assert_eq!(ratchet.percent(), 40);
        assert_eq!(ratchet.observe(55, 100), Some(55));
    }

    #[test]
    fn test_caps_at_100_and_survives_large_values() {
        let mut ratchet = ProgressRatchet::new();
        assert_eq!(ratchet.observe(u64::MAX, u64::MAX / 2), Some(100));
        assert_eq!(ratchet.percent(), 100);
    }

    #[test]
    fn test_zero_estimate_ignored() {
        let mut ratchet = ProgressRatchet::new();
        assert_eq!(ratchet.observe(10, 0), None);
        assert_eq!(ratchet.percent(), 0);
    }

    #[test]
    fn test_frozen_ignores_samples() {
        let mut ratchet = ProgressRatchet::new();
        ratchet.observe(30, 100);
        ratchet.freeze();
        assert_eq!(ratchet.observe(90, 100), None);
        assert_eq!(ratchet.percent(), 30);
        assert_eq!(ratchet.force_complete(), None);
    }

    #[test]
    fn test_force_complete() {
        let mut ratchet = ProgressRatchet::new();
        ratchet.observe(70, 100);
        assert_eq!(ratchet.force_complete(), Some(100));
        assert!(ratchet.is_frozen());
        assert_eq!(ratchet.percent(), 100);
    }
}
