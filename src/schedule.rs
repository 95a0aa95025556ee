//! Learning-rate schedules.
//!
//! [`CustomSchedule`] stitches a linear warm-up and a linear decay into one
//! curve by taking their minimum, evaluated per whole epoch:
//!
//! ```text
//! epoch  = ⌊step / steps_per_epoch⌋
//! warmup = init_lr + (lr_after_warmup - init_lr) / (warmup_epochs - 1) · epoch
//! decay  = max(final_lr, lr_after_warmup
//!              - (epoch - warmup_epochs) · (lr_after_warmup - final_lr) / decay_epochs)
//! rate   = min(warmup, decay)
//! ```
//!
//! Warm-up peaks at epoch `warmup_epochs - 1`; from epoch
//! `warmup_epochs + decay_epochs` on the rate sits at `final_lr`.

use crate::config::ScheduleConfig;

/// Maps an optimizer step to a learning rate.
pub trait LearningRateSchedule {
    fn rate(&self, step: u64) -> f64;
}

/// Warm-up then linear decay, both piecewise by epoch.
#[derive(Debug, Clone)]
pub struct CustomSchedule {
    config: ScheduleConfig,
}

impl CustomSchedule {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Learning rate for a (possibly fractional) epoch value.
    pub fn epoch_rate(&self, epoch: f64) -> f64 {
        let c = &self.config;
        let warmup_epochs = c.warmup_epochs as f64;
        let decay_epochs = c.decay_epochs as f64;

        let warmup_lr =
            c.init_lr + ((c.lr_after_warmup - c.init_lr) / (warmup_epochs - 1.0)) * epoch;
        let decay_lr = f64::max(
            c.final_lr,
            c.lr_after_warmup
                - (epoch - warmup_epochs) * (c.lr_after_warmup - c.final_lr) / decay_epochs,
        );
        f64::min(warmup_lr, decay_lr)
    }
}

impl LearningRateSchedule for CustomSchedule {
    fn rate(&self, step: u64) -> f64 {
        let epoch = step / self.config.steps_per_epoch;
        self.epoch_rate(epoch as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEPS: u64 = 203;

    fn schedule() -> CustomSchedule {
        CustomSchedule::new(ScheduleConfig::default())
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn starts_at_init_lr() {
        let s = schedule();
        assert!(close(s.rate(0), 1e-5));
        // Constant within the first epoch.
        assert!(close(s.rate(STEPS - 1), 1e-5));
    }

    #[test]
    fn peaks_at_last_warmup_epoch() {
        let s = schedule();
        assert!(close(s.rate(14 * STEPS), 1e-3));
        assert!(close(s.rate(15 * STEPS), 1e-3));
        assert!(s.rate(13 * STEPS) < 1e-3);
    }

    #[test]
    fn warmup_is_linear() {
        let s = schedule();
        let step = (1e-3 - 1e-5) / 14.0;
        for epoch in 0..14u64 {
            assert!(close(s.rate(epoch * STEPS), 1e-5 + step * epoch as f64));
        }
    }

    #[test]
    fn clamps_at_final_lr() {
        let s = schedule();
        assert!(close(s.rate(100 * STEPS), 1e-5));
        assert_eq!(s.rate(150 * STEPS), 1e-5);
        assert_eq!(s.rate(10_000 * STEPS), 1e-5);
    }

    #[test]
    fn non_increasing_after_peak() {
        let s = schedule();
        let mut prev = s.rate(14 * STEPS);
        for epoch in 15..120u64 {
            let r = s.rate(epoch * STEPS);
            assert!(r <= prev + 1e-15, "epoch {epoch}: {r} > {prev}");
            prev = r;
        }
    }

    #[test]
    fn midway_through_decay() {
        let s = schedule();
        // epoch 57.5 would be halfway; epoch 57 is 42/85 of the way down.
        let expected = 1e-3 - 42.0 * (1e-3 - 1e-5) / 85.0;
        assert!(close(s.rate(57 * STEPS), expected));
    }

    #[test]
    fn negative_epoch_extrapolates_warmup() {
        let s = schedule();
        assert!(s.epoch_rate(-1.0) < 1e-5);
    }
}
