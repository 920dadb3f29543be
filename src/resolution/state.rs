//! Resolution State Machine
//!
//! Maps a visible span to a tier. Leaving the current tier requires the span
//! to clear the threshold by the hysteresis fraction, which leaves a dead
//! zone of `2h × T` around each threshold:
//!
//! ```text
//!            Fine          Medium                         Coarse
//!   ──────────────|····|──────────────────────────|····|──────────────► span
//!          Tm(1-h)  Tm(1+h)                 Tc(1-h)  Tc(1+h)
//! ```
//!
//! Switches are additionally rate limited by `min_switch_interval`. Zoom
//! direction, transition progress and the prefetch hint are derived on every
//! call but never influence the tier itself.

use crate::data::{Resolution, MICROS_PER_HOUR, MICROS_PER_MINUTE};
use crate::resolution::error::{ResolutionError, ResolutionResult};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Tuning for tier selection
#[derive(Debug, Clone, PartialEq)]
pub struct StateMachineConfig {
    /// Spans above this use the coarse tier (µs)
    pub coarse_threshold: i64,
    /// Spans below this use the fine tier (µs)
    pub medium_threshold: i64,
    /// Fractional offset applied when leaving a tier
    pub hysteresis: f64,
    /// Minimum wall-clock time between two switches
    pub min_switch_interval: Duration,
    /// Relative span change that counts as zooming
    pub zoom_tolerance: f64,
    /// Transition zone width as a fraction of the threshold
    pub transition_zone: f64,
    /// Prefetch the finer tier within this fraction above its threshold
    pub prefetch_distance: f64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            coarse_threshold: 2 * MICROS_PER_HOUR,
            medium_threshold: MICROS_PER_MINUTE,
            hysteresis: 0.05,
            min_switch_interval: Duration::from_millis(100),
            zoom_tolerance: 0.02,
            transition_zone: 0.20,
            prefetch_distance: 0.35,
        }
    }
}

impl StateMachineConfig {
    /// Check threshold relationships
    pub fn validate(&self) -> ResolutionResult<()> {
        if self.coarse_threshold <= 0 || self.medium_threshold <= 0 {
            return Err(ResolutionError::InvalidConfig(
                "thresholds must be positive".to_string(),
            ));
        }
        if self.medium_threshold > self.coarse_threshold {
            return Err(ResolutionError::InvalidConfig(format!(
                "medium threshold {} exceeds coarse threshold {}",
                self.medium_threshold, self.coarse_threshold
            )));
        }
        if !(0.0..0.5).contains(&self.hysteresis) {
            return Err(ResolutionError::InvalidConfig(format!(
                "hysteresis {} outside [0, 0.5)",
                self.hysteresis
            )));
        }
        for (name, value) in [
            ("zoom_tolerance", self.zoom_tolerance),
            ("transition_zone", self.transition_zone),
            ("prefetch_distance", self.prefetch_distance),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ResolutionError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Clamp thresholds so the whole dataset is always viewed at coarse tier
    pub fn clamp_to_extent(mut self, extent: i64) -> Self {
        if extent > 0 && extent < self.coarse_threshold {
            self.coarse_threshold = extent;
        }
        self.medium_threshold = self.medium_threshold.min(self.coarse_threshold);
        self
    }

    fn threshold_toward_finer(&self, tier: Resolution) -> Option<i64> {
        match tier {
            Resolution::Coarse => Some(self.coarse_threshold),
            Resolution::Medium => Some(self.medium_threshold),
            Resolution::Fine => None,
        }
    }
}

/// Direction of the last zoom gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomDirection {
    In,
    Out,
    Stable,
}

/// Outcome of one tier decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionInfo {
    /// Tier to display
    pub resolution: Resolution,
    /// Span is within the cross-fade zone of a threshold
    pub is_in_transition_zone: bool,
    /// 1.0 at a threshold, 0.0 at the zone edge or beyond
    pub transition_progress: f64,
    pub zoom_direction: ZoomDirection,
    /// Warm the next finer tier now
    pub should_prefetch: bool,
    pub prefetch_resolution: Option<Resolution>,
    /// The tier changed on this decision
    pub changed: bool,
}

/// Hysteresis-based tier selector
#[derive(Debug, Clone)]
pub struct ResolutionStateMachine {
    config: StateMachineConfig,
    current: Resolution,
    last_switch: Option<Instant>,
    last_span: Option<i64>,
    switches: u64,
    suppressed: u64,
}

impl ResolutionStateMachine {
    /// Create a state machine starting at the coarse tier
    pub fn new(config: StateMachineConfig) -> ResolutionResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            current: Resolution::Coarse,
            last_switch: None,
            last_span: None,
            switches: 0,
            suppressed: 0,
        })
    }

    pub fn current(&self) -> Resolution {
        self.current
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    /// Number of tier switches performed
    pub fn switches(&self) -> u64 {
        self.switches
    }

    /// Number of switches held back by the minimum interval
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Return to the initial coarse state
    pub fn reset(&mut self) {
        self.current = Resolution::Coarse;
        self.last_switch = None;
        self.last_span = None;
    }

    /// Tier the span calls for, given where we are now
    pub fn target_for(&self, span: i64) -> Resolution {
        let span = span as f64;
        let h = self.config.hysteresis;
        let tc = self.config.coarse_threshold as f64;
        let tm = self.config.medium_threshold as f64;

        match self.current {
            Resolution::Coarse => {
                if span < tm * (1.0 - h) {
                    Resolution::Fine
                } else if span < tc * (1.0 - h) {
                    Resolution::Medium
                } else {
                    Resolution::Coarse
                }
            }
            Resolution::Medium => {
                if span > tc * (1.0 + h) {
                    Resolution::Coarse
                } else if span < tm * (1.0 - h) {
                    Resolution::Fine
                } else {
                    Resolution::Medium
                }
            }
            Resolution::Fine => {
                if span > tc * (1.0 + h) {
                    Resolution::Coarse
                } else if span > tm * (1.0 + h) {
                    Resolution::Medium
                } else {
                    Resolution::Fine
                }
            }
        }
    }

    /// Classify a span change against the previous observation
    pub fn zoom_direction(&self, span: i64) -> ZoomDirection {
        let Some(previous) = self.last_span else {
            return ZoomDirection::Stable;
        };
        let previous = previous as f64;
        let span = span as f64;
        let tolerance = self.config.zoom_tolerance;

        if span <= previous * (1.0 - tolerance) {
            ZoomDirection::In
        } else if span >= previous * (1.0 + tolerance) {
            ZoomDirection::Out
        } else {
            ZoomDirection::Stable
        }
    }

    /// Proximity to the nearest threshold: (in zone, progress)
    pub fn transition_progress(&self, span: i64) -> (bool, f64) {
        let span = span as f64;
        let zone = self.config.transition_zone;

        let distance = [self.config.coarse_threshold, self.config.medium_threshold]
            .iter()
            .map(|&t| (span - t as f64).abs() / t as f64)
            .fold(f64::INFINITY, f64::min);

        if zone <= 0.0 {
            return (false, 0.0);
        }
        let progress = (1.0 - distance / zone).clamp(0.0, 1.0);
        (distance < zone, progress)
    }

    /// Decide the tier for `span` observed at `now`
    pub fn decide(&mut self, span: i64, now: Instant) -> TransitionInfo {
        let zoom_direction = self.zoom_direction(span);
        let target = self.target_for(span);
        let previous = self.current;

        if target != self.current {
            let too_soon = self
                .last_switch
                .map(|at| now.saturating_duration_since(at) < self.config.min_switch_interval)
                .unwrap_or(false);

            if too_soon {
                self.suppressed += 1;
                tracing::trace!(
                    from = %self.current,
                    to = %target,
                    "Tier switch suppressed by minimum interval"
                );
            } else {
                self.current = target;
                self.last_switch = Some(now);
                self.switches += 1;
            }
        }

        self.last_span = Some(span);

        let (is_in_transition_zone, transition_progress) = self.transition_progress(span);

        let prefetch_resolution = match (zoom_direction, self.config.threshold_toward_finer(self.current)) {
            (ZoomDirection::In, Some(threshold))
                if (span as f64) < threshold as f64 * (1.0 + self.config.prefetch_distance) =>
            {
                self.current.finer()
            }
            _ => None,
        };

        TransitionInfo {
            resolution: self.current,
            is_in_transition_zone,
            transition_progress,
            zoom_direction,
            should_prefetch: prefetch_resolution.is_some(),
            prefetch_resolution,
            changed: self.current != previous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T_COARSE: i64 = 7_200_000_000;
    const T_MEDIUM: i64 = 60_000_000;

    fn machine() -> ResolutionStateMachine {
        ResolutionStateMachine::new(StateMachineConfig {
            min_switch_interval: Duration::ZERO,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_default_thresholds() {
        let config = StateMachineConfig::default();
        assert_eq!(config.coarse_threshold, T_COARSE);
        assert_eq!(config.medium_threshold, T_MEDIUM);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hysteresis_prevents_flicker() {
        let mut sm = machine();
        let now = Instant::now();

        for span in [7_300_000_000, 7_100_000_000, 7_250_000_000, 7_000_000_000] {
            let info = sm.decide(span, now);
            assert_eq!(info.resolution, Resolution::Coarse, "span {}", span);
        }

        // 7.2e9 × 0.95 = 6.84e9
        assert_eq!(sm.decide(6_850_000_000, now).resolution, Resolution::Coarse);
        assert_eq!(sm.decide(6_830_000_000, now).resolution, Resolution::Medium);

        // Coming back needs 7.2e9 × 1.05 = 7.56e9
        assert_eq!(sm.decide(7_500_000_000, now).resolution, Resolution::Medium);
        assert_eq!(sm.decide(7_570_000_000, now).resolution, Resolution::Coarse);
    }

    #[test]
    fn test_medium_fine_band() {
        let mut sm = machine();
        let now = Instant::now();

        assert_eq!(sm.decide(3_600_000_000, now).resolution, Resolution::Medium);
        // 6e7 × 0.95 = 5.7e7
        assert_eq!(sm.decide(58_000_000, now).resolution, Resolution::Medium);
        assert_eq!(sm.decide(56_000_000, now).resolution, Resolution::Fine);
        // 6e7 × 1.05 = 6.3e7
        assert_eq!(sm.decide(62_000_000, now).resolution, Resolution::Fine);
        assert_eq!(sm.decide(64_000_000, now).resolution, Resolution::Medium);
    }

    #[test]
    fn test_direct_jumps() {
        let mut sm = machine();
        let now = Instant::now();

        let info = sm.decide(30_000_000, now);
        assert_eq!(info.resolution, Resolution::Fine);
        assert!(info.changed);

        assert_eq!(sm.decide(10_000_000_000, now).resolution, Resolution::Coarse);
        assert_eq!(sm.switches(), 2);
    }

    #[test]
    fn test_minimum_switch_interval() {
        let mut sm = ResolutionStateMachine::new(StateMachineConfig {
            min_switch_interval: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap();
        let t0 = Instant::now();

        // First switch of the session is never held back
        assert_eq!(sm.decide(3_600_000_000, t0).resolution, Resolution::Medium);

        let first = sm.decide(30_000_000, t0 + Duration::from_millis(10));
        let second = sm.decide(29_000_000, t0 + Duration::from_millis(40));
        assert_eq!(first.resolution, Resolution::Medium);
        assert_eq!(second.resolution, Resolution::Medium);
        assert!(!first.changed && !second.changed);
        assert_eq!(sm.suppressed(), 2);

        let third = sm.decide(29_000_000, t0 + Duration::from_millis(150));
        assert_eq!(third.resolution, Resolution::Fine);
        assert!(third.changed);
    }

    #[test]
    fn test_zoom_direction() {
        let mut sm = machine();
        let now = Instant::now();

        assert_eq!(sm.decide(1_000_000_000, now).zoom_direction, ZoomDirection::Stable);
        assert_eq!(sm.decide(970_000_000, now).zoom_direction, ZoomDirection::In);
        assert_eq!(sm.decide(960_000_000, now).zoom_direction, ZoomDirection::Stable);
        assert_eq!(sm.decide(990_000_000, now).zoom_direction, ZoomDirection::Out);
    }

    #[test]
    fn test_transition_progress() {
        let sm = machine();

        let (in_zone, progress) = sm.transition_progress(T_COARSE);
        assert!(in_zone);
        assert!((progress - 1.0).abs() < 1e-9);

        // 10% away with a 20% zone → halfway
        let (in_zone, progress) = sm.transition_progress(T_COARSE + T_COARSE / 10);
        assert!(in_zone);
        assert!((progress - 0.5).abs() < 1e-9);

        let (in_zone, progress) = sm.transition_progress(T_COARSE / 2);
        assert!(!in_zone);
        assert_eq!(progress, 0.0);
    }

    #[test]
    fn test_prefetch_hint_only_when_zooming_in() {
        let mut sm = machine();
        let now = Instant::now();

        sm.decide(12_000_000_000, now);
        // 9.5e9 < 7.2e9 × 1.35 = 9.72e9, zooming in, still coarse
        let info = sm.decide(9_500_000_000, now);
        assert_eq!(info.resolution, Resolution::Coarse);
        assert!(info.should_prefetch);
        assert_eq!(info.prefetch_resolution, Some(Resolution::Medium));

        // Zooming out inside the same band gives no hint
        let info = sm.decide(9_700_000_000, now);
        assert!(!info.should_prefetch);
        assert_eq!(info.prefetch_resolution, None);
    }

    #[test]
    fn test_no_prefetch_past_fine() {
        let mut sm = machine();
        let now = Instant::now();

        sm.decide(40_000_000, now);
        let info = sm.decide(20_000_000, now);
        assert_eq!(info.resolution, Resolution::Fine);
        assert!(!info.should_prefetch);
    }

    #[test]
    fn test_clamp_to_extent() {
        let config = StateMachineConfig::default().clamp_to_extent(3_600_000_000);
        assert_eq!(config.coarse_threshold, 3_600_000_000);
        assert_eq!(config.medium_threshold, T_MEDIUM);

        let tiny = StateMachineConfig::default().clamp_to_extent(10_000_000);
        assert_eq!(tiny.medium_threshold, 10_000_000);
        assert!(tiny.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let inverted = StateMachineConfig {
            medium_threshold: T_COARSE * 2,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let wide = StateMachineConfig {
            hysteresis: 0.7,
            ..Default::default()
        };
        assert!(ResolutionStateMachine::new(wide).is_err());
    }
}
