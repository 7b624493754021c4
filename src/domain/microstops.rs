//! The microstop library: MS01..MS10 definitions.
//!
//! Each entry is a `{code, duration_range_sec, applied_signals,
//! fingerprint_fields}` record per `spec.md` §4.7. Durations are drawn
//! uniformly from the range and clamped to
//! `[MICROSTOP_MIN_SEC, MICROSTOP_MAX_SEC]`.

use rand::Rng;

use crate::constants::{MICROSTOP_MAX_SEC, MICROSTOP_MIN_SEC};

/// One of the ten defined microstop kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicrostopCode {
    Ms01,
    Ms02,
    Ms03,
    Ms04,
    Ms05,
    Ms06,
    Ms07,
    Ms08,
    Ms09,
    Ms10,
}

impl MicrostopCode {
    pub const ALL: [MicrostopCode; 10] = [
        MicrostopCode::Ms01,
        MicrostopCode::Ms02,
        MicrostopCode::Ms03,
        MicrostopCode::Ms04,
        MicrostopCode::Ms05,
        MicrostopCode::Ms06,
        MicrostopCode::Ms07,
        MicrostopCode::Ms08,
        MicrostopCode::Ms09,
        MicrostopCode::Ms10,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MicrostopCode::Ms01 => "MS01",
            MicrostopCode::Ms02 => "MS02",
            MicrostopCode::Ms03 => "MS03",
            MicrostopCode::Ms04 => "MS04",
            MicrostopCode::Ms05 => "MS05",
            MicrostopCode::Ms06 => "MS06",
            MicrostopCode::Ms07 => "MS07",
            MicrostopCode::Ms08 => "MS08",
            MicrostopCode::Ms09 => "MS09",
            MicrostopCode::Ms10 => "MS10",
        }
    }

    /// `(min, max)` duration range in seconds, per `spec.md` §4.7's table.
    pub fn duration_range_sec(self) -> (u64, u64) {
        match self {
            MicrostopCode::Ms01 => (6, 25),
            MicrostopCode::Ms02 => (8, 40),
            MicrostopCode::Ms03 => (5, 20),
            MicrostopCode::Ms04 => (10, 50),
            MicrostopCode::Ms05 => (12, 60),
            MicrostopCode::Ms06 => (10, 90),
            MicrostopCode::Ms07 => (8, 45),
            MicrostopCode::Ms08 => (5, 30),
            MicrostopCode::Ms09 => (8, 35),
            MicrostopCode::Ms10 => (15, 120),
        }
    }

    /// Draw a duration uniformly from this code's range, clamped to
    /// the global microstop bounds.
    pub fn sample_duration_sec(self, rng: &mut impl Rng) -> u64 {
        let (min, max) = self.duration_range_sec();
        let sampled = rng.gen_range(min..=max);
        sampled.clamp(MICROSTOP_MIN_SEC, MICROSTOP_MAX_SEC)
    }

    /// Per-tick Bernoulli trigger rate, tuned so the aggregate weekly
    /// distribution of this kind roughly matches a realistic bottling
    /// line (rarer codes get a lower rate). Expressed per 100ms tick.
    pub fn tick_trigger_probability(self) -> f64 {
        match self {
            MicrostopCode::Ms01 => 0.00006,
            MicrostopCode::Ms02 => 0.00004,
            MicrostopCode::Ms03 => 0.00005,
            MicrostopCode::Ms04 => 0.00003,
            MicrostopCode::Ms05 => 0.00002,
            MicrostopCode::Ms06 => 0.00002,
            MicrostopCode::Ms07 => 0.00003,
            MicrostopCode::Ms08 => 0.00004,
            MicrostopCode::Ms09 => 0.00003,
            MicrostopCode::Ms10 => 0.00001,
        }
    }
}

/// The fingerprint captured at episode entry, one variant per code,
/// each with typed fields, replacing a free-form dictionary per the
/// corresponding Design Note in `spec.md` §9.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "stopCode")]
pub enum Fingerprint {
    #[serde(rename = "MS01")]
    Ms01 {
        bottle_presence: bool,
        infeed_rate_bpm_x10: u16,
    },
    #[serde(rename = "MS02")]
    Ms02 {
        scale_stable: bool,
        fill_time_delta_ms: f32,
    },
    #[serde(rename = "MS03")]
    Ms03 {
        drip_sensor: bool,
        post_fill_delay_ms: u16,
    },
    #[serde(rename = "MS04")]
    Ms04 { cap_feed_ok: bool },
    #[serde(rename = "MS05")]
    Ms05 {
        torque_in_spec_toggle_count: u16,
    },
    #[serde(rename = "MS06")]
    Ms06 { rezero_active: bool },
    #[serde(rename = "MS07")]
    Ms07 {
        label_sensor_ok_toggles: u16,
    },
    #[serde(rename = "MS08")]
    Ms08 { rescan_count: u16 },
    #[serde(rename = "MS09")]
    Ms09 { pusher_cycle_ms: f32 },
    #[serde(rename = "MS10")]
    Ms10 {
        outfeed_full: bool,
        line_speed_dip_pct_x10: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn sampled_durations_are_within_global_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for code in MicrostopCode::ALL {
            for _ in 0..200 {
                let d = code.sample_duration_sec(&mut rng);
                assert!(d >= MICROSTOP_MIN_SEC && d <= MICROSTOP_MAX_SEC);
            }
        }
    }

    #[test]
    fn every_code_has_distinct_string() {
        let mut seen = std::collections::HashSet::new();
        for code in MicrostopCode::ALL {
            assert!(seen.insert(code.as_str()));
        }
    }

    #[test]
    fn fingerprint_serializes_with_stop_code_tag() {
        let fp = Fingerprint::Ms02 {
            scale_stable: false,
            fill_time_delta_ms: 120.0,
        };
        let json = serde_json::to_value(&fp).unwrap();
        assert_eq!(json["stopCode"], "MS02");
        assert_eq!(json["scale_stable"], false);
    }
}
