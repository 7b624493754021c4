//! The breakdown library: major breakdowns BD-M1..BD-M3 and generic
//! minor (operator-coded) stops, per `spec.md` §4.8.

use rand::Rng;

/// One of the three major breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorBreakdown {
    /// Filler Scale: forces fault_code=1, disables fill stabilisation.
    BdM1,
    /// Capper Torque Sensor: forces fault_code=2, invalidates torque readings.
    BdM2,
    /// Checkweigher Loadcell: forces fault_code=3, keeps rezero_active=true.
    BdM3,
}

impl MajorBreakdown {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "BD-M1" => Some(Self::BdM1),
            "BD-M2" => Some(Self::BdM2),
            "BD-M3" => Some(Self::BdM3),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MajorBreakdown::BdM1 => "BD-M1",
            MajorBreakdown::BdM2 => "BD-M2",
            MajorBreakdown::BdM3 => "BD-M3",
        }
    }

    /// Register `fault_code` value for this breakdown.
    pub fn fault_code(self) -> u16 {
        match self {
            MajorBreakdown::BdM1 => 1,
            MajorBreakdown::BdM2 => 2,
            MajorBreakdown::BdM3 => 3,
        }
    }

    /// Nominal duration of ~60 minutes, drawn +-10%.
    pub fn sample_duration_sec(self, rng: &mut impl Rng) -> u64 {
        let nominal = 3600u64;
        let jitter = rng.gen_range(-0.10f64..=0.10);
        (nominal as f64 * (1.0 + jitter)).round() as u64
    }
}

/// The ten minor, operator-coded stop codes: 5-20 minute STOPPED
/// episodes with no fault latch. Unlike a microstop, a minor stop's
/// `stop_code` is always the one named by its scheduled
/// `BlockPayload::Breakdown` block, never sampled by the tick loop.
pub const MINOR_BREAKDOWN_CODES: [&str; 10] = [
    "ST01", "ST02", "ST03", "ST04", "ST05", "ST06", "ST07", "ST08", "ST09", "ST10",
];

/// Duration of a minor breakdown, uniform over 5-20 minutes.
pub fn minor_breakdown_duration_sec(rng: &mut impl Rng) -> u64 {
    rng.gen_range(300..=1200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn from_code_round_trips() {
        for bd in [MajorBreakdown::BdM1, MajorBreakdown::BdM2, MajorBreakdown::BdM3] {
            assert_eq!(MajorBreakdown::from_code(bd.as_str()), Some(bd));
        }
        assert_eq!(MajorBreakdown::from_code("BD-M9"), None);
    }

    #[test]
    fn duration_within_tolerance_of_one_hour() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let d = MajorBreakdown::BdM1.sample_duration_sec(&mut rng);
            assert!(d >= 3240 && d <= 3960, "duration {d} out of +-10% band");
        }
    }

    #[test]
    fn minor_breakdown_duration_in_5_to_20_minutes() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let d = minor_breakdown_duration_sec(&mut rng);
            assert!(d >= 300 && d <= 1200);
        }
    }

    #[test]
    fn fault_codes_match_register_contract() {
        assert_eq!(MajorBreakdown::BdM1.fault_code(), 1);
        assert_eq!(MajorBreakdown::BdM2.fault_code(), 2);
        assert_eq!(MajorBreakdown::BdM3.fault_code(), 3);
    }
}
