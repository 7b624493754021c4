//! Property-based tests for the invariants in `spec.md` §8 that
//! quantify over arbitrary values rather than fixed examples.

use proptest::prelude::*;

use bottling_sim::clock::VirtualInstant;
use bottling_sim::domain::MicrostopCode;
use bottling_sim::registers::{RegisterBank, ADDR_ACTUAL_WEIGHT_G, ADDR_GOOD_COUNT};
use bottling_sim::state_machine::{select, StopEpisode};
use bottling_sim::LineState;

const ALL_STATES: [LineState; 9] = [
    LineState::Idle,
    LineState::Running,
    LineState::Microstop,
    LineState::Stopped,
    LineState::Fault,
    LineState::Changeover,
    LineState::Cip,
    LineState::Starved,
    LineState::Blocked,
];

fn state_strategy() -> impl Strategy<Value = LineState> {
    (0usize..ALL_STATES.len()).prop_map(|i| ALL_STATES[i])
}

proptest! {
    /// Register round-trip (invariant 7): any u32 written to the register
    /// bank decodes back exactly.
    #[test]
    fn u32_register_round_trip(value: u32) {
        let bank = RegisterBank::new();
        bank.set_u32(ADDR_GOOD_COUNT, value);
        prop_assert_eq!(bank.get_u32(ADDR_GOOD_COUNT), value);
    }

    /// Register round-trip (invariant 7): any finite f32 written to the
    /// register bank decodes back within 2e-6 relative tolerance.
    #[test]
    fn f32_register_round_trip_within_tolerance(
        value in prop::num::f32::ANY.prop_filter("finite", |v| v.is_finite())
    ) {
        let bank = RegisterBank::new();
        bank.set_f32(ADDR_ACTUAL_WEIGHT_G, value);
        let decoded = bank.get_f32(ADDR_ACTUAL_WEIGHT_G);
        let tolerance = (value.abs() * 2e-6).max(1e-30);
        prop_assert!((decoded - value).abs() <= tolerance || decoded == value);
    }

    /// Precedence correctness (invariant 4): the selected target, when
    /// present, is always the candidate with the lowest precedence rank
    /// (i.e. the highest-precedence state per `spec.md` §4.5).
    #[test]
    fn select_always_returns_highest_precedence_candidate(
        current in state_strategy(),
        candidates in prop::collection::vec(state_strategy(), 0..9)
    ) {
        let best_rank = candidates.iter().map(|s| s.precedence_rank()).min();
        match select(&candidates, current) {
            None => {
                // Either no candidates, or the best candidate is already current.
                if let Some(rank) = best_rank {
                    let best = candidates.iter().copied().find(|s| s.precedence_rank() == rank).unwrap();
                    prop_assert_eq!(best, current);
                }
            }
            Some(target) => {
                prop_assert_eq!(Some(target.precedence_rank()), best_rank);
                prop_assert_ne!(target, current);
            }
        }
    }

    /// Microstop duration bounds (invariant 5): every sampled duration,
    /// for every code and any rng seed, lands in [3, 120] seconds.
    #[test]
    fn microstop_duration_always_within_global_bounds(seed: u64) {
        use rand::rngs::StdRng;
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(seed);
        for code in MicrostopCode::ALL {
            let secs = code.sample_duration_sec(&mut rng);
            prop_assert!((3..=120).contains(&secs));
        }
    }

    /// Stop episode duration is exactly end - start in milliseconds.
    #[test]
    fn stop_episode_duration_is_exact(start in 0u64..1_000_000, extra in 0u64..1_000_000) {
        let end = start + extra;
        let mut episode = StopEpisode::open("MS01", VirtualInstant(start));
        let duration = episode.close(VirtualInstant(end));
        prop_assert_eq!(duration, extra);
    }

    /// Event ordering (invariant 8): consecutive ids drawn from the same
    /// `ulid::Generator`, however many are drawn in a row (and so however
    /// tightly they land within the same millisecond), are strictly
    /// increasing.
    #[test]
    fn ulid_generator_ids_are_strictly_increasing(count in 2usize..200) {
        let mut generator = ulid::Generator::new();
        let mut previous = generator.generate().unwrap_or_else(|_| ulid::Ulid::new());
        for _ in 1..count {
            let next = generator.generate().unwrap_or_else(|_| ulid::Ulid::new());
            prop_assert!(next > previous, "{next} did not sort after {previous}");
            previous = next;
        }
    }
}
