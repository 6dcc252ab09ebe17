use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Lane index for an origin stream.
///
/// FxHash is unseeded, so the same stream id maps to the same lane for a
/// given lane count on every run.
pub fn lane_for(stream_id: &str, lanes: usize) -> usize {
    let mut hasher = FxHasher::default();
    stream_id.hash(&mut hasher);
    (hasher.finish() % lanes.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_lane_takes_everything() {
        assert_eq!(lane_for("Order-1", 1), 0);
        assert_eq!(lane_for("", 1), 0);
        assert_eq!(lane_for("Order-1", 0), 0);
    }

    #[test]
    fn streams_spread_over_lanes() {
        let used: std::collections::HashSet<usize> =
            (0..64).map(|i| lane_for(&format!("Order-{i}"), 4)).collect();
        assert_eq!(used.len(), 4);
    }

    proptest! {
        #[test]
        fn assignment_is_stable_and_in_range(
            stream_id in "[A-Za-z]{1,12}-[0-9]{1,6}",
            lanes in 1usize..64,
        ) {
            let lane = lane_for(&stream_id, lanes);
            prop_assert!(lane < lanes);
            prop_assert_eq!(lane, lane_for(&stream_id.clone(), lanes));
        }
    }
}
