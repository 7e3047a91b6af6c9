//! Proof-of-work difficulty policy
//!
//! Every [`DIFFICULTY_ADJUSTMENT_INTERVAL`] blocks the target is scaled by
//! how long the last interval took compared to the expected time, steering
//! block time toward [`TARGET_BLOCK_TIME`].

use crate::core::block::{Block, MAX_TARGET, MIN_TARGET};

/// Number of blocks between difficulty adjustments
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 5;

/// Target block time in seconds
pub const TARGET_BLOCK_TIME: i64 = 60;

/// Target for `index` (the last block when `None`).
///
/// Index 0 and indexes that are not a multiple of the interval keep the
/// block's own target. Otherwise the target becomes
/// `floor(target * time_spent / (interval * TARGET_BLOCK_TIME))`, where
/// `time_spent` runs from the block one interval earlier, clamped to
/// `[MIN_TARGET, MAX_TARGET]`. An index past the end resolves to the last
/// block.
pub fn get_difficulty(blocks: &[Block], index: Option<u64>) -> u64 {
    let Some(last) = blocks.last() else {
        return MAX_TARGET;
    };
    let index = index.unwrap_or(last.index).min(blocks.len() as u64 - 1);
    let block = &blocks[index as usize];

    if index == 0 || index % DIFFICULTY_ADJUSTMENT_INTERVAL != 0 {
        return block.target;
    }

    let adjusted_from = &blocks[(index - DIFFICULTY_ADJUSTMENT_INTERVAL) as usize];
    let time_spent = i128::from(block.timestamp - adjusted_from.timestamp);
    let expected_time = i128::from(DIFFICULTY_ADJUSTMENT_INTERVAL as i64 * TARGET_BLOCK_TIME);

    // Floor division: a negative time span must round down, not toward zero
    let new_target = (i128::from(block.target) * time_spent).div_euclid(expected_time);
    let clamped = new_target.clamp(i128::from(MIN_TARGET), i128::from(MAX_TARGET)) as u64;

    log::debug!(
        "Retarget at block {}: {} -> {} ({}s spent, {}s expected)",
        index,
        block.target,
        clamped,
        time_spent,
        expected_time
    );

    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_chain(spacing: i64, target: u64, len: u64) -> Vec<Block> {
        (0..len)
            .map(|i| Block::new(i, "0".to_string(), 1_000 + spacing * i as i64, target, vec![]))
            .collect()
    }

    #[test]
    fn test_retarget_when_blocks_are_fast() {
        let target = 1_000_000_007;
        let blocks = synthetic_chain(30, target, 6);

        assert_eq!(get_difficulty(&blocks, Some(5)), target * 150 / 300);
        assert_eq!(get_difficulty(&blocks, None), target * 150 / 300);
    }

    #[test]
    fn test_retarget_when_blocks_are_slow() {
        let target = 1_000;
        let blocks = synthetic_chain(120, target, 6);
        assert_eq!(get_difficulty(&blocks, Some(5)), 2_000);
    }

    #[test]
    fn test_unchanged_between_adjustments() {
        let blocks = synthetic_chain(30, 777, 8);
        assert_eq!(get_difficulty(&blocks, Some(0)), 777);
        assert_eq!(get_difficulty(&blocks, Some(3)), 777);
        assert_eq!(get_difficulty(&blocks, Some(7)), 777);
        assert_eq!(get_difficulty(&blocks, None), 777);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let fast = synthetic_chain(0, 1_000, 6);
        assert_eq!(get_difficulty(&fast, Some(5)), MIN_TARGET);

        let slow = synthetic_chain(600, MAX_TARGET, 6);
        assert_eq!(get_difficulty(&slow, Some(5)), MAX_TARGET);

        let backwards = synthetic_chain(-10, 1_000, 6);
        assert_eq!(get_difficulty(&backwards, Some(5)), MIN_TARGET);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(get_difficulty(&[], None), MAX_TARGET);

        let blocks = synthetic_chain(30, 42, 3);
        assert_eq!(get_difficulty(&blocks, Some(99)), 42);
    }
}
