//! Built-in problem statements handed out when a recording has no `--prompt`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub const QUESTION_BANK: [&str; 9] = [
    "Two Sum - Find indices of two numbers that add up to a target.",
    "Sock Merchant - Count pairs of socks with matching colors.",
    "Enormous Input Test (INTEST) - Count numbers divisible by a given value.",
    "Longest Substring Without Repeating Characters - Find the length of the longest substring without repeating characters.",
    "Climbing the Leaderboard - Determine player ranks after each game score.",
    "Chef and Strings - Calculate total absolute differences between adjacent string values.",
    "Median of Two Sorted Arrays - Find the median of two sorted arrays efficiently.",
    "Matrix Layer Rotation - Rotate each layer of a 2D matrix a given number of times.",
    "K-Flip (KFLIP) - Maximize the number of 1s in a binary string with at most K flips.",
];

/// Uniform pick from [`QUESTION_BANK`]. A seed makes the pick reproducible.
pub fn pick_question(seed: Option<u64>) -> &'static str {
    let picked = match seed {
        Some(seed) => QUESTION_BANK.choose(&mut StdRng::seed_from_u64(seed)),
        None => QUESTION_BANK.choose(&mut rand::thread_rng()),
    };
    picked.copied().unwrap_or(QUESTION_BANK[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn same_seed_picks_the_same_question() {
        for seed in [0, 7, 42, u64::MAX] {
            assert_eq!(pick_question(Some(seed)), pick_question(Some(seed)));
        }
    }

    #[test]
    fn picks_come_from_the_bank_and_vary_with_the_seed() {
        let picked = (0..200)
            .map(|seed| pick_question(Some(seed)))
            .collect::<HashSet<_>>();
        assert!(picked.iter().all(|q| QUESTION_BANK.contains(q)));
        assert!(picked.len() > 1);
        assert!(QUESTION_BANK.contains(&pick_question(None)));
    }
}
