//! Short, shareable memo identifiers.
//!
//! A short ID is three lowercase letters followed by four digits
//! (`abc1234`), giving 26³ × 10⁴ = 175,760,000 combinations. The generator
//! only avoids collisions; it is not a security boundary, so a seeded
//! `StdRng` is enough.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LETTERS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8; 10] = b"0123456789";
const LETTER_COUNT: usize = 3;
const DIGIT_COUNT: usize = 4;

/// Total length of a short ID.
pub const SHORT_ID_LEN: usize = LETTER_COUNT + DIGIT_COUNT;

/// Source of short-ID candidates, safe to share between concurrent creators.
pub struct ShortIdGenerator {
    rng: Mutex<StdRng>,
}

impl ShortIdGenerator {
    /// A generator seeded from operating-system entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// A deterministic generator; the same seed yields the same sequence.
    pub fn from_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draw the next candidate.
    pub fn generate(&self) -> String {
        // A poisoned lock only means another creator panicked mid-draw; the
        // RNG state is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        let mut id = String::with_capacity(SHORT_ID_LEN);
        for _ in 0..LETTER_COUNT {
            id.push(LETTERS[rng.random_range(0..LETTERS.len())] as char);
        }
        for _ in 0..DIGIT_COUNT {
            id.push(DIGITS[rng.random_range(0..DIGITS.len())] as char);
        }
        id
    }
}

impl Default for ShortIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShortIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortIdGenerator").finish_non_exhaustive()
    }
}

/// Whether `s` has the `[a-z]{3}[0-9]{4}` short-ID shape.
pub fn is_short_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == SHORT_ID_LEN
        && bytes[..LETTER_COUNT].iter().all(u8::is_ascii_lowercase)
        && bytes[LETTER_COUNT..].iter().all(u8::is_ascii_digit)
}
