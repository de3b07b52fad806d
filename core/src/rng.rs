//! Deterministic random number generation.
//!
//! RULE: Nothing in the engine may call any platform RNG.
//! All randomness flows through PathRng instances derived
//! from the single master seed stored on the run record.
//!
//! Each simulated path gets its own stream, seeded deterministically
//! from (master_seed, country_id, path_index). This means:
//!   - Paths can run on any thread in any order and still reproduce.
//!   - Adding a country never changes another country's streams.
//!   - Raising the simulation count only appends new streams.

use crate::types::CountryId;
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A deterministic RNG owned by exactly one simulated path.
pub struct PathRng {
    pub country_id: CountryId,
    pub path_index: usize,
    inner: Pcg64Mcg,
}

impl PathRng {
    /// Create the stream for one (country, path) pair.
    /// The derivation must never change once released: it defines
    /// every published forecast's random draws.
    pub fn new(master_seed: u64, country_id: CountryId, path_index: usize) -> Self {
        let country_key = splitmix64((country_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let path_key = splitmix64((path_index as u64).wrapping_add(1).wrapping_mul(0xbf58_476d_1ce4_e5b9));
        let derived_seed = splitmix64(master_seed ^ country_key ^ path_key.rotate_left(17));
        Self {
            country_id,
            path_index,
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

impl RngCore for PathRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

/// Hands out path streams for a single run.
#[derive(Debug, Clone, Copy)]
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn for_path(&self, country_id: CountryId, path_index: usize) -> PathRng {
        PathRng::new(self.master_seed, country_id, path_index)
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
