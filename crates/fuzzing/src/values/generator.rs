//! The value generator interface and the uniform random implementation.

use super::{constrain_int, constrain_uint};
use alloy_primitives::{Address, I256, U256};
use rand::{rngs::StdRng, Rng, RngCore};

/// Tuning knobs shared by the value generators.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Soft cap on generated dynamic array lengths.
    pub max_array_length: usize,
    /// Soft cap on generated string lengths.
    pub max_string_length: usize,
    /// Soft cap on generated byte slice lengths.
    pub max_bytes_length: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { max_array_length: 100, max_string_length: 100, max_bytes_length: 100 }
    }
}

/// Produces and mutates the primitive values ABI-typed generation is built
/// from.
///
/// `generate_*` methods produce fresh values within the declared width or
/// length bounds; `mutate_*` methods derive a new value from an existing one.
/// The base implementation treats mutation as regeneration; the mutating and
/// shrinking generators override it.
pub trait ValueGenerator {
    /// The generator's random source, used by structural decisions in
    /// composite-value generation.
    fn rng(&mut self) -> &mut StdRng;

    fn generate_address(&mut self) -> Address;
    fn generate_array_length(&mut self) -> usize;
    fn generate_bool(&mut self) -> bool;
    fn generate_bytes(&mut self) -> Vec<u8>;
    fn generate_fixed_bytes(&mut self, length: usize) -> Vec<u8>;
    fn generate_string(&mut self) -> String;
    fn generate_uint(&mut self, bits: usize) -> U256;
    fn generate_int(&mut self, bits: usize) -> I256;

    fn mutate_address(&mut self, _value: Address) -> Address {
        self.generate_address()
    }
    fn mutate_bool(&mut self, _value: bool) -> bool {
        self.generate_bool()
    }
    fn mutate_bytes(&mut self, _value: Vec<u8>) -> Vec<u8> {
        self.generate_bytes()
    }
    fn mutate_fixed_bytes(&mut self, value: Vec<u8>) -> Vec<u8> {
        self.generate_fixed_bytes(value.len())
    }
    fn mutate_string(&mut self, _value: String) -> String {
        self.generate_string()
    }
    fn mutate_uint(&mut self, _value: U256, bits: usize) -> U256 {
        self.generate_uint(bits)
    }
    fn mutate_int(&mut self, _value: I256, bits: usize) -> I256 {
        self.generate_int(bits)
    }
}

/// Generates values uniformly at random within type bounds.
#[derive(Debug)]
pub struct RandomValueGenerator {
    pub(crate) rng: StdRng,
    pub(crate) config: GeneratorConfig,
}

impl RandomValueGenerator {
    /// Creates a generator drawing from the provided RNG.
    pub fn new(rng: StdRng, config: GeneratorConfig) -> Self {
        Self { rng, config }
    }

    fn random_word(&mut self) -> U256 {
        let mut raw = [0u8; 32];
        self.rng.fill_bytes(&mut raw);
        U256::from_be_bytes(raw)
    }
}

impl ValueGenerator for RandomValueGenerator {
    fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    fn generate_address(&mut self) -> Address {
        let mut raw = [0u8; 20];
        self.rng.fill_bytes(&mut raw);
        Address::from_slice(&raw)
    }

    fn generate_array_length(&mut self) -> usize {
        self.rng.random_range(0..=self.config.max_array_length)
    }

    fn generate_bool(&mut self) -> bool {
        self.rng.random()
    }

    fn generate_bytes(&mut self) -> Vec<u8> {
        let length = self.rng.random_range(0..=self.config.max_bytes_length);
        self.generate_fixed_bytes(length)
    }

    fn generate_fixed_bytes(&mut self, length: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; length];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    fn generate_string(&mut self) -> String {
        let length = self.rng.random_range(0..=self.config.max_string_length);
        (0..length).map(|_| self.rng.random_range(0x20u8..0x7f) as char).collect()
    }

    fn generate_uint(&mut self, bits: usize) -> U256 {
        let raw = self.random_word();
        constrain_uint(raw, bits)
    }

    fn generate_int(&mut self, bits: usize) -> I256 {
        let raw = self.random_word();
        constrain_int(raw, bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::int_bounds;
    use rand::SeedableRng;

    fn generator(seed: u64) -> RandomValueGenerator {
        RandomValueGenerator::new(StdRng::seed_from_u64(seed), GeneratorConfig::default())
    }

    #[test]
    fn unsigned_values_respect_width() {
        let mut generator = generator(1);
        for _ in 0..256 {
            assert!(generator.generate_uint(8) <= U256::from(u8::MAX));
            assert!(generator.generate_uint(16) <= U256::from(u16::MAX));
            let _ = generator.generate_uint(256);
        }
    }

    #[test]
    fn signed_values_respect_width() {
        let mut generator = generator(2);
        let (min, max) = int_bounds(16);
        for _ in 0..256 {
            let value = generator.generate_int(16);
            assert!(value >= min && value <= max, "{value} outside int16");
        }
    }

    #[test]
    fn lengths_respect_soft_caps() {
        let config = GeneratorConfig {
            max_array_length: 5,
            max_string_length: 7,
            max_bytes_length: 9,
        };
        let mut generator = RandomValueGenerator::new(StdRng::seed_from_u64(3), config);
        for _ in 0..64 {
            assert!(generator.generate_array_length() <= 5);
            assert!(generator.generate_string().chars().count() <= 7);
            assert!(generator.generate_bytes().len() <= 9);
            assert_eq!(generator.generate_fixed_bytes(32).len(), 32);
        }
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let mut a = generator(99);
        let mut b = generator(99);
        for _ in 0..16 {
            assert_eq!(a.generate_uint(256), b.generate_uint(256));
            assert_eq!(a.generate_string(), b.generate_string());
            assert_eq!(a.generate_address(), b.generate_address());
        }
    }
}
