//! The contractive value generator used by the shrinker.

use super::{
    constrain_int, constrain_uint, GeneratorConfig, RandomValueGenerator, ValueGenerator, ValueSet,
};
use alloy_primitives::{Address, I256, U256};
use parking_lot::RwLock;
use rand::{rngs::StdRng, Rng};
use std::sync::Arc;

/// Generates values by applying only contractive operations, driving inputs
/// toward zero-like values while a failure keeps reproducing.
#[derive(Debug)]
pub struct ShrinkingValueGenerator {
    random: RandomValueGenerator,
    value_set: Arc<RwLock<ValueSet>>,
}

impl ShrinkingValueGenerator {
    /// Creates a shrinking generator over the shared value set.
    pub fn new(rng: StdRng, value_set: Arc<RwLock<ValueSet>>) -> Self {
        Self { random: RandomValueGenerator::new(rng, GeneratorConfig::default()), value_set }
    }

    /// A magnitude to subtract toward zero, drawn from the value set.
    fn magnitude(&mut self) -> U256 {
        let set = self.value_set.read();
        set.random_integer(&mut self.random.rng)
    }
}

impl ValueGenerator for ShrinkingValueGenerator {
    fn rng(&mut self) -> &mut StdRng {
        self.random.rng()
    }

    fn generate_address(&mut self) -> Address {
        Address::ZERO
    }

    fn generate_array_length(&mut self) -> usize {
        0
    }

    fn generate_bool(&mut self) -> bool {
        false
    }

    fn generate_bytes(&mut self) -> Vec<u8> {
        Vec::new()
    }

    fn generate_fixed_bytes(&mut self, length: usize) -> Vec<u8> {
        vec![0; length]
    }

    fn generate_string(&mut self) -> String {
        String::new()
    }

    fn generate_uint(&mut self, _bits: usize) -> U256 {
        U256::ZERO
    }

    fn generate_int(&mut self, _bits: usize) -> I256 {
        I256::ZERO
    }

    fn mutate_address(&mut self, _value: Address) -> Address {
        Address::ZERO
    }

    fn mutate_bool(&mut self, _value: bool) -> bool {
        false
    }

    fn mutate_bytes(&mut self, mut value: Vec<u8>) -> Vec<u8> {
        if value.is_empty() {
            return value;
        }
        let i = self.random.rng.random_range(0..value.len());
        if self.random.rng.random() {
            // Zero out a byte.
            value[i] = 0;
        } else {
            // Remove a byte.
            value.remove(i);
        }
        value
    }

    fn mutate_fixed_bytes(&mut self, mut value: Vec<u8>) -> Vec<u8> {
        if !value.is_empty() {
            let i = self.random.rng.random_range(0..value.len());
            value[i] = 0;
        }
        value
    }

    fn mutate_string(&mut self, value: String) -> String {
        let mut chars: Vec<char> = value.chars().collect();
        if chars.is_empty() {
            return value;
        }
        let i = self.random.rng.random_range(0..chars.len());
        if self.random.rng.random() {
            // Replace a rune with NUL.
            chars[i] = '\0';
        } else {
            // Remove a rune.
            chars.remove(i);
        }
        chars.into_iter().collect()
    }

    fn mutate_uint(&mut self, value: U256, bits: usize) -> U256 {
        let shrunk = if self.random.rng.random() {
            // Subtract toward zero, clamped so we never overshoot.
            value - value.min(self.magnitude())
        } else {
            value >> 1
        };
        constrain_uint(shrunk, bits)
    }

    fn mutate_int(&mut self, value: I256, bits: usize) -> I256 {
        let shrunk = if self.random.rng.random() {
            let magnitude = self.magnitude();
            // Clamp into the positive signed range so `I256::MIN` shrinks
            // without overflow.
            let step =
                I256::from_raw(magnitude.min(value.unsigned_abs()).min(I256::MAX.into_raw()));
            if value.is_negative() {
                value + step
            } else {
                value - step
            }
        } else {
            value / I256::from_raw(U256::from(2))
        };
        constrain_int(shrunk.into_raw(), bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn generator(seed: u64) -> ShrinkingValueGenerator {
        let mut set = ValueSet::new();
        set.add_integer(U256::from(10));
        ShrinkingValueGenerator::new(StdRng::seed_from_u64(seed), Arc::new(RwLock::new(set)))
    }

    #[test]
    fn unsigned_shrinking_never_grows_magnitude() {
        let mut generator = generator(1);
        let mut value = U256::from(1_000_000u64);
        for _ in 0..256 {
            let shrunk = generator.mutate_uint(value, 256);
            assert!(shrunk <= value, "{shrunk} > {value}");
            value = shrunk;
        }
        assert_eq!(value, U256::ZERO);
    }

    #[test]
    fn signed_shrinking_moves_toward_zero() {
        let mut generator = generator(2);
        let mut value = I256::try_from(-500_000).unwrap();
        for _ in 0..256 {
            let shrunk = generator.mutate_int(value, 256);
            assert!(shrunk.unsigned_abs() <= value.unsigned_abs());
            value = shrunk;
        }
        assert_eq!(value, I256::ZERO);
    }

    #[test]
    fn byte_and_string_shrinking_is_contractive() {
        let mut generator = generator(3);
        let bytes = vec![1u8, 2, 3, 4];
        let shrunk = generator.mutate_bytes(bytes.clone());
        assert!(shrunk.len() <= bytes.len());

        let string = "abcdef".to_string();
        let shrunk = generator.mutate_string(string.clone());
        assert!(shrunk.chars().count() <= string.chars().count());

        assert_eq!(generator.mutate_address(Address::repeat_byte(9)), Address::ZERO);
    }
}
