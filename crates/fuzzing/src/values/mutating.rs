//! The mutation-based value generator used during fuzzing.

use super::{
    constrain_int, constrain_uint, int_bounds, width_mask, GeneratorConfig, RandomValueGenerator,
    ValueGenerator, ValueSet,
};
use alloy_primitives::{Address, I256, U256};
use parking_lot::RwLock;
use rand::{rngs::StdRng, Rng};
use std::sync::Arc;

/// Probability that a value is derived from the value set by mutation rather
/// than generated uniformly at random.
const MUTATE_PROBABILITY: f64 = 0.5;

/// Bounds on the number of mutation methods applied to a base value drawn
/// from the set. Zero rounds passes a harvested literal through unchanged.
const MAX_MUTATION_ROUNDS: u32 = 2;

/// Number of integer mutation methods, including boundary substitution.
const INTEGER_METHODS: usize = 7;

/// Generates values by mutating entries of a shared [`ValueSet`], falling
/// back to uniform random generation.
///
/// This is the default generator workers fuzz with: literals harvested from
/// the artifacts and from coverage-increasing sequences are far more likely
/// to thread comparisons in contract code than uniform random words.
#[derive(Debug)]
pub struct MutatingValueGenerator {
    random: RandomValueGenerator,
    value_set: Arc<RwLock<ValueSet>>,
}

impl MutatingValueGenerator {
    /// Creates a mutating generator over the shared value set.
    pub fn new(rng: StdRng, config: GeneratorConfig, value_set: Arc<RwLock<ValueSet>>) -> Self {
        Self { random: RandomValueGenerator::new(rng, config), value_set }
    }

    /// Applies one randomly selected integer mutation method to `value`,
    /// with operands drawn from the value set. The result is a raw word the
    /// caller constrains back to the requested width.
    fn mutate_raw_integer(&mut self, value: U256, bits: usize, signed: bool) -> U256 {
        let operand = {
            let set = self.value_set.read();
            set.random_integer(&mut self.random.rng)
        };
        let mask = width_mask(bits);
        match self.random.rng.random_range(0..INTEGER_METHODS) {
            0 => value.wrapping_add(operand),
            1 => value.wrapping_sub(operand),
            2 => value ^ operand,
            3 => !value & mask,
            4 => value.wrapping_shl(self.random.rng.random_range(1..8)),
            5 => value.wrapping_mul(U256::from(2)),
            _ => self.boundary_value(bits, signed),
        }
    }

    /// Picks a boundary value for the requested width: the minimum, the
    /// maximum, zero/one, or one off the boundary.
    fn boundary_value(&mut self, bits: usize, signed: bool) -> U256 {
        if signed {
            let (min, max) = int_bounds(bits);
            match self.random.rng.random_range(0..4) {
                0 => min.into_raw(),
                1 => max.into_raw(),
                2 => (min + I256::ONE).into_raw(),
                _ => (max - I256::ONE).into_raw(),
            }
        } else {
            let max = width_mask(bits);
            match self.random.rng.random_range(0..4) {
                0 => U256::ZERO,
                1 => max,
                2 => U256::ONE,
                _ => max - U256::ONE,
            }
        }
    }

    fn should_mutate(&mut self) -> bool {
        self.random.rng.random_bool(MUTATE_PROBABILITY)
    }

    fn mutation_rounds(&mut self) -> u32 {
        self.random.rng.random_range(0..=MAX_MUTATION_ROUNDS)
    }
}

impl ValueGenerator for MutatingValueGenerator {
    fn rng(&mut self) -> &mut StdRng {
        self.random.rng()
    }

    fn generate_address(&mut self) -> Address {
        if self.should_mutate() {
            let known = {
                let set = self.value_set.read();
                set.random_address(&mut self.random.rng)
            };
            if let Some(address) = known {
                return address;
            }
        }
        self.random.generate_address()
    }

    fn generate_array_length(&mut self) -> usize {
        self.random.generate_array_length()
    }

    fn generate_bool(&mut self) -> bool {
        self.random.generate_bool()
    }

    fn generate_bytes(&mut self) -> Vec<u8> {
        if self.should_mutate() {
            let known = {
                let set = self.value_set.read();
                set.random_bytes(&mut self.random.rng).map(<[u8]>::to_vec)
            };
            if let Some(bytes) = known {
                return self.mutate_bytes(bytes);
            }
        }
        self.random.generate_bytes()
    }

    fn generate_fixed_bytes(&mut self, length: usize) -> Vec<u8> {
        self.random.generate_fixed_bytes(length)
    }

    fn generate_string(&mut self) -> String {
        if self.should_mutate() {
            let known = {
                let set = self.value_set.read();
                set.random_string(&mut self.random.rng).map(str::to_owned)
            };
            if let Some(string) = known {
                return self.mutate_string(string);
            }
        }
        self.random.generate_string()
    }

    fn generate_uint(&mut self, bits: usize) -> U256 {
        if self.should_mutate() {
            let base = {
                let set = self.value_set.read();
                set.random_integer(&mut self.random.rng)
            };
            let mut value = constrain_uint(base, bits);
            for _ in 0..self.mutation_rounds() {
                value = constrain_uint(self.mutate_raw_integer(value, bits, false), bits);
            }
            return value;
        }
        self.random.generate_uint(bits)
    }

    fn generate_int(&mut self, bits: usize) -> I256 {
        if self.should_mutate() {
            let base = {
                let set = self.value_set.read();
                set.random_integer(&mut self.random.rng)
            };
            let mut value = constrain_int(base, bits);
            for _ in 0..self.mutation_rounds() {
                value = constrain_int(self.mutate_raw_integer(value.into_raw(), bits, true), bits);
            }
            return value;
        }
        self.random.generate_int(bits)
    }

    fn mutate_address(&mut self, value: Address) -> Address {
        if self.should_mutate() {
            return value;
        }
        self.generate_address()
    }

    fn mutate_bytes(&mut self, mut value: Vec<u8>) -> Vec<u8> {
        if !self.should_mutate() {
            return self.random.generate_bytes();
        }
        match self.random.rng.random_range(0..4) {
            // Flip a byte.
            0 if !value.is_empty() => {
                let i = self.random.rng.random_range(0..value.len());
                value[i] ^= self.random.rng.random::<u8>();
            }
            // Remove a byte.
            1 if !value.is_empty() => {
                let i = self.random.rng.random_range(0..value.len());
                value.remove(i);
            }
            // Append a byte.
            _ => value.push(self.random.rng.random()),
        }
        value
    }

    fn mutate_string(&mut self, value: String) -> String {
        if !self.should_mutate() {
            return self.random.generate_string();
        }
        let mut chars: Vec<char> = value.chars().collect();
        match self.random.rng.random_range(0..4) {
            // Replace a character.
            0 if !chars.is_empty() => {
                let i = self.random.rng.random_range(0..chars.len());
                chars[i] = self.random.rng.random_range(0x20u8..0x7f) as char;
            }
            // Remove a character.
            1 if !chars.is_empty() => {
                let i = self.random.rng.random_range(0..chars.len());
                chars.remove(i);
            }
            // Append a character.
            _ => chars.push(self.random.rng.random_range(0x20u8..0x7f) as char),
        }
        chars.into_iter().collect()
    }

    fn mutate_uint(&mut self, value: U256, bits: usize) -> U256 {
        if self.should_mutate() {
            let mutated = self.mutate_raw_integer(value, bits, false);
            constrain_uint(mutated, bits)
        } else {
            self.random.generate_uint(bits)
        }
    }

    fn mutate_int(&mut self, value: I256, bits: usize) -> I256 {
        if self.should_mutate() {
            let mutated = self.mutate_raw_integer(value.into_raw(), bits, true);
            constrain_int(mutated, bits)
        } else {
            self.random.generate_int(bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::int_bounds;
    use rand::SeedableRng;

    fn generator(seed: u64) -> MutatingValueGenerator {
        let mut set = ValueSet::new();
        set.add_integer(U256::from(42));
        set.add_address(Address::repeat_byte(0xaa));
        set.add_string("seed".into());
        set.add_bytes(vec![1, 2, 3]);
        MutatingValueGenerator::new(
            StdRng::seed_from_u64(seed),
            GeneratorConfig::default(),
            Arc::new(RwLock::new(set)),
        )
    }

    #[test]
    fn mutated_unsigned_values_stay_in_width() {
        let mut generator = generator(5);
        for _ in 0..512 {
            let value = generator.generate_uint(8);
            assert!(value <= U256::from(u8::MAX), "{value} exceeds uint8");
            let mutated = generator.mutate_uint(value, 8);
            assert!(mutated <= U256::from(u8::MAX), "{mutated} exceeds uint8");
        }
    }

    #[test]
    fn mutated_signed_values_stay_in_width() {
        let mut generator = generator(6);
        let (min, max) = int_bounds(32);
        for _ in 0..512 {
            let value = generator.generate_int(32);
            assert!(value >= min && value <= max);
            let mutated = generator.mutate_int(value, 32);
            assert!(mutated >= min && mutated <= max, "{mutated} outside int32");
        }
    }

    #[test]
    fn set_literals_pass_through_unmutated() {
        // With zero mutation rounds a harvested literal is emitted verbatim,
        // so magic constants from the source remain reachable inputs.
        let mut generator = generator(11);
        let mut hit_literal = false;
        for _ in 0..512 {
            if generator.generate_uint(256) == U256::from(42) {
                hit_literal = true;
                break;
            }
        }
        assert!(hit_literal, "value set literal never generated verbatim");
    }

    #[test]
    fn draws_known_values_from_the_set() {
        let mut generator = generator(7);
        let mut hit_known_address = false;
        for _ in 0..128 {
            if generator.generate_address() == Address::repeat_byte(0xaa) {
                hit_known_address = true;
                break;
            }
        }
        assert!(hit_known_address, "value set address never drawn");
    }
}
