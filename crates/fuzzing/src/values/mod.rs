//! Value pools and ABI-typed value generation.
//!
//! A [`ValueSet`] is the per-campaign literal pool: integers, strings, byte
//! slices and addresses harvested from compilation artifacts and re-injected
//! at runtime from call sequences that uncover new coverage. Generators draw
//! from the pool to produce and mutate ABI-typed values.

use crate::calls::CallSequence;
use alloy_primitives::{Address, I256, U256};
use alloy_dyn_abi::DynSolValue;
use indexmap::IndexSet;
use rand::{rngs::StdRng, Rng};

pub mod abi;
pub use abi::EncodingError;

mod generator;
pub use generator::{GeneratorConfig, RandomValueGenerator, ValueGenerator};

mod mutating;
pub use mutating::MutatingValueGenerator;

mod shrinking;
pub use shrinking::ShrinkingValueGenerator;

/// A pool of values used to aid value generation and mutation.
///
/// Integers are stored as raw 256-bit words; consumers constrain them to the
/// signed/unsigned width they need. The constants `{0, 1, 2}` are always
/// present so basic arithmetic mutations have operands to work with.
#[derive(Clone, Debug, Default)]
pub struct ValueSet {
    integers: IndexSet<U256>,
    strings: IndexSet<String>,
    bytes: IndexSet<Vec<u8>>,
    addresses: IndexSet<Address>,
}

impl ValueSet {
    /// Creates a value set seeded with the base integer constants.
    pub fn new() -> Self {
        let mut set = Self::default();
        for i in 0..3u64 {
            set.add_integer(U256::from(i));
        }
        set
    }

    pub fn add_integer(&mut self, value: U256) {
        self.integers.insert(value);
    }

    pub fn add_string(&mut self, value: String) {
        self.strings.insert(value);
    }

    pub fn add_bytes(&mut self, value: Vec<u8>) {
        self.bytes.insert(value);
    }

    pub fn add_address(&mut self, value: Address) {
        self.addresses.insert(value);
    }

    /// Unions another value set into this one.
    pub fn union(&mut self, other: &Self) {
        self.integers.extend(other.integers.iter().copied());
        self.strings.extend(other.strings.iter().cloned());
        self.bytes.extend(other.bytes.iter().cloned());
        self.addresses.extend(other.addresses.iter().copied());
    }

    /// Returns a uniformly drawn integer from the pool. The pool is never
    /// empty since the base constants are always present.
    pub fn random_integer(&self, rng: &mut StdRng) -> U256 {
        *self.integers.get_index(rng.random_range(0..self.integers.len())).expect("non-empty")
    }

    pub fn random_string(&self, rng: &mut StdRng) -> Option<&str> {
        if self.strings.is_empty() {
            return None;
        }
        self.strings.get_index(rng.random_range(0..self.strings.len())).map(String::as_str)
    }

    pub fn random_bytes(&self, rng: &mut StdRng) -> Option<&[u8]> {
        if self.bytes.is_empty() {
            return None;
        }
        self.bytes.get_index(rng.random_range(0..self.bytes.len())).map(Vec::as_slice)
    }

    pub fn random_address(&self, rng: &mut StdRng) -> Option<Address> {
        if self.addresses.is_empty() {
            return None;
        }
        self.addresses.get_index(rng.random_range(0..self.addresses.len())).copied()
    }

    pub fn integer_count(&self) -> usize {
        self.integers.len()
    }

    pub fn integers(&self) -> impl Iterator<Item = &U256> {
        self.integers.iter()
    }

    /// Re-injects the terminal values of an ABI value into the pool.
    ///
    /// Called for sequences admitted to the corpus, so values that helped
    /// uncover new coverage become candidates for future mutation.
    pub fn add_abi_value(&mut self, value: &DynSolValue) {
        match value {
            DynSolValue::Address(addr) => self.add_address(*addr),
            DynSolValue::Uint(v, _) => self.add_integer(*v),
            DynSolValue::Int(v, _) => self.add_integer(v.into_raw()),
            DynSolValue::String(s) => self.add_string(s.clone()),
            DynSolValue::Bytes(b) => self.add_bytes(b.clone()),
            DynSolValue::FixedBytes(word, size) => self.add_bytes(word[..*size].to_vec()),
            DynSolValue::Bool(_) => {}
            DynSolValue::Array(values)
            | DynSolValue::FixedArray(values)
            | DynSolValue::Tuple(values) => {
                for value in values {
                    self.add_abi_value(value);
                }
            }
            _ => {}
        }
    }

    /// Re-injects every typed argument of a call sequence into the pool.
    pub fn add_call_sequence(&mut self, sequence: &CallSequence) {
        for element in sequence.iter() {
            if let Some(abi_data) = &element.message.data_abi {
                for arg in &abi_data.args {
                    self.add_abi_value(arg);
                }
            }
        }
    }
}

/// Returns a mask keeping the low `bits` bits of a 256-bit word.
pub(crate) fn width_mask(bits: usize) -> U256 {
    if bits >= 256 {
        U256::MAX
    } else {
        (U256::ONE << bits) - U256::ONE
    }
}

/// Constrains a raw word to an unsigned integer of the given width by
/// modular reduction.
pub(crate) fn constrain_uint(value: U256, bits: usize) -> U256 {
    value & width_mask(bits)
}

/// Constrains a raw word to a signed integer of the given width via two's
/// complement interpretation of the low `bits` bits.
pub(crate) fn constrain_int(raw: U256, bits: usize) -> I256 {
    if bits >= 256 {
        return I256::from_raw(raw);
    }
    let mask = width_mask(bits);
    let low = raw & mask;
    let sign_bit = U256::ONE << (bits - 1);
    if low & sign_bit != U256::ZERO {
        // Negative: sign-extend the high bits.
        I256::from_raw(low | !mask)
    } else {
        I256::from_raw(low)
    }
}

/// Returns the `(min, max)` bounds of a signed integer of the given width.
pub(crate) fn int_bounds(bits: usize) -> (I256, I256) {
    if bits >= 256 {
        return (I256::MIN, I256::MAX);
    }
    let max = I256::from_raw((U256::ONE << (bits - 1)) - U256::ONE);
    (-max - I256::ONE, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn base_constants_always_present() {
        let set = ValueSet::new();
        assert_eq!(set.integer_count(), 3);
        let mut rng = StdRng::seed_from_u64(0);
        let drawn = set.random_integer(&mut rng);
        assert!(drawn <= U256::from(2));
    }

    #[test]
    fn union_merges_all_pools() {
        let mut a = ValueSet::new();
        let mut b = ValueSet::new();
        b.add_integer(U256::from(42));
        b.add_string("hello".into());
        b.add_bytes(vec![0xde, 0xad]);
        b.add_address(Address::repeat_byte(1));

        a.union(&b);
        assert!(a.integers().any(|v| *v == U256::from(42)));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(a.random_string(&mut rng).is_some());
        assert!(a.random_bytes(&mut rng).is_some());
        assert!(a.random_address(&mut rng).is_some());
    }

    #[test]
    fn abi_values_reinjected_recursively() {
        let mut set = ValueSet::new();
        set.add_abi_value(&DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(7), 256),
            DynSolValue::Array(vec![DynSolValue::String("inner".into())]),
        ]));
        assert!(set.integers().any(|v| *v == U256::from(7)));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(set.random_string(&mut rng), Some("inner"));
    }

    #[test]
    fn signed_constraint_sign_extends() {
        // 0xFF as int8 is -1.
        assert_eq!(constrain_int(U256::from(0xffu64), 8), I256::MINUS_ONE);
        assert_eq!(constrain_int(U256::from(0x7fu64), 8), I256::try_from(127).unwrap());
        let (min, max) = int_bounds(8);
        assert_eq!(min, I256::try_from(-128).unwrap());
        assert_eq!(max, I256::try_from(127).unwrap());
    }

    #[test]
    fn unsigned_constraint_wraps() {
        assert_eq!(constrain_uint(U256::from(0x1ffu64), 8), U256::from(0xffu64));
        assert_eq!(constrain_uint(U256::MAX, 256), U256::MAX);
    }
}
