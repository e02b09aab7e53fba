//! Weighted random selection.

use alloy_primitives::U256;
use parking_lot::Mutex;
use rand::{rngs::StdRng, RngCore};

/// A weighted, randomly selectable item for use with a [`WeightedChooser`].
#[derive(Clone, Debug)]
pub struct WeightedChoice<T> {
    /// The wrapped item returned when this choice is selected.
    pub item: T,
    /// The likelihood of this choice being selected, relative to the sum of
    /// all weights in the chooser.
    pub weight: U256,
}

impl<T> WeightedChoice<T> {
    /// Creates a choice with the given item and selection weight.
    pub fn new(item: T, weight: U256) -> Self {
        Self { item, weight }
    }
}

/// Errors returned by [`WeightedChooser::choose`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChooserError {
    /// The chooser holds no choices with a non-zero weight.
    #[error("no choices exist with non-zero weights")]
    EmptyOrZeroWeight,
}

/// Selects one of a set of weighted choices at random.
///
/// Weights are 256-bit naturals since method selection weights are derived
/// from on-chain quantities. All operations serialize under a single mutex,
/// so a chooser can be shared between threads; workers that need
/// reproducible draws construct their own chooser from a seeded RNG.
#[derive(Debug)]
pub struct WeightedChooser<T> {
    inner: Mutex<ChooserInner<T>>,
}

#[derive(Debug)]
struct ChooserInner<T> {
    choices: Vec<WeightedChoice<T>>,
    total_weight: U256,
    rng: StdRng,
}

impl<T> WeightedChooser<T> {
    /// Creates an empty chooser drawing randomness from the provided RNG.
    pub fn with_rng(rng: StdRng) -> Self {
        Self { inner: Mutex::new(ChooserInner { choices: Vec::new(), total_weight: U256::ZERO, rng }) }
    }

    /// Adds a single weighted choice.
    pub fn add_choice(&self, choice: WeightedChoice<T>) {
        self.add_choices(std::iter::once(choice));
    }

    /// Adds weighted choices, allowing for future random selection.
    pub fn add_choices(&self, choices: impl IntoIterator<Item = WeightedChoice<T>>) {
        let inner = &mut *self.inner.lock();
        for choice in choices {
            inner.total_weight += choice.weight;
            inner.choices.push(choice);
        }
    }

    /// Returns the number of choices held, including zero-weighted ones.
    pub fn len(&self) -> usize {
        self.inner.lock().choices.len()
    }

    /// Returns `true` if the chooser holds no choices.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().choices.is_empty()
    }
}

impl<T: Clone> WeightedChooser<T> {
    /// Selects a random weighted item.
    ///
    /// An item is returned with probability `weight / total_weight`;
    /// zero-weighted items are never returned. The selection position is
    /// drawn uniformly from `[0, total_weight)` by rejection sampling: a
    /// 256-bit word is masked down to `total_weight.bit_len()` bits and
    /// redrawn while it falls outside the range.
    pub fn choose(&self) -> Result<T, ChooserError> {
        let inner = &mut *self.inner.lock();
        if inner.choices.is_empty() || inner.total_weight.is_zero() {
            return Err(ChooserError::EmptyOrZeroWeight);
        }

        let bits = inner.total_weight.bit_len();
        let mask = if bits >= 256 { U256::MAX } else { (U256::ONE << bits) - U256::ONE };
        let mut position = loop {
            let mut raw = [0u8; 32];
            inner.rng.fill_bytes(&mut raw);
            let candidate = U256::from_be_bytes(raw) & mask;
            if candidate < inner.total_weight {
                break candidate;
            }
        };

        for choice in &inner.choices {
            if position < choice.weight {
                return Ok(choice.item.clone());
            }
            position -= choice.weight;
        }
        unreachable!("selected weight position exceeds the total weight")
    }
}
