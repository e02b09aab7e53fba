//! Bytecode coverage tracking.
//!
//! Coverage is recorded per executing contract address as a bitset over
//! program counter positions. Frames that revert are committed to a separate
//! map so that trivially failing paths do not pollute corpus novelty, while
//! still being observable by assertion detection.

use crate::chain::Tracer;
use alloy_primitives::{keccak256, Address, B256};
use std::collections::BTreeMap;

/// The `INVALID` opcode (`0xFE`), executed by Solidity's `assert`.
pub const OP_INVALID: u8 = 0xFE;

/// Hit data for a single contract's bytecode.
///
/// A growable bitset over program counter positions.
#[derive(Clone, Debug, Default)]
pub struct CodeCoverage {
    blocks: Vec<u64>,
}

impl CodeCoverage {
    /// Creates an empty coverage set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the given program counter as covered. Returns `true` if the
    /// position was not previously covered.
    pub fn hit(&mut self, pc: u32) -> bool {
        let (block, bit) = (pc as usize / 64, pc as usize % 64);
        if block >= self.blocks.len() {
            self.blocks.resize(block + 1, 0);
        }
        let mask = 1u64 << bit;
        let new = self.blocks[block] & mask == 0;
        self.blocks[block] |= mask;
        new
    }

    /// Returns whether the given program counter is covered.
    pub fn contains(&self, pc: u32) -> bool {
        let (block, bit) = (pc as usize / 64, pc as usize % 64);
        self.blocks.get(block).is_some_and(|b| b & (1u64 << bit) != 0)
    }

    /// Unions `other` into `self`, returning the number of newly covered
    /// positions.
    pub fn merge(&mut self, other: &Self) -> usize {
        if other.blocks.len() > self.blocks.len() {
            self.blocks.resize(other.blocks.len(), 0);
        }
        let mut new_bits = 0;
        for (ours, theirs) in self.blocks.iter_mut().zip(&other.blocks) {
            new_bits += (theirs & !*ours).count_ones() as usize;
            *ours |= theirs;
        }
        new_bits
    }

    /// Returns `true` iff any position covered here is not covered in
    /// `baseline`.
    pub fn novel_against(&self, baseline: &Self) -> bool {
        self.new_bits_against(baseline) > 0
    }

    /// Counts the positions covered here but not in `baseline`.
    pub fn new_bits_against(&self, baseline: &Self) -> usize {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let base = baseline.blocks.get(i).copied().unwrap_or(0);
                (block & !base).count_ones() as usize
            })
            .sum()
    }

    /// Returns the number of covered positions.
    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns `true` if no position is covered.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
    }

    /// The bitset blocks with trailing zero blocks trimmed, so logically
    /// equal sets compare and hash equal regardless of allocation history.
    fn normalized(&self) -> &[u64] {
        let end = self.blocks.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        &self.blocks[..end]
    }
}

impl PartialEq for CodeCoverage {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for CodeCoverage {}

/// A collection of [`CodeCoverage`] sets keyed by contract address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverageMaps {
    maps: BTreeMap<Address, CodeCoverage>,
}

impl CoverageMaps {
    /// Creates an empty coverage map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `pc` covered for `address`; returns `true` if newly covered.
    pub fn hit(&mut self, address: Address, pc: u32) -> bool {
        self.maps.entry(address).or_default().hit(pc)
    }

    /// Unions `other` into `self`, returning the number of newly covered
    /// positions across all addresses.
    pub fn merge(&mut self, other: &Self) -> usize {
        let mut new_bits = 0;
        for (address, coverage) in &other.maps {
            new_bits += self.maps.entry(*address).or_default().merge(coverage);
        }
        new_bits
    }

    /// Returns `true` iff any covered position here is not covered in
    /// `baseline`.
    pub fn novel_against(&self, baseline: &Self) -> bool {
        self.new_bits_against(baseline) > 0
    }

    /// Counts the positions covered here but not in `baseline`.
    pub fn new_bits_against(&self, baseline: &Self) -> usize {
        static EMPTY: CodeCoverage = CodeCoverage { blocks: Vec::new() };
        self.maps
            .iter()
            .map(|(address, coverage)| {
                coverage.new_bits_against(baseline.maps.get(address).unwrap_or(&EMPTY))
            })
            .sum()
    }

    /// Returns the total number of covered positions across all addresses.
    pub fn count(&self) -> usize {
        self.maps.values().map(CodeCoverage::count).sum()
    }

    /// Returns `true` if nothing is covered.
    pub fn is_empty(&self) -> bool {
        self.maps.values().all(CodeCoverage::is_empty)
    }

    /// Iterates over the per-address coverage sets.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &CodeCoverage)> {
        self.maps.iter()
    }

    /// Computes a stable fingerprint of the covered positions, used for
    /// corpus deduplication. Logically equal maps produce equal fingerprints.
    pub fn fingerprint(&self) -> B256 {
        let mut preimage = Vec::with_capacity(self.maps.len() * 64);
        for (address, coverage) in &self.maps {
            let blocks = coverage.normalized();
            if blocks.is_empty() {
                continue;
            }
            preimage.extend_from_slice(address.as_slice());
            preimage.extend_from_slice(&(blocks.len() as u64).to_le_bytes());
            for block in blocks {
                preimage.extend_from_slice(&block.to_le_bytes());
            }
        }
        keccak256(&preimage)
    }
}

/// Coverage gathered while executing a single call, split by frame outcome.
#[derive(Clone, Debug, Default)]
pub struct CallCoverage {
    /// Coverage of frames that completed without reverting.
    pub executed: CoverageMaps,
    /// Coverage of frames that reverted or halted.
    pub reverted: CoverageMaps,
}

impl CallCoverage {
    /// Unions another call's coverage into this one.
    pub fn merge(&mut self, other: &Self) {
        self.executed.merge(&other.executed);
        self.reverted.merge(&other.reverted);
    }
}

/// A [`Tracer`] recording executed program counters per call frame.
#[derive(Debug, Default)]
pub struct CoverageTracer {
    frames: Vec<(Address, CodeCoverage)>,
    coverage: CallCoverage,
    hit_invalid: bool,
}

impl CoverageTracer {
    /// Creates a tracer with no recorded coverage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an `INVALID` opcode was executed in any frame.
    pub fn hit_invalid(&self) -> bool {
        self.hit_invalid
    }

    /// Consumes the tracer, returning the gathered coverage.
    pub fn finish(mut self) -> CallCoverage {
        debug_assert!(self.frames.is_empty(), "unbalanced call frames in coverage tracer");
        // Frames left open by a misbehaving engine are treated as reverted.
        while let Some((address, coverage)) = self.frames.pop() {
            self.coverage.reverted.maps.entry(address).or_default().merge(&coverage);
        }
        self.coverage
    }
}

impl Tracer for CoverageTracer {
    fn enter_frame(&mut self, code_address: Address) {
        self.frames.push((code_address, CodeCoverage::new()));
    }

    fn step(&mut self, pc: u32, opcode: u8) {
        if opcode == OP_INVALID {
            self.hit_invalid = true;
        }
        if let Some((_, coverage)) = self.frames.last_mut() {
            coverage.hit(pc);
        }
    }

    fn exit_frame(&mut self, reverted: bool) {
        let Some((address, coverage)) = self.frames.pop() else { return };
        let target =
            if reverted { &mut self.coverage.reverted } else { &mut self.coverage.executed };
        target.maps.entry(address).or_default().merge(&coverage);
    }
}
