//! The coverage-keyed corpus.
//!
//! Two shards: `mutation_sequences` holds sequences drawn for mutation,
//! `call_sequences` holds historical sequences such as minimized failures.
//! Entries are deduplicated by coverage fingerprint (not sequence equality)
//! and persisted as JSON files named by the sequence's content hash.

use crate::{calls::CallSequence, coverage::CoverageMaps};
use alloy_primitives::B256;
use rand::{rngs::StdRng, Rng};
use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
};

const MUTATION_SHARD: &str = "mutation_sequences";
const CALL_SHARD: &str = "call_sequences";

/// Errors raised by corpus persistence. Fatal when they occur at
/// initialization; logged and recovered during steady-state fuzzing.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to create corpus dir {path:?}: {source}")]
    CreateDir { source: io::Error, path: PathBuf },
    #[error("failed to read corpus dir {path:?}: {source}")]
    ReadDir { source: io::Error, path: PathBuf },
    #[error("failed to read corpus entry {path:?}: {source}")]
    Read { source: io::Error, path: PathBuf },
    #[error("failed to write corpus entry {path:?}: {source}")]
    Write { source: io::Error, path: PathBuf },
    #[error("failed to serialize corpus entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A sequence retained because of the coverage it produced.
#[derive(Clone, Debug)]
pub struct CorpusEntry {
    pub sequence: CallSequence,
    /// Non-reverted coverage the sequence produced when admitted.
    pub coverage: CoverageMaps,
    /// Novelty contribution at admission time; used as the mutation
    /// selection weight.
    pub weight: u64,
}

/// The corpus of interesting call sequences.
#[derive(Debug, Default)]
pub struct Corpus {
    mutation_sequences: Vec<CorpusEntry>,
    call_sequences: Vec<CorpusEntry>,
    /// Coverage fingerprints of admitted mutation entries.
    fingerprints: HashSet<B256>,
    /// Content hashes of archived call-shard entries.
    archived: HashSet<B256>,
    directory: Option<PathBuf>,
}

impl Corpus {
    /// Creates a corpus, preparing the shard directories when persistence is
    /// enabled.
    pub fn new(directory: Option<PathBuf>) -> Result<Self, CorpusError> {
        if let Some(directory) = &directory {
            for shard in [MUTATION_SHARD, CALL_SHARD] {
                let path = directory.join(shard);
                std::fs::create_dir_all(&path)
                    .map_err(|source| CorpusError::CreateDir { source, path })?;
            }
        }
        Ok(Self { directory, ..Default::default() })
    }

    /// Reads every persisted sequence of a shard from the given corpus
    /// directory. Unparseable files are skipped with a warning.
    pub fn load_shard(
        directory: &Path,
        mutation_shard: bool,
    ) -> Result<Vec<CallSequence>, CorpusError> {
        let shard = directory.join(if mutation_shard { MUTATION_SHARD } else { CALL_SHARD });
        if !shard.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&shard)
            .map_err(|source| CorpusError::ReadDir { source, path: shard.clone() })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut sequences = Vec::with_capacity(files.len());
        for file in files {
            let contents = std::fs::read_to_string(&file)
                .map_err(|source| CorpusError::Read { source, path: file.clone() })?;
            match serde_json::from_str::<CallSequence>(&contents) {
                Ok(sequence) => sequences.push(sequence),
                Err(err) => {
                    warn!(path = %file.display(), %err, "dropping unreadable corpus entry");
                }
            }
        }
        Ok(sequences)
    }

    /// Adds an entry to the mutation shard unless an entry with the same
    /// coverage fingerprint already exists. Returns whether it was added.
    pub fn add_mutation_entry(&mut self, entry: CorpusEntry) -> Result<bool, CorpusError> {
        if !self.fingerprints.insert(entry.coverage.fingerprint()) {
            return Ok(false);
        }
        self.persist(MUTATION_SHARD, &entry.sequence)?;
        self.mutation_sequences.push(entry);
        Ok(true)
    }

    /// Archives a sequence (e.g. a minimized failure) in the call shard.
    pub fn add_call_entry(&mut self, entry: CorpusEntry) -> Result<bool, CorpusError> {
        let hash = entry.sequence.hash()?;
        if !self.archived.insert(hash) {
            return Ok(false);
        }
        self.persist(CALL_SHARD, &entry.sequence)?;
        self.call_sequences.push(entry);
        Ok(true)
    }

    fn persist(&self, shard: &str, sequence: &CallSequence) -> Result<(), CorpusError> {
        let Some(directory) = &self.directory else { return Ok(()) };
        let hash = sequence.hash()?;
        let path = directory.join(shard).join(format!("{}.json", alloy_primitives::hex::encode(hash)));
        if path.exists() {
            return Ok(());
        }
        let contents = serde_json::to_string_pretty(sequence)?;
        std::fs::write(&path, contents).map_err(|source| CorpusError::Write { source, path })
    }

    /// Draws a mutation-shard sequence, weighted by each entry's novelty
    /// contribution at admission time.
    pub fn choose_mutation_sequence(&self, rng: &mut StdRng) -> Option<&CallSequence> {
        if self.mutation_sequences.is_empty() {
            return None;
        }
        let total: u128 = self.mutation_sequences.iter().map(|e| e.weight as u128).sum();
        if total == 0 {
            return None;
        }
        let mut position = rng.random_range(0..total);
        for entry in &self.mutation_sequences {
            if position < entry.weight as u128 {
                return Some(&entry.sequence);
            }
            position -= entry.weight as u128;
        }
        unreachable!("selected weight position exceeds the total weight")
    }

    pub fn mutation_len(&self) -> usize {
        self.mutation_sequences.len()
    }

    pub fn call_len(&self) -> usize {
        self.call_sequences.len()
    }

    pub fn mutation_entries(&self) -> impl Iterator<Item = &CorpusEntry> {
        self.mutation_sequences.iter()
    }
}

/// The corpus together with the global coverage baseline. Admission checks
/// and baseline updates happen atomically on one instance behind the
/// coordinator's lock, so concurrent workers can neither lose novelty nor
/// double-admit.
#[derive(Debug)]
pub struct CorpusState {
    pub corpus: Corpus,
    pub baseline: CoverageMaps,
}

impl CorpusState {
    pub fn new(corpus: Corpus, baseline: CoverageMaps) -> Self {
        Self { corpus, baseline }
    }

    /// Admits a sequence iff its non-reverted coverage is novel against the
    /// baseline, updating the baseline in the same critical section.
    /// Returns whether the sequence was admitted.
    pub fn try_admit(
        &mut self,
        sequence: &CallSequence,
        coverage: &CoverageMaps,
    ) -> Result<bool, CorpusError> {
        let new_bits = coverage.new_bits_against(&self.baseline);
        if new_bits == 0 {
            return Ok(false);
        }
        self.baseline.merge(coverage);
        let mut sequence = sequence.clone();
        sequence.clear_results();
        self.corpus.add_mutation_entry(CorpusEntry {
            sequence,
            coverage: coverage.clone(),
            weight: new_bits as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{BlockDelta, CallMessage, CallSequenceElement};
    use alloy_primitives::{Address, U256};
    use rand::SeedableRng;

    fn sequence(tag: u8) -> CallSequence {
        let mut message = CallMessage::deployment(
            Address::repeat_byte(tag),
            1_000_000,
            vec![tag].into(),
        );
        message.nonce = tag as u64;
        CallSequence(vec![CallSequenceElement::new(message, BlockDelta::minimal())])
    }

    fn coverage(pcs: &[u32]) -> CoverageMaps {
        let mut maps = CoverageMaps::new();
        for pc in pcs {
            maps.hit(Address::repeat_byte(0xcc), *pc);
        }
        maps
    }

    #[test]
    fn admission_requires_novel_coverage() {
        let mut state = CorpusState::new(Corpus::new(None).unwrap(), coverage(&[1, 2]));

        // Subset of the baseline: rejected.
        assert!(!state.try_admit(&sequence(1), &coverage(&[1])).unwrap());
        assert_eq!(state.corpus.mutation_len(), 0);

        // Novel bit: admitted and baseline grows.
        assert!(state.try_admit(&sequence(1), &coverage(&[3])).unwrap());
        assert_eq!(state.corpus.mutation_len(), 1);

        // Same coverage again: no longer novel.
        assert!(!state.try_admit(&sequence(2), &coverage(&[3])).unwrap());
        assert_eq!(state.corpus.mutation_len(), 1);
    }

    #[test]
    fn identical_coverage_fingerprints_deduplicate() {
        let mut corpus = Corpus::new(None).unwrap();
        let entry = CorpusEntry { sequence: sequence(1), coverage: coverage(&[5]), weight: 1 };
        assert!(corpus.add_mutation_entry(entry.clone()).unwrap());
        // A different sequence with identical coverage is a duplicate.
        let duplicate = CorpusEntry { sequence: sequence(2), ..entry };
        assert!(!corpus.add_mutation_entry(duplicate).unwrap());
        assert_eq!(corpus.mutation_len(), 1);
    }

    #[test]
    fn weighted_selection_prefers_novelty() {
        let mut corpus = Corpus::new(None).unwrap();
        corpus
            .add_mutation_entry(CorpusEntry {
                sequence: sequence(1),
                coverage: coverage(&[1]),
                weight: 1,
            })
            .unwrap();
        corpus
            .add_mutation_entry(CorpusEntry {
                sequence: sequence(2),
                coverage: coverage(&[2]),
                weight: 9,
            })
            .unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let mut heavy = 0;
        for _ in 0..1_000 {
            let drawn = corpus.choose_mutation_sequence(&mut rng).unwrap();
            if drawn == &sequence(2) {
                heavy += 1;
            }
        }
        assert!(heavy > 800, "heavy entry drawn only {heavy}/1000 times");
    }

    #[test]
    fn persists_and_reloads_shards() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = Corpus::new(Some(dir.path().to_path_buf())).unwrap();
        corpus
            .add_mutation_entry(CorpusEntry {
                sequence: sequence(1),
                coverage: coverage(&[1]),
                weight: 1,
            })
            .unwrap();
        corpus
            .add_call_entry(CorpusEntry {
                sequence: sequence(2),
                coverage: coverage(&[2]),
                weight: 1,
            })
            .unwrap();

        let mutation = Corpus::load_shard(dir.path(), true).unwrap();
        assert_eq!(mutation, vec![sequence(1)]);
        let call = Corpus::load_shard(dir.path(), false).unwrap();
        assert_eq!(call, vec![sequence(2)]);

        // Unreadable entries are dropped, not fatal.
        std::fs::write(dir.path().join("mutation_sequences/junk.json"), "{").unwrap();
        let mutation = Corpus::load_shard(dir.path(), true).unwrap();
        assert_eq!(mutation.len(), 1);
    }

    #[test]
    fn call_shard_archives_by_content_hash() {
        let mut corpus = Corpus::new(None).unwrap();
        let entry =
            CorpusEntry { sequence: sequence(3), coverage: CoverageMaps::new(), weight: 1 };
        assert!(corpus.add_call_entry(entry.clone()).unwrap());
        assert!(!corpus.add_call_entry(entry).unwrap());
        assert_eq!(corpus.call_len(), 1);
    }
}
