//! Detection of off-target amplicons for candidate primer pairs.
//!
//! Each unique primer sequence is aligned once; per-primer hit sets and
//! per-pair verdicts are cached for the lifetime of the detector.  Left and
//! right hits are joined combinatorially into candidate amplicons under
//! orientation and size constraints.  The detector is not safe for
//! concurrent invocation; callers must serialize.

use ahash::{AHashMap, AHashSet};

use crate::align::{Aligner, AlignerResult, Error};
use crate::mapping::{Mapping, Strand};
use crate::primer::PrimerPair;

/// Configuration of the off-target checks.
#[derive(Debug, Clone)]
pub struct OffTargetOptions {
    /// A primer with more genomic hits than this fails its pairs outright.
    pub max_primer_hits: usize,
    /// A pair with more candidate amplicons than this does not pass.
    pub max_primer_pair_hits: usize,
    /// Maximum length of a candidate off-target amplicon.
    pub max_amplicon_size: u64,
    /// Whether amplicon mappings are retained on results.
    pub keep_amplicon_mappings: bool,
    /// Whether per-primer hit mappings are retained on results.
    pub keep_primer_mappings: bool,
}

impl Default for OffTargetOptions {
    fn default() -> Self {
        Self {
            max_primer_hits: 250,
            max_primer_pair_hits: 1,
            max_amplicon_size: 600,
            keep_amplicon_mappings: true,
            keep_primer_mappings: false,
        }
    }
}

/// The verdict for one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OffTargetResult {
    pub pair: PrimerPair,
    pub passes: bool,
    /// Candidate amplicon mappings, when retained.
    pub mappings: Vec<Mapping>,
    pub left_primer_mappings: Option<Vec<Mapping>>,
    pub right_primer_mappings: Option<Vec<Mapping>>,
}

type PairKey = (String, String, Mapping);

fn pair_key(pair: &PrimerPair) -> PairKey {
    (
        pair.left().bases().to_string(),
        pair.right().bases().to_string(),
        pair.amplicon().clone(),
    )
}

/// Checks primer pairs for off-target amplification.  Owns the aligner it
/// queries.
pub struct OffTargetDetector<A: Aligner> {
    aligner: A,
    options: OffTargetOptions,
    primer_cache: AHashMap<String, AlignerResult>,
    pair_cache: AHashMap<PairKey, OffTargetResult>,
}

impl<A: Aligner> OffTargetDetector<A> {
    pub fn new(aligner: A, options: OffTargetOptions) -> Self {
        Self {
            aligner,
            options,
            primer_cache: AHashMap::new(),
            pair_cache: AHashMap::new(),
        }
    }

    /// Check pairs, reusing cached verdicts and cached per-primer hit sets;
    /// only primers never seen before are submitted to the aligner, as one
    /// batch.  Results come back in input order.
    pub fn check(&mut self, pairs: &[PrimerPair]) -> Result<Vec<OffTargetResult>, Error> {
        let misses: Vec<&PrimerPair> = pairs
            .iter()
            .filter(|p| !self.pair_cache.contains_key(&pair_key(p)))
            .collect();

        let mut to_align: Vec<String> = Vec::new();
        let mut seen: AHashSet<&str> = AHashSet::new();
        for pair in &misses {
            for primer in [pair.left(), pair.right()] {
                let bases = primer.bases();
                if !self.primer_cache.contains_key(bases) && seen.insert(bases) {
                    to_align.push(bases.to_string());
                }
            }
        }
        if !to_align.is_empty() {
            let results = self.aligner.map(&to_align)?;
            for result in results {
                self.primer_cache.insert(result.query.clone(), result);
            }
        }

        for pair in misses {
            let result = self.check_one(pair);
            self.pair_cache.insert(pair_key(pair), result);
        }

        Ok(pairs
            .iter()
            .map(|p| {
                self.pair_cache
                    .get(&pair_key(p))
                    .expect("every pair was just checked")
                    .clone()
            })
            .collect())
    }

    fn check_one(&self, pair: &PrimerPair) -> OffTargetResult {
        let left = &self.primer_cache[pair.left().bases()];
        let right = &self.primer_cache[pair.right().bases()];

        if left.hit_count > self.options.max_primer_hits
            || right.hit_count > self.options.max_primer_hits
        {
            return OffTargetResult {
                pair: pair.clone(),
                passes: false,
                mappings: Vec::new(),
                left_primer_mappings: None,
                right_primer_mappings: None,
            };
        }

        let mut amplicons = Vec::new();
        for h1 in &left.hits {
            for h2 in &right.hits {
                if h1.chrom != h2.chrom || h1.negative == h2.negative {
                    continue;
                }
                let (plus, minus) = if h1.negative { (h2, h1) } else { (h1, h2) };
                if minus.start <= plus.end() {
                    continue;
                }
                let length = minus.end() + 1 - plus.start;
                if length > self.options.max_amplicon_size {
                    continue;
                }
                amplicons.push(
                    Mapping::new(&h1.chrom, plus.start, minus.end(), Strand::Plus)
                        .expect("joined hits form a valid mapping"),
                );
            }
        }
        let passes = amplicons.len() <= self.options.max_primer_pair_hits;

        OffTargetResult {
            pair: pair.clone(),
            passes,
            mappings: if self.options.keep_amplicon_mappings {
                amplicons
            } else {
                Vec::new()
            },
            left_primer_mappings: self
                .options
                .keep_primer_mappings
                .then(|| left.hits.iter().map(|h| h.to_mapping()).collect()),
            right_primer_mappings: self
                .options
                .keep_primer_mappings
                .then(|| right.hits.iter().map(|h| h.to_mapping()).collect()),
        }
    }
}
