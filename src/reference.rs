//! Access to reference sequence data.
//!
//! The rest of the crate consumes reference bases through the
//! [`ReferenceProvider`] trait; implementations are provided for an indexed
//! FASTA file on disk and for in-memory sequences (used heavily in tests).
//! Coordinates on this interface are 1-based and closed, matching
//! [`crate::mapping::Mapping`]; conversion to the 0-based half-open
//! convention of the underlying readers happens here and nowhere else.

use std::path::Path;

use ahash::AHashMap;

use crate::mapping::Mapping;

pub use self::error::Error;

mod error {
    /// Error type for reference access.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("unknown reference sequence: {0}")]
        UnknownReference(String),
        #[error("coordinates {1}-{2} out of bounds for {0} of length {3}")]
        OutOfBounds(String, u64, u64, u64),
        #[error("problem reading FASTA: {0}")]
        Fasta(String),
        #[error("I/O error")]
        Io(#[from] std::io::Error),
        #[error("reference bases are not valid UTF-8 for {0}")]
        InvalidBases(String),
    }
}

/// Ordered list of reference sequence names and lengths; provides the
/// reference ordering used for cross-contig comparison of mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceDictionary {
    entries: Vec<(String, u64)>,
    index: AHashMap<String, usize>,
}

impl SequenceDictionary {
    pub fn new(entries: Vec<(String, u64)>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        Self { entries, index }
    }

    pub fn index_of(&self, ref_name: &str) -> Option<usize> {
        self.index.get(ref_name).copied()
    }

    pub fn length_of(&self, ref_name: &str) -> Option<u64> {
        self.index_of(ref_name).map(|i| self.entries[i].1)
    }

    pub fn contains(&self, ref_name: &str) -> bool {
        self.index.contains_key(ref_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read access to reference bases.
pub trait ReferenceProvider {
    /// The dictionary describing contig order and lengths.
    fn dictionary(&self) -> &SequenceDictionary;

    /// Fetch bases for the 1-based closed interval `start..=end`, retaining
    /// the case of the underlying sequence.
    fn fetch(&mut self, ref_name: &str, start: u64, end: u64) -> Result<String, Error>;

    /// Fetch the forward-strand bases covered by a mapping.
    fn fetch_mapping(&mut self, mapping: &Mapping) -> Result<String, Error> {
        self.fetch(&mapping.ref_name, mapping.start, mapping.end)
    }

    /// Length of the given reference sequence.
    fn length_of(&self, ref_name: &str) -> Result<u64, Error> {
        self.dictionary()
            .length_of(ref_name)
            .ok_or_else(|| Error::UnknownReference(ref_name.to_string()))
    }
}

/// In-memory reference sequences, each starting at position 1.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    seqs: AHashMap<String, String>,
    dict: SequenceDictionary,
}

impl InMemoryReference {
    pub fn new(seqs: Vec<(String, String)>) -> Self {
        let dict = SequenceDictionary::new(
            seqs.iter()
                .map(|(name, seq)| (name.clone(), seq.len() as u64))
                .collect(),
        );
        Self {
            seqs: seqs.into_iter().collect(),
            dict,
        }
    }
}

impl ReferenceProvider for InMemoryReference {
    fn dictionary(&self) -> &SequenceDictionary {
        &self.dict
    }

    fn fetch(&mut self, ref_name: &str, start: u64, end: u64) -> Result<String, Error> {
        let seq = self
            .seqs
            .get(ref_name)
            .ok_or_else(|| Error::UnknownReference(ref_name.to_string()))?;
        if start < 1 || end > seq.len() as u64 || end + 1 < start {
            return Err(Error::OutOfBounds(
                ref_name.to_string(),
                start,
                end,
                seq.len() as u64,
            ));
        }
        Ok(seq[(start - 1) as usize..end as usize].to_string())
    }
}

/// Reference bases from a FASTA file with a `samtools faidx` index.
pub struct IndexedFastaReference {
    reader: bio::io::fasta::IndexedReader<std::fs::File>,
    dict: SequenceDictionary,
}

impl IndexedFastaReference {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let reader = bio::io::fasta::IndexedReader::from_file(&path.as_ref())
            .map_err(|e| Error::Fasta(e.to_string()))?;
        let dict = SequenceDictionary::new(
            reader
                .index
                .sequences()
                .iter()
                .map(|seq| (seq.name.clone(), seq.len))
                .collect(),
        );
        Ok(Self { reader, dict })
    }
}

impl ReferenceProvider for IndexedFastaReference {
    fn dictionary(&self) -> &SequenceDictionary {
        &self.dict
    }

    fn fetch(&mut self, ref_name: &str, start: u64, end: u64) -> Result<String, Error> {
        let length = self.length_of(ref_name)?;
        if start < 1 || end > length || end + 1 < start {
            return Err(Error::OutOfBounds(ref_name.to_string(), start, end, length));
        }
        self.reader
            .fetch(ref_name, start - 1, end)
            .map_err(|e| Error::Fasta(e.to_string()))?;
        let mut text = Vec::with_capacity((end + 1 - start) as usize);
        self.reader
            .read(&mut text)
            .map_err(|e| Error::Fasta(e.to_string()))?;
        String::from_utf8(text).map_err(|_| Error::InvalidBases(ref_name.to_string()))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write as _;

    use pretty_assertions::assert_eq;

    use super::{InMemoryReference, IndexedFastaReference, ReferenceProvider, SequenceDictionary};
    use crate::mapping::{Mapping, Strand};

    #[test]
    fn dictionary_lookup() {
        let dict =
            SequenceDictionary::new(vec![("chr1".to_string(), 100), ("chr2".to_string(), 50)]);
        assert_eq!(dict.index_of("chr1"), Some(0));
        assert_eq!(dict.index_of("chr2"), Some(1));
        assert_eq!(dict.index_of("chr3"), None);
        assert_eq!(dict.length_of("chr2"), Some(50));
        assert_eq!(dict.names().collect::<Vec<_>>(), vec!["chr1", "chr2"]);
    }

    #[test]
    fn in_memory_fetch() {
        let mut reference =
            InMemoryReference::new(vec![("chr1".to_string(), "ACGTacgtNN".to_string())]);
        assert_eq!(reference.fetch("chr1", 1, 4).unwrap(), "ACGT");
        // case is retained
        assert_eq!(reference.fetch("chr1", 5, 8).unwrap(), "acgt");
        assert_eq!(reference.fetch("chr1", 1, 10).unwrap(), "ACGTacgtNN");
        assert!(reference.fetch("chr1", 0, 4).is_err());
        assert!(reference.fetch("chr1", 1, 11).is_err());
        assert!(reference.fetch("chr9", 1, 2).is_err());

        let mapping = Mapping::new("chr1", 2, 5, Strand::Minus).unwrap();
        assert_eq!(reference.fetch_mapping(&mapping).unwrap(), "CGTa");
        assert_eq!(reference.length_of("chr1").unwrap(), 10);
    }

    #[test]
    fn indexed_fasta_fetch() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let fasta = dir.path().join("ref.fa");
        let fai = dir.path().join("ref.fa.fai");
        // 2 lines of 8 bases each
        std::fs::write(&fasta, ">chr1\nACGTACGT\nttttAAAA\n")?;
        let mut index = std::fs::File::create(&fai)?;
        writeln!(index, "chr1\t16\t6\t8\t9")?;

        let mut reference = IndexedFastaReference::from_path(&fasta)?;
        assert_eq!(reference.dictionary().length_of("chr1"), Some(16));
        assert_eq!(reference.fetch("chr1", 1, 8)?, "ACGTACGT");
        assert_eq!(reference.fetch("chr1", 7, 12)?, "GTtttt");
        assert!(reference.fetch("chr1", 1, 17).is_err());
        Ok(())
    }
}
