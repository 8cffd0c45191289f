//! Genomic coordinates with strand.
//!
//! All coordinates in this crate are 1-based and closed on both ends, so
//! `length = end - start + 1`.  A zero-width mapping is permitted only in the
//! form `end = start - 1`.

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

pub use crate::mapping::error::Error;
use crate::reference::SequenceDictionary;

mod error {
    /// Error type for coordinate operations.
    #[derive(thiserror::Error, Debug, Clone)]
    pub enum Error {
        #[error("invalid mapping {0}:{1}-{2}")]
        InvalidMapping(String, u64, u64),
        #[error("invalid range start={0} length={1} within mapping of length {2}")]
        InvalidRange(u64, u64, u64),
        #[error("position {0} is outside of {1}")]
        OutOfRange(u64, String),
        #[error("mappings are on different references: {0} vs {1}")]
        DifferentReferences(String, String),
        #[error("mappings neither overlap nor abut: {0} vs {1}")]
        NoUnion(String, String),
        #[error("shift by {0} would move start of {1} below 1")]
        InvalidShift(i64, String),
        #[error("reference {0} is not in the sequence dictionary")]
        UnknownReference(String),
        #[error("invalid strand: {0}")]
        InvalidStrand(String),
        #[error("mapping is not parseable: {0}")]
        InvalidFormat(String),
    }
}

/// Strand of the reference sequence.  `Plus` orders before `Minus`.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Strand {
    #[default]
    Plus,
    Minus,
}

impl Strand {
    pub fn opposite(&self) -> Strand {
        match self {
            Strand::Plus => Strand::Minus,
            Strand::Minus => Strand::Plus,
        }
    }
}

impl Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strand::Plus => write!(f, "+"),
            Strand::Minus => write!(f, "-"),
        }
    }
}

impl FromStr for Strand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Plus),
            "-" => Ok(Strand::Minus),
            _ => Err(Error::InvalidStrand(s.to_string())),
        }
    }
}

/// A stranded interval on a named reference sequence, 1-based and closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Mapping {
    pub ref_name: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
}

impl Mapping {
    /// Build a new mapping, enforcing `start >= 1` and `end >= start - 1`.
    pub fn new(ref_name: &str, start: u64, end: u64, strand: Strand) -> Result<Self, Error> {
        if start < 1 || end + 1 < start {
            return Err(Error::InvalidMapping(ref_name.to_string(), start, end));
        }
        Ok(Self {
            ref_name: ref_name.to_string(),
            start,
            end,
            strand,
        })
    }

    pub fn length(&self) -> u64 {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Return the sub-mapping at the given 1-based `start` offset with the
    /// given `length`, optionally re-stranded.
    pub fn resolve(
        &self,
        start: u64,
        length: u64,
        strand: Option<Strand>,
    ) -> Result<Mapping, Error> {
        if start < 1 || start > self.length() {
            return Err(Error::InvalidRange(start, length, self.length()));
        }
        let abs_start = self.start + start - 1;
        let abs_end = abs_start + length - 1;
        if abs_end > self.end {
            return Err(Error::InvalidRange(start, length, self.length()));
        }
        Mapping::new(
            &self.ref_name,
            abs_start,
            abs_end,
            strand.unwrap_or(self.strand),
        )
    }

    /// Project an absolute position into this mapping, yielding its 1-based
    /// offset.
    pub fn project(&self, pos: u64) -> Result<u64, Error> {
        if pos < self.start || pos > self.end {
            return Err(Error::OutOfRange(pos, self.to_string()));
        }
        Ok(pos - self.start + 1)
    }

    pub fn on_same_reference(&self, other: &Mapping) -> bool {
        self.ref_name == other.ref_name
    }

    pub fn overlaps(&self, other: &Mapping) -> bool {
        self.on_same_reference(other) && self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, other: &Mapping) -> bool {
        self.on_same_reference(other) && other.start >= self.start && other.end <= self.end
    }

    pub fn contains_position(&self, pos: u64) -> bool {
        pos >= self.start && pos <= self.end
    }

    /// Adjacency in either direction on the same reference.
    pub fn abuts(&self, other: &Mapping) -> bool {
        self.on_same_reference(other)
            && (self.end + 1 == other.start || other.end + 1 == self.start)
    }

    /// Union of two overlapping or abutting mappings; keeps this strand.
    pub fn union(&self, other: &Mapping) -> Result<Mapping, Error> {
        if !self.on_same_reference(other) {
            return Err(Error::DifferentReferences(
                self.ref_name.clone(),
                other.ref_name.clone(),
            ));
        }
        if !self.overlaps(other) && !self.abuts(other) {
            return Err(Error::NoUnion(self.to_string(), other.to_string()));
        }
        Mapping::new(
            &self.ref_name,
            self.start.min(other.start),
            self.end.max(other.end),
            self.strand,
        )
    }

    pub fn shift(&self, delta: i64) -> Result<Mapping, Error> {
        let start = self.start as i64 + delta;
        if start < 1 {
            return Err(Error::InvalidShift(delta, self.to_string()));
        }
        Mapping::new(
            &self.ref_name,
            start as u64,
            (self.end as i64 + delta) as u64,
            self.strand,
        )
    }

    /// Position of the 5' base: `start` on the plus strand, `end` on minus.
    pub fn five_prime_position(&self) -> u64 {
        match self.strand {
            Strand::Plus => self.start,
            Strand::Minus => self.end,
        }
    }

    /// Order on a single reference: `(start, end, strand)` with `+` first.
    pub fn compare_on_reference(&self, other: &Mapping) -> Ordering {
        (self.start, self.end, self.strand).cmp(&(other.start, other.end, other.strand))
    }

    /// Order across references using the dictionary's contig order.
    pub fn compare(&self, other: &Mapping, dict: &SequenceDictionary) -> Result<Ordering, Error> {
        if self.ref_name == other.ref_name {
            return Ok(self.compare_on_reference(other));
        }
        let lhs = dict
            .index_of(&self.ref_name)
            .ok_or_else(|| Error::UnknownReference(self.ref_name.clone()))?;
        let rhs = dict
            .index_of(&other.ref_name)
            .ok_or_else(|| Error::UnknownReference(other.ref_name.clone()))?;
        Ok(lhs.cmp(&rhs))
    }
}

impl Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.ref_name, self.start, self.end, self.strand
        )
    }
}

impl FromStr for Mapping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [ref_name, range, strand] = parts.as_slice() else {
            return Err(Error::InvalidFormat(s.to_string()));
        };
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| Error::InvalidFormat(s.to_string()))?;
        let start = start
            .parse::<u64>()
            .map_err(|_| Error::InvalidFormat(s.to_string()))?;
        let end = end
            .parse::<u64>()
            .map_err(|_| Error::InvalidFormat(s.to_string()))?;
        Mapping::new(ref_name, start, end, strand.parse()?)
    }
}
