//! Primer and primer-pair value types.
//!
//! Both types are immutable and enforce their structural invariants at
//! construction time.  `bases` always refers to the sequence in the primer's
//! own 5'→3' orientation, i.e. reverse-complemented relative to the
//! reference when the mapping is on the negative strand.

use std::fmt::Display;
use std::str::FromStr;

use crate::mapping::{Mapping, Strand};
use crate::primer3::input::Parameters;
use crate::sequences;

pub use self::error::Error;

mod error {
    /// Error type for primer value types.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("invalid primer: {0}")]
        InvalidPrimer(String),
        #[error("invalid primer pair: {0}")]
        InvalidPrimerPair(String),
        #[error("primer is not parseable: {0}")]
        InvalidFormat(String),
        #[error("problem with coordinates")]
        Mapping(#[from] crate::mapping::Error),
    }
}

/// A single primer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Primer {
    bases: String,
    pub tm: f64,
    pub penalty: f64,
    pub mapping: Mapping,
    name: Option<String>,
    name_prefix: Option<String>,
    pub tail: Option<String>,
    pub parameters: Option<Parameters>,
}

impl Primer {
    /// Build a new primer.  `bases` must be empty (missing) or of the same
    /// length as the mapping.
    pub fn new(bases: &str, tm: f64, penalty: f64, mapping: Mapping) -> Result<Self, Error> {
        if !bases.is_empty() && bases.len() as u64 != mapping.length() {
            return Err(Error::InvalidPrimer(format!(
                "bases of length {} do not cover {}",
                bases.len(),
                mapping
            )));
        }
        Ok(Self {
            bases: bases.to_string(),
            tm,
            penalty,
            mapping,
            name: None,
            name_prefix: None,
            tail: None,
            parameters: None,
        })
    }

    /// Attach a name; mutually exclusive with a name prefix.
    pub fn with_name(mut self, name: &str) -> Result<Self, Error> {
        if self.name_prefix.is_some() {
            return Err(Error::InvalidPrimer(
                "name and name prefix are mutually exclusive".to_string(),
            ));
        }
        self.name = Some(name.to_string());
        Ok(self)
    }

    /// Attach a name prefix; mutually exclusive with a name.
    pub fn with_name_prefix(mut self, name_prefix: &str) -> Result<Self, Error> {
        if self.name.is_some() {
            return Err(Error::InvalidPrimer(
                "name and name prefix are mutually exclusive".to_string(),
            ));
        }
        self.name_prefix = Some(name_prefix.to_string());
        Ok(self)
    }

    /// Attach a 5' tail.
    pub fn with_tail(mut self, tail: &str) -> Self {
        self.tail = Some(tail.to_string());
        self
    }

    /// Attach the parameters the primer was designed with.
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn bases(&self) -> &str {
        &self.bases
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    pub fn length(&self) -> u64 {
        self.mapping.length()
    }

    pub fn gc_content(&self) -> f64 {
        sequences::gc_content(&self.bases)
    }

    pub fn longest_homopolymer(&self) -> usize {
        sequences::longest_homopolymer(&self.bases)
    }

    pub fn longest_dinuc_run(&self) -> usize {
        sequences::longest_dinuc_run(&self.bases)
    }

    /// Name for display and track output: the name, the name prefix, or the
    /// mapping.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.name_prefix.clone())
            .unwrap_or_else(|| self.mapping.to_string())
    }

    /// The primer as a 12-column BED line (0-based half-open coordinates at
    /// this boundary only).
    pub fn bed_12(&self) -> String {
        let start = self.mapping.start - 1;
        let end = self.mapping.end;
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.mapping.ref_name,
            start,
            end,
            self.display_name(),
            0,
            self.mapping.strand,
            start,
            end,
            "100,100,100",
            1,
            self.mapping.length(),
            0,
        )
    }
}

impl Display for Primer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.bases, self.tm, self.penalty, self.mapping
        )
    }
}

impl FromStr for Primer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('\t').collect();
        let [bases, tm, penalty, mapping] = fields.as_slice() else {
            return Err(Error::InvalidFormat(s.to_string()));
        };
        let tm = tm
            .parse::<f64>()
            .map_err(|_| Error::InvalidFormat(s.to_string()))?;
        let penalty = penalty
            .parse::<f64>()
            .map_err(|_| Error::InvalidFormat(s.to_string()))?;
        Primer::new(bases, tm, penalty, mapping.parse()?)
    }
}

/// A pair of primers bounding an amplicon; left is on the plus strand,
/// right on minus.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrimerPair {
    left: Primer,
    right: Primer,
    amplicon: Mapping,
    amplicon_sequence: String,
    pub tm: f64,
    pub penalty: f64,
    name: Option<String>,
    name_prefix: Option<String>,
}

impl PrimerPair {
    /// Build a new pair.  The amplicon spans from the left primer's start to
    /// the right primer's end; `amplicon_sequence` must be empty or cover it
    /// exactly.
    pub fn new(
        left: Primer,
        right: Primer,
        amplicon_sequence: &str,
        tm: f64,
        penalty: f64,
    ) -> Result<Self, Error> {
        if !left.mapping.on_same_reference(&right.mapping) {
            return Err(Error::InvalidPrimerPair(format!(
                "primers are on different references: {} vs {}",
                left.mapping, right.mapping
            )));
        }
        if left.mapping.strand != Strand::Plus || right.mapping.strand != Strand::Minus {
            return Err(Error::InvalidPrimerPair(format!(
                "left primer must be on + and right on -: {} vs {}",
                left.mapping, right.mapping
            )));
        }
        if right.mapping.end <= left.mapping.start {
            return Err(Error::InvalidPrimerPair(format!(
                "right primer must end after the left primer starts: {} vs {}",
                left.mapping, right.mapping
            )));
        }
        let amplicon = Mapping::new(
            &left.mapping.ref_name,
            left.mapping.start,
            right.mapping.end,
            Strand::Plus,
        )?;
        if !amplicon_sequence.is_empty() && amplicon_sequence.len() as u64 != amplicon.length() {
            return Err(Error::InvalidPrimerPair(format!(
                "amplicon sequence of length {} does not cover {}",
                amplicon_sequence.len(),
                amplicon
            )));
        }
        Ok(Self {
            left,
            right,
            amplicon,
            amplicon_sequence: amplicon_sequence.to_string(),
            tm,
            penalty,
            name: None,
            name_prefix: None,
        })
    }

    pub fn with_name(mut self, name: &str) -> Result<Self, Error> {
        if self.name_prefix.is_some() {
            return Err(Error::InvalidPrimerPair(
                "name and name prefix are mutually exclusive".to_string(),
            ));
        }
        self.name = Some(name.to_string());
        Ok(self)
    }

    pub fn with_name_prefix(mut self, name_prefix: &str) -> Result<Self, Error> {
        if self.name.is_some() {
            return Err(Error::InvalidPrimerPair(
                "name and name prefix are mutually exclusive".to_string(),
            ));
        }
        self.name_prefix = Some(name_prefix.to_string());
        Ok(self)
    }

    pub fn left(&self) -> &Primer {
        &self.left
    }

    pub fn right(&self) -> &Primer {
        &self.right
    }

    pub fn amplicon(&self) -> &Mapping {
        &self.amplicon
    }

    pub fn amplicon_sequence(&self) -> &str {
        &self.amplicon_sequence
    }

    pub fn length(&self) -> u64 {
        self.amplicon.length()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// GC content of the amplicon in percent, if its sequence is known.
    pub fn product_gc(&self) -> Option<f64> {
        if self.amplicon_sequence.is_empty() {
            None
        } else {
            Some(sequences::gc_content(&self.amplicon_sequence))
        }
    }

    /// The region between the primers; collapses to the midpoint when the
    /// primers overlap.
    pub fn inner(&self) -> Mapping {
        let ref_name = &self.amplicon.ref_name;
        if self.right.mapping.start > self.left.mapping.end + 1 {
            Mapping::new(
                ref_name,
                self.left.mapping.end + 1,
                self.right.mapping.start - 1,
                Strand::Plus,
            )
            .expect("inner region is a valid mapping")
        } else {
            let mid = (self.left.mapping.end + self.right.mapping.start) / 2;
            Mapping::new(ref_name, mid, mid, Strand::Plus)
                .expect("midpoint is a valid mapping")
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.name_prefix.clone())
            .unwrap_or_else(|| self.amplicon.to_string())
    }

    /// The pair as a 12-column BED line with one block per primer.
    pub fn bed_12(&self) -> String {
        let start = self.amplicon.start - 1;
        let end = self.amplicon.end;
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{},{}\t{},{}",
            self.amplicon.ref_name,
            start,
            end,
            self.display_name(),
            0,
            Strand::Plus,
            start,
            end,
            "100,100,100",
            2,
            self.left.length(),
            self.right.length(),
            0,
            self.right.mapping.start - self.amplicon.start,
        )
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Primer, PrimerPair};
    use crate::mapping::{Mapping, Strand};

    fn mapping(start: u64, end: u64, strand: Strand) -> Mapping {
        Mapping::new("chr1", start, end, strand).unwrap()
    }

    fn left() -> Primer {
        Primer::new(
            "ACGTACGTACGTACGTACGT",
            60.0,
            0.5,
            mapping(100, 119, Strand::Plus),
        )
        .unwrap()
    }

    fn right() -> Primer {
        Primer::new(
            "TTGCATTGCATTGCATTGCA",
            60.5,
            0.25,
            mapping(281, 300, Strand::Minus),
        )
        .unwrap()
    }

    #[test]
    fn primer_invariants() {
        assert!(Primer::new("ACGT", 60.0, 0.0, mapping(100, 103, Strand::Plus)).is_ok());
        // empty bases are allowed
        assert!(Primer::new("", 60.0, 0.0, mapping(100, 103, Strand::Plus)).is_ok());
        assert!(Primer::new("ACG", 60.0, 0.0, mapping(100, 103, Strand::Plus)).is_err());
        let named = left().with_name("p1").unwrap();
        assert!(named.with_name_prefix("pre").is_err());
        let prefixed = left().with_name_prefix("pre").unwrap();
        assert!(prefixed.with_name("p1").is_err());
    }

    #[test]
    fn pair_invariants() {
        let amplicon_sequence = "A".repeat(201);
        let pair = PrimerPair::new(left(), right(), &amplicon_sequence, 80.0, 0.75).unwrap();
        assert_eq!(pair.amplicon(), &mapping(100, 300, Strand::Plus));
        assert_eq!(pair.length(), 201);

        // amplicon sequence must cover the amplicon
        assert!(PrimerPair::new(left(), right(), "ACGT", 80.0, 0.75).is_err());
        // strand convention
        assert!(PrimerPair::new(right(), left(), "", 80.0, 0.75).is_err());
        let other_ref = Primer::new(
            "TTGCATTGCATTGCATTGCA",
            60.5,
            0.25,
            Mapping::new("chr2", 281, 300, Strand::Minus).unwrap(),
        )
        .unwrap();
        assert!(PrimerPair::new(left(), other_ref, "", 80.0, 0.75).is_err());
    }

    #[test]
    fn inner_region() {
        let pair = PrimerPair::new(left(), right(), "", 80.0, 0.75).unwrap();
        assert_eq!(pair.inner(), mapping(120, 280, Strand::Plus));

        // overlapping primers collapse to the midpoint
        let l = Primer::new("ACGTACGTAC", 60.0, 0.0, mapping(100, 109, Strand::Plus)).unwrap();
        let r = Primer::new("ACGTACGTAC", 60.0, 0.0, mapping(105, 114, Strand::Minus)).unwrap();
        let pair = PrimerPair::new(l, r, "", 80.0, 0.75).unwrap();
        assert_eq!(pair.inner(), mapping(107, 107, Strand::Plus));
    }

    #[test]
    fn product_gc_uses_amplicon_sequence() {
        let amplicon_sequence = "GC".repeat(100) + "T";
        let pair = PrimerPair::new(left(), right(), &amplicon_sequence, 80.0, 0.75).unwrap();
        let gc = pair.product_gc().unwrap();
        assert!((gc - 200.0 / 201.0 * 100.0).abs() < 1e-9);
        let pair = PrimerPair::new(left(), right(), "", 80.0, 0.75).unwrap();
        assert_eq!(pair.product_gc(), None);
    }

    #[test]
    fn primer_compact_string_round_trip() {
        let primer = left();
        let s = primer.to_string();
        assert_eq!(s, "ACGTACGTACGTACGTACGT\t60\t0.5\tchr1:100-119:+");
        assert_eq!(s.parse::<Primer>().unwrap(), primer);
    }

    #[test]
    fn bed_12_has_twelve_fields() {
        let primer_bed = left().bed_12();
        assert_eq!(primer_bed.split('\t').count(), 12);
        let pair = PrimerPair::new(left(), right(), "", 80.0, 0.75)
            .unwrap()
            .with_name("pair1")
            .unwrap();
        let pair_bed = pair.bed_12();
        assert_eq!(pair_bed.split('\t').count(), 12);
        let fields: Vec<&str> = pair_bed.split('\t').collect();
        assert_eq!(fields[0], "chr1");
        assert_eq!(fields[1], "99");
        assert_eq!(fields[2], "300");
        assert_eq!(fields[3], "pair1");
        assert_eq!(fields[9], "2");
        assert_eq!(fields[10], "20,20");
        assert_eq!(fields[11], "0,181");
    }
}
