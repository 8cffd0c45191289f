//! Lookup of germline variants overlapping an interval, with filtering by
//! minor-allele frequency.
//!
//! Two implementations of [`VariantLookup`] are provided: an in-memory
//! overlap index built once from whole files ([`cached::CachedVariantLookup`])
//! and positional fetches against indexed files on disk
//! ([`file::FileVariantLookup`]).

pub mod cached;
pub mod file;

use rust_htslib::bcf::{self, record::GenotypeAllele};

use crate::mapping::{Mapping, Strand};

pub use self::error::Error;

mod error {
    /// Error type for variant sources.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not open variant file: {0}")]
        Open(String),
        #[error("problem accessing variant data")]
        Htslib(#[from] rust_htslib::errors::Error),
        #[error("malformed variant record: {0}")]
        MalformedRecord(String),
    }
}

/// Classification of a variant by its allele lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum VariantType {
    Snp,
    Insertion,
    Deletion,
    Other,
}

/// A single germline variant with its first alternative allele.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Variant {
    pub id: String,
    pub chrom: String,
    /// 1-based position of the reference allele's first base.
    pub pos: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub maf: Option<f64>,
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match (self.ref_allele.len(), self.alt_allele.len()) {
            (1, 1) => VariantType::Snp,
            (1, _) => VariantType::Insertion,
            (_, 1) => VariantType::Deletion,
            _ => VariantType::Other,
        }
    }

    /// The genomic span used for overlap queries: SNPs and insertions sit at
    /// `pos`, everything else covers the reference allele.
    pub fn to_mapping(&self) -> Mapping {
        let end = match self.variant_type() {
            VariantType::Snp | VariantType::Insertion => self.pos,
            VariantType::Deletion | VariantType::Other => {
                self.pos + self.ref_allele.len() as u64 - 1
            }
        };
        Mapping::new(&self.chrom, self.pos, end, Strand::Plus)
            .expect("variant span is a valid mapping")
    }
}

/// A raw record from a variant source before conversion to [`Variant`],
/// carrying the annotations that minor-allele frequency can be derived from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantRecord {
    pub chrom: String,
    /// 1-based position.
    pub pos: u64,
    pub id: String,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
    /// `CAF` entries; the first is the reference allele frequency.
    pub caf: Option<Vec<Option<f64>>>,
    /// `AF` entries, one per alternative allele.
    pub af: Option<Vec<f64>>,
    /// `AC` entries, one per alternative allele.
    pub ac: Option<Vec<i64>>,
    /// `AN`, the total number of called alleles.
    pub an: Option<i64>,
    /// Genotype allele indexes per sample; `None` marks a missing call.
    pub genotypes: Vec<Vec<Option<i32>>>,
    /// Whether the record's filters are empty or all-passing.
    pub passing: bool,
}

impl VariantRecord {
    /// Decode a BCF/VCF record.
    pub fn from_bcf(record: &bcf::Record) -> Result<Self, Error> {
        let header = record.header();
        let rid = record
            .rid()
            .ok_or_else(|| Error::MalformedRecord("record without a contig".to_string()))?;
        let chrom = String::from_utf8_lossy(header.rid2name(rid)?).to_string();
        let pos = record.pos() as u64 + 1;
        let id = String::from_utf8_lossy(&record.id()).to_string();

        let alleles = record.alleles();
        if alleles.is_empty() {
            return Err(Error::MalformedRecord(format!(
                "record at {}:{} without alleles",
                chrom, pos
            )));
        }
        let ref_allele = String::from_utf8_lossy(alleles[0]).to_string();
        let alt_alleles = alleles[1..]
            .iter()
            .map(|a| String::from_utf8_lossy(a).to_string())
            .collect();

        let caf = match record.info(b"CAF").string() {
            Ok(Some(values)) => Some(
                values
                    .iter()
                    .map(|v| {
                        std::str::from_utf8(v)
                            .ok()
                            .and_then(|s| s.trim().parse::<f64>().ok())
                    })
                    .collect(),
            ),
            _ => None,
        };
        let af = match record.info(b"AF").float() {
            Ok(Some(values)) => Some(values.iter().map(|v| *v as f64).collect()),
            _ => None,
        };
        let ac = match record.info(b"AC").integer() {
            Ok(Some(values)) => Some(values.iter().map(|v| *v as i64).collect()),
            _ => None,
        };
        let an = match record.info(b"AN").integer() {
            Ok(Some(values)) => values.first().map(|v| *v as i64),
            _ => None,
        };

        let mut genotypes = Vec::new();
        if let Ok(gts) = record.genotypes() {
            for i in 0..header.sample_count() as usize {
                genotypes.push(
                    gts.get(i)
                        .iter()
                        .map(|allele| match allele {
                            GenotypeAllele::Unphased(j) | GenotypeAllele::Phased(j) => Some(*j),
                            GenotypeAllele::UnphasedMissing | GenotypeAllele::PhasedMissing => None,
                        })
                        .collect(),
                );
            }
        }

        let passing = record
            .filters()
            .all(|filter| header.id_to_name(filter) == b"PASS");

        Ok(Self {
            chrom,
            pos,
            id,
            ref_allele,
            alt_alleles,
            caf,
            af,
            ac,
            an,
            genotypes,
            passing,
        })
    }

    /// Derive the minor-allele frequency, trying in order: `1 - first(CAF)`,
    /// the sum of `AF`, `sum(AC)/AN`, and the fraction of non-reference
    /// calls among non-missing genotype calls.
    pub fn maf(&self) -> Option<f64> {
        if let Some(caf) = &self.caf {
            if let Some(Some(ref_freq)) = caf.first() {
                return Some(1.0 - ref_freq);
            }
        }
        if let Some(af) = &self.af {
            if !af.is_empty() {
                return Some(af.iter().sum());
            }
        }
        if let (Some(ac), Some(an)) = (&self.ac, self.an) {
            if an > 0 && !ac.is_empty() {
                return Some(ac.iter().sum::<i64>() as f64 / an as f64);
            }
        }
        let mut non_missing = 0u64;
        let mut non_ref = 0u64;
        for sample in &self.genotypes {
            for allele in sample.iter().flatten() {
                non_missing += 1;
                if *allele != 0 {
                    non_ref += 1;
                }
            }
        }
        if non_missing > 0 {
            return Some(non_ref as f64 / non_missing as f64);
        }
        None
    }

    /// Convert to the internal form, keeping the first alternative allele.
    /// Records without an alternative allele yield `None`.
    pub fn to_variant(&self) -> Option<Variant> {
        let alt_allele = self.alt_alleles.first()?.clone();
        Some(Variant {
            id: self.id.clone(),
            chrom: self.chrom.clone(),
            pos: self.pos,
            ref_allele: self.ref_allele.clone(),
            alt_allele,
            maf: self.maf(),
        })
    }
}

/// Whether a variant with the given MAF survives the query's filter.
pub fn passes_maf_filter(maf: Option<f64>, min_maf: f64, include_missing_mafs: bool) -> bool {
    if min_maf <= 0.0 {
        return true;
    }
    match maf {
        Some(maf) => maf >= min_maf,
        None => include_missing_mafs,
    }
}

/// Query access to variants overlapping a genomic interval.
pub trait VariantLookup {
    /// Return the variants whose genomic span overlaps the 1-based closed
    /// interval `start..=end`, filtered by minor-allele frequency.
    fn query(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
        min_maf: f64,
        include_missing_mafs: bool,
    ) -> Result<Vec<Variant>, Error>;
}
