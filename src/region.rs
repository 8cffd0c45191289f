//! Construction of the design region around a target and masking of common
//! variants.
//!
//! The design region is the target expanded by the maximum amplicon length
//! on both sides, clamped to the containing reference sequence.  Two
//! equal-length sequences are kept for it: the bases as retrieved (callers
//! interpret lower-case as soft-masked) and a hard-masked copy in which the
//! positions of qualifying variants are replaced by `N` so that the primer
//! picker will not place primers across them.

use crate::mapping::{Mapping, Strand};
use crate::reference::ReferenceProvider;
use crate::variants::{Variant, VariantLookup, VariantType};

pub use self::error::Error;

mod error {
    /// Error type for design-region construction.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("problem accessing the reference")]
        Reference(#[from] crate::reference::Error),
        #[error("problem accessing variants")]
        Variants(#[from] crate::variants::Error),
        #[error("problem with coordinates")]
        Mapping(#[from] crate::mapping::Error),
    }
}

/// The template handed to the primer picker.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignRegion {
    /// The original target.
    pub target: Mapping,
    /// The expanded and clamped region.
    pub region: Mapping,
    /// Region bases as retrieved from the reference, case retained.
    pub soft_masked: String,
    /// Region bases with qualifying variant positions replaced by `N`.
    pub hard_masked: String,
}

impl DesignRegion {
    /// Expand `target` by `max_amplicon_len - target.length()` on each side,
    /// clamp to the reference sequence, fetch the bases, and mask the
    /// variants returned by `variants` for the expanded region.
    pub fn build(
        target: &Mapping,
        max_amplicon_len: u64,
        reference: &mut dyn ReferenceProvider,
        variants: Option<&mut dyn VariantLookup>,
        min_maf: f64,
        include_missing_mafs: bool,
    ) -> Result<Self, Error> {
        let ref_length = reference.length_of(&target.ref_name)?;
        let pad = max_amplicon_len.saturating_sub(target.length());
        let start = target.start.saturating_sub(pad).max(1);
        let end = (target.end + pad).min(ref_length);
        let region = Mapping::new(&target.ref_name, start, end, Strand::Plus)?;

        let soft_masked = reference.fetch_mapping(&region)?;
        let hard_masked = match variants {
            Some(lookup) => {
                let overlapping = lookup.query(
                    &region.ref_name,
                    region.start,
                    region.end,
                    min_maf,
                    include_missing_mafs,
                )?;
                mask(&region, &soft_masked, &overlapping)
            }
            None => soft_masked.clone(),
        };

        Ok(Self {
            target: target.clone(),
            region,
            soft_masked,
            hard_masked,
        })
    }

    /// 1-based start of the target within the region.
    pub fn target_offset(&self) -> u64 {
        self.target.start - self.region.start + 1
    }
}

/// Replace the reference-coordinate positions affected by `variants` with
/// `N`; positions outside of `region` are ignored.
fn mask(region: &Mapping, soft_masked: &str, variants: &[Variant]) -> String {
    let mut bases = soft_masked.as_bytes().to_vec();
    for variant in variants {
        let positions: Vec<u64> = match variant.variant_type() {
            VariantType::Snp => vec![variant.pos],
            // protect the bases flanking the inserted sequence
            VariantType::Insertion => vec![variant.pos, variant.pos + 1],
            // the deleted bases; the anchor base itself is left alone
            VariantType::Deletion => {
                (variant.pos + 1..=variant.pos + variant.ref_allele.len() as u64 - 1).collect()
            }
            VariantType::Other => {
                (variant.pos..=variant.pos + variant.ref_allele.len() as u64).collect()
            }
        };
        for pos in positions {
            if region.contains_position(pos) {
                bases[(pos - region.start) as usize] = b'N';
            }
        }
    }
    String::from_utf8(bases).expect("masking keeps the sequence ASCII")
}
