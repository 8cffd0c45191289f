//! Request-side types for the primer picker: parameter triples, scoring
//! weights, task selection, and the catalog of input-tag names.

use std::fmt::Display;
use std::sync::LazyLock;

use ahash::AHashSet;

use crate::primer3::Error;

/// A min/optimal/max triple.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MinOptMax<T> {
    pub min: T,
    pub opt: T,
    pub max: T,
}

impl<T: PartialOrd + Copy + Display> MinOptMax<T> {
    pub fn new(min: T, opt: T, max: T) -> Result<Self, Error> {
        if min > opt || opt > max {
            return Err(Error::InvalidParameter(format!(
                "min <= opt <= max must hold, got {}/{}/{}",
                min, opt, max
            )));
        }
        Ok(Self { min, opt, max })
    }
}

/// Design constraints handed to the picker, plus the post-hoc constraints the
/// picker cannot express itself (the dinucleotide-run limit).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Parameters {
    pub amplicon_sizes: MinOptMax<u64>,
    /// `opt == 0` disables the product-Tm constraint.
    pub amplicon_tms: MinOptMax<f64>,
    pub primer_sizes: MinOptMax<u64>,
    pub primer_tms: MinOptMax<f64>,
    /// In percent, 0..=100.
    pub primer_gcs: MinOptMax<f64>,
    /// Min/max number of G or C bases in the 3'-most five bases.
    pub gc_clamp: (u32, u32),
    pub max_poly_x: u32,
    pub max_ns: u32,
    /// Maximum number of bases in a dinucleotide repeat run; enforced by a
    /// post-filter, not by the picker.
    pub max_dinuc_bases: u32,
    /// Whether primers whose 3' end covers soft-masked (lower-case)
    /// reference bases are rejected.
    pub avoid_masked_bases: bool,
    pub num_to_return: u32,
}

impl Parameters {
    /// Validate the triples; `amplicon_tms.opt == 0` turns that triple into
    /// a disabled constraint and is exempt from the ordering check.
    pub fn validate(&self) -> Result<(), Error> {
        MinOptMax::new(
            self.amplicon_sizes.min,
            self.amplicon_sizes.opt,
            self.amplicon_sizes.max,
        )?;
        if self.amplicon_tms.opt != 0.0 {
            MinOptMax::new(
                self.amplicon_tms.min,
                self.amplicon_tms.opt,
                self.amplicon_tms.max,
            )?;
        } else if self.amplicon_tms.min > self.amplicon_tms.max {
            return Err(Error::InvalidParameter(format!(
                "min <= max must hold for amplicon Tm, got {}/{}",
                self.amplicon_tms.min, self.amplicon_tms.max
            )));
        }
        MinOptMax::new(
            self.primer_sizes.min,
            self.primer_sizes.opt,
            self.primer_sizes.max,
        )?;
        MinOptMax::new(self.primer_tms.min, self.primer_tms.opt, self.primer_tms.max)?;
        MinOptMax::new(self.primer_gcs.min, self.primer_gcs.opt, self.primer_gcs.max)?;
        if self.gc_clamp.0 > self.gc_clamp.1 {
            return Err(Error::InvalidParameter(format!(
                "GC clamp min {} exceeds max {}",
                self.gc_clamp.0, self.gc_clamp.1
            )));
        }
        Ok(())
    }

    /// Render the picker-facing tags in a stable order.
    pub fn to_tags(&self) -> Vec<(String, String)> {
        let mut tags = vec![
            ("PRIMER_NUM_RETURN".to_string(), self.num_to_return.to_string()),
            (
                "PRIMER_PRODUCT_SIZE_RANGE".to_string(),
                format!("{}-{}", self.amplicon_sizes.min, self.amplicon_sizes.max),
            ),
            (
                "PRIMER_PRODUCT_OPT_SIZE".to_string(),
                self.amplicon_sizes.opt.to_string(),
            ),
        ];
        if self.amplicon_tms.opt != 0.0 {
            tags.push((
                "PRIMER_PRODUCT_MIN_TM".to_string(),
                self.amplicon_tms.min.to_string(),
            ));
            tags.push((
                "PRIMER_PRODUCT_OPT_TM".to_string(),
                self.amplicon_tms.opt.to_string(),
            ));
            tags.push((
                "PRIMER_PRODUCT_MAX_TM".to_string(),
                self.amplicon_tms.max.to_string(),
            ));
        }
        tags.extend([
            ("PRIMER_MIN_SIZE".to_string(), self.primer_sizes.min.to_string()),
            ("PRIMER_OPT_SIZE".to_string(), self.primer_sizes.opt.to_string()),
            ("PRIMER_MAX_SIZE".to_string(), self.primer_sizes.max.to_string()),
            ("PRIMER_MIN_TM".to_string(), self.primer_tms.min.to_string()),
            ("PRIMER_OPT_TM".to_string(), self.primer_tms.opt.to_string()),
            ("PRIMER_MAX_TM".to_string(), self.primer_tms.max.to_string()),
            ("PRIMER_MIN_GC".to_string(), self.primer_gcs.min.to_string()),
            (
                "PRIMER_OPT_GC_PERCENT".to_string(),
                self.primer_gcs.opt.to_string(),
            ),
            ("PRIMER_MAX_GC".to_string(), self.primer_gcs.max.to_string()),
            ("PRIMER_GC_CLAMP".to_string(), self.gc_clamp.0.to_string()),
            ("PRIMER_MAX_END_GC".to_string(), self.gc_clamp.1.to_string()),
            ("PRIMER_MAX_POLY_X".to_string(), self.max_poly_x.to_string()),
            ("PRIMER_MAX_NS_ACCEPTED".to_string(), self.max_ns.to_string()),
            (
                "PRIMER_LOWERCASE_MASKING".to_string(),
                if self.avoid_masked_bases { "1" } else { "0" }.to_string(),
            ),
        ]);
        tags
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            amplicon_sizes: MinOptMax {
                min: 100,
                opt: 150,
                max: 250,
            },
            amplicon_tms: MinOptMax {
                min: 0.0,
                opt: 0.0,
                max: 100.0,
            },
            primer_sizes: MinOptMax {
                min: 18,
                opt: 22,
                max: 30,
            },
            primer_tms: MinOptMax {
                min: 57.0,
                opt: 60.0,
                max: 63.0,
            },
            primer_gcs: MinOptMax {
                min: 20.0,
                opt: 50.0,
                max: 80.0,
            },
            gc_clamp: (0, 5),
            max_poly_x: 5,
            max_ns: 1,
            max_dinuc_bases: 6,
            avoid_masked_bases: true,
            num_to_return: 5,
        }
    }
}

/// Per-criterion penalty multipliers for the picker's scoring function.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Weights {
    pub product_size_lt: f64,
    pub product_size_gt: f64,
    pub product_tm_lt: f64,
    pub product_tm_gt: f64,
    pub primer_end_stability: f64,
    pub primer_gc_lt: f64,
    pub primer_gc_gt: f64,
    pub primer_self_any: f64,
    pub primer_self_end: f64,
    pub primer_size_lt: f64,
    pub primer_size_gt: f64,
    pub primer_tm_lt: f64,
    pub primer_tm_gt: f64,
}

impl Weights {
    /// Render the picker-facing tags in a stable order.
    pub fn to_tags(&self) -> Vec<(String, String)> {
        vec![
            (
                "PRIMER_PAIR_WT_PRODUCT_SIZE_LT".to_string(),
                self.product_size_lt.to_string(),
            ),
            (
                "PRIMER_PAIR_WT_PRODUCT_SIZE_GT".to_string(),
                self.product_size_gt.to_string(),
            ),
            (
                "PRIMER_PAIR_WT_PRODUCT_TM_LT".to_string(),
                self.product_tm_lt.to_string(),
            ),
            (
                "PRIMER_PAIR_WT_PRODUCT_TM_GT".to_string(),
                self.product_tm_gt.to_string(),
            ),
            (
                "PRIMER_WT_END_STABILITY".to_string(),
                self.primer_end_stability.to_string(),
            ),
            (
                "PRIMER_WT_GC_PERCENT_LT".to_string(),
                self.primer_gc_lt.to_string(),
            ),
            (
                "PRIMER_WT_GC_PERCENT_GT".to_string(),
                self.primer_gc_gt.to_string(),
            ),
            ("PRIMER_WT_SELF_ANY".to_string(), self.primer_self_any.to_string()),
            ("PRIMER_WT_SELF_END".to_string(), self.primer_self_end.to_string()),
            ("PRIMER_WT_SIZE_LT".to_string(), self.primer_size_lt.to_string()),
            ("PRIMER_WT_SIZE_GT".to_string(), self.primer_size_gt.to_string()),
            ("PRIMER_WT_TM_LT".to_string(), self.primer_tm_lt.to_string()),
            ("PRIMER_WT_TM_GT".to_string(), self.primer_tm_gt.to_string()),
        ]
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            product_size_lt: 1.0,
            product_size_gt: 1.0,
            product_tm_lt: 0.0,
            product_tm_gt: 0.0,
            primer_end_stability: 0.25,
            primer_gc_lt: 0.25,
            primer_gc_gt: 0.25,
            primer_self_any: 0.1,
            primer_self_end: 0.1,
            primer_size_lt: 0.5,
            primer_size_gt: 0.1,
            primer_tm_lt: 1.0,
            primer_tm_gt: 1.0,
        }
    }
}

/// What the picker is asked to produce for one design region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DesignTask {
    /// Left and right primers bounding the target.
    PairPrimers,
    /// Left primers only, upstream of the target.
    PickLeft,
    /// Right primers only, downstream of the target.
    PickRight,
}

impl DesignTask {
    /// Task tags.  `target_offset` is the 1-based start of the target within
    /// the region; `target_length` and `region_length` complete the picture.
    pub(crate) fn to_tags(
        &self,
        target_offset: u64,
        target_length: u64,
        region_length: u64,
    ) -> Vec<(String, String)> {
        let (task, left, right, scope) = match self {
            DesignTask::PairPrimers => (
                "generic",
                1,
                1,
                (
                    "SEQUENCE_TARGET".to_string(),
                    format!("{},{}", target_offset, target_length),
                ),
            ),
            DesignTask::PickLeft => (
                "pick_primer_list",
                1,
                0,
                (
                    "SEQUENCE_INCLUDED_REGION".to_string(),
                    format!("1,{}", target_offset - 1),
                ),
            ),
            DesignTask::PickRight => {
                let target_end = target_offset + target_length - 1;
                (
                    "pick_primer_list",
                    0,
                    1,
                    (
                        "SEQUENCE_INCLUDED_REGION".to_string(),
                        format!("{},{}", target_end + 1, region_length - target_end),
                    ),
                )
            }
        };
        vec![
            ("PRIMER_TASK".to_string(), task.to_string()),
            ("PRIMER_PICK_LEFT_PRIMER".to_string(), left.to_string()),
            ("PRIMER_PICK_RIGHT_PRIMER".to_string(), right.to_string()),
            ("PRIMER_PICK_INTERNAL_OLIGO".to_string(), "0".to_string()),
            scope,
        ]
    }

    /// The response tag carrying the number of returned candidates.
    pub(crate) fn count_tag(&self) -> &'static str {
        match self {
            DesignTask::PairPrimers => "PRIMER_PAIR_NUM_RETURNED",
            DesignTask::PickLeft => "PRIMER_LEFT_NUM_RETURNED",
            DesignTask::PickRight => "PRIMER_RIGHT_NUM_RETURNED",
        }
    }
}

/// All input-tag names from the upstream tool's manual (sequence scope,
/// global scope, and weights).  Used to tell echoed request tags apart from
/// response keys; a response key found in this set is discarded.
pub(crate) static INPUT_TAGS: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| {
    [
        // sequence scope
        "SEQUENCE_EXCLUDED_REGION",
        "SEQUENCE_FORCE_LEFT_END",
        "SEQUENCE_FORCE_LEFT_START",
        "SEQUENCE_FORCE_RIGHT_END",
        "SEQUENCE_FORCE_RIGHT_START",
        "SEQUENCE_ID",
        "SEQUENCE_INCLUDED_REGION",
        "SEQUENCE_INTERNAL_EXCLUDED_REGION",
        "SEQUENCE_INTERNAL_OLIGO",
        "SEQUENCE_OVERLAP_JUNCTION_LIST",
        "SEQUENCE_PRIMER",
        "SEQUENCE_PRIMER_PAIR_OK_REGION_LIST",
        "SEQUENCE_PRIMER_REVCOMP",
        "SEQUENCE_QUALITY",
        "SEQUENCE_START_CODON_POSITION",
        "SEQUENCE_TARGET",
        "SEQUENCE_TEMPLATE",
        // global scope
        "PRIMER_DNA_CONC",
        "PRIMER_DNTP_CONC",
        "PRIMER_EXPLAIN_FLAG",
        "PRIMER_FIRST_BASE_INDEX",
        "PRIMER_GC_CLAMP",
        "PRIMER_INSIDE_PENALTY",
        "PRIMER_INTERNAL_MAX_SELF_ANY",
        "PRIMER_INTERNAL_MAX_SELF_END",
        "PRIMER_INTERNAL_MAX_SIZE",
        "PRIMER_INTERNAL_MAX_TM",
        "PRIMER_INTERNAL_MIN_GC",
        "PRIMER_INTERNAL_MIN_SIZE",
        "PRIMER_INTERNAL_MIN_TM",
        "PRIMER_INTERNAL_OPT_GC_PERCENT",
        "PRIMER_INTERNAL_OPT_SIZE",
        "PRIMER_INTERNAL_OPT_TM",
        "PRIMER_LIBERAL_BASE",
        "PRIMER_LOWERCASE_MASKING",
        "PRIMER_MAX_END_GC",
        "PRIMER_MAX_END_STABILITY",
        "PRIMER_MAX_GC",
        "PRIMER_MAX_HAIRPIN_TH",
        "PRIMER_MAX_LIBRARY_MISPRIMING",
        "PRIMER_MAX_NS_ACCEPTED",
        "PRIMER_MAX_POLY_X",
        "PRIMER_MAX_SELF_ANY",
        "PRIMER_MAX_SELF_ANY_TH",
        "PRIMER_MAX_SELF_END",
        "PRIMER_MAX_SELF_END_TH",
        "PRIMER_MAX_SIZE",
        "PRIMER_MAX_TEMPLATE_MISPRIMING",
        "PRIMER_MAX_TM",
        "PRIMER_MIN_3_PRIME_OVERLAP_OF_JUNCTION",
        "PRIMER_MIN_5_PRIME_OVERLAP_OF_JUNCTION",
        "PRIMER_MIN_GC",
        "PRIMER_MIN_LEFT_THREE_PRIME_DISTANCE",
        "PRIMER_MIN_RIGHT_THREE_PRIME_DISTANCE",
        "PRIMER_MIN_SIZE",
        "PRIMER_MIN_THREE_PRIME_DISTANCE",
        "PRIMER_MIN_TM",
        "PRIMER_NUM_RETURN",
        "PRIMER_OPT_GC_PERCENT",
        "PRIMER_OPT_SIZE",
        "PRIMER_OPT_TM",
        "PRIMER_OUTSIDE_PENALTY",
        "PRIMER_PAIR_MAX_COMPL_ANY",
        "PRIMER_PAIR_MAX_COMPL_ANY_TH",
        "PRIMER_PAIR_MAX_COMPL_END",
        "PRIMER_PAIR_MAX_COMPL_END_TH",
        "PRIMER_PAIR_MAX_DIFF_TM",
        "PRIMER_PAIR_MAX_LIBRARY_MISPRIMING",
        "PRIMER_PAIR_MAX_TEMPLATE_MISPRIMING",
        "PRIMER_PICK_ANYWAY",
        "PRIMER_PICK_INTERNAL_OLIGO",
        "PRIMER_PICK_LEFT_PRIMER",
        "PRIMER_PICK_RIGHT_PRIMER",
        "PRIMER_PRODUCT_MAX_TM",
        "PRIMER_PRODUCT_MIN_TM",
        "PRIMER_PRODUCT_OPT_SIZE",
        "PRIMER_PRODUCT_OPT_TM",
        "PRIMER_PRODUCT_SIZE_RANGE",
        "PRIMER_SALT_CORRECTIONS",
        "PRIMER_SALT_DIVALENT",
        "PRIMER_SALT_MONOVALENT",
        "PRIMER_SEQUENCING_ACCURACY",
        "PRIMER_SEQUENCING_INTERVAL",
        "PRIMER_SEQUENCING_LEAD",
        "PRIMER_SEQUENCING_SPACING",
        "PRIMER_TASK",
        "PRIMER_THERMODYNAMIC_OLIGO_ALIGNMENT",
        "PRIMER_THERMODYNAMIC_TEMPLATE_ALIGNMENT",
        "PRIMER_TM_FORMULA",
        // weights
        "PRIMER_PAIR_WT_COMPL_ANY",
        "PRIMER_PAIR_WT_COMPL_END",
        "PRIMER_PAIR_WT_DIFF_TM",
        "PRIMER_PAIR_WT_LIBRARY_MISPRIMING",
        "PRIMER_PAIR_WT_PRODUCT_SIZE_GT",
        "PRIMER_PAIR_WT_PRODUCT_SIZE_LT",
        "PRIMER_PAIR_WT_PRODUCT_TM_GT",
        "PRIMER_PAIR_WT_PRODUCT_TM_LT",
        "PRIMER_PAIR_WT_PR_PENALTY",
        "PRIMER_PAIR_WT_TEMPLATE_MISPRIMING",
        "PRIMER_WT_END_QUAL",
        "PRIMER_WT_END_STABILITY",
        "PRIMER_WT_GC_PERCENT_GT",
        "PRIMER_WT_GC_PERCENT_LT",
        "PRIMER_WT_HAIRPIN_TH",
        "PRIMER_WT_LIBRARY_MISPRIMING",
        "PRIMER_WT_NUM_NS",
        "PRIMER_WT_POS_PENALTY",
        "PRIMER_WT_SELF_ANY",
        "PRIMER_WT_SELF_END",
        "PRIMER_WT_SEQ_QUAL",
        "PRIMER_WT_SIZE_GT",
        "PRIMER_WT_SIZE_LT",
        "PRIMER_WT_TEMPLATE_MISPRIMING",
        "PRIMER_WT_TM_GT",
        "PRIMER_WT_TM_LT",
    ]
    .into_iter()
    .collect()
});
