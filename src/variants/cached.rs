//! In-memory variant lookup backed by per-contig interval trees.

use std::path::Path;

use ahash::AHashMap;
use bio::data_structures::interval_tree::ArrayBackedIntervalTree;
use rust_htslib::bcf::{self, Read};

use crate::variants::{passes_maf_filter, Error, Variant, VariantLookup, VariantRecord};

/// Type alias for the per-contig overlap index.
type IntervalTree = ArrayBackedIntervalTree<u64, usize>;

/// Variant lookup that consumes its input files once at construction time,
/// keeps the passing records, and answers queries from an interval tree per
/// contig.
pub struct CachedVariantLookup {
    variants: Vec<Variant>,
    trees: AHashMap<String, IntervalTree>,
}

impl CachedVariantLookup {
    /// Load all passing records from the given VCF/BCF files.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, Error> {
        let mut variants = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let mut reader = bcf::Reader::from_path(path)
                .map_err(|e| Error::Open(format!("{}: {}", path.display(), e)))?;
            for result in reader.records() {
                let record = result?;
                let record = VariantRecord::from_bcf(&record)?;
                if !record.passing {
                    continue;
                }
                if let Some(variant) = record.to_variant() {
                    variants.push(variant);
                }
            }
            log::debug!(
                "loaded {} variants through {}",
                variants.len(),
                path.display()
            );
        }
        Ok(Self::from_variants(variants))
    }

    /// Index an already-converted set of variants.
    pub fn from_variants(variants: Vec<Variant>) -> Self {
        let mut trees: AHashMap<String, IntervalTree> = AHashMap::new();
        for (i, variant) in variants.iter().enumerate() {
            let mapping = variant.to_mapping();
            let tree = trees
                .entry(variant.chrom.clone())
                .or_insert_with(IntervalTree::new);
            tree.insert(mapping.start..mapping.end + 1, i);
        }
        for tree in trees.values_mut() {
            tree.index();
        }
        Self { variants, trees }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

impl VariantLookup for CachedVariantLookup {
    fn query(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
        min_maf: f64,
        include_missing_mafs: bool,
    ) -> Result<Vec<Variant>, Error> {
        let Some(tree) = self.trees.get(chrom) else {
            return Ok(Vec::new());
        };
        let mut result = tree
            .find(start..end + 1)
            .iter()
            .map(|entry| self.variants[*entry.data()].clone())
            .filter(|v| passes_maf_filter(v.maf, min_maf, include_missing_mafs))
            .collect::<Vec<_>>();
        result.sort_by(|a, b| {
            (a.pos, &a.ref_allele, &a.alt_allele).cmp(&(b.pos, &b.ref_allele, &b.alt_allele))
        });
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::CachedVariantLookup;
    use crate::variants::{Variant, VariantLookup};

    fn variant(id: &str, pos: u64, maf: Option<f64>) -> Variant {
        Variant {
            id: id.to_string(),
            chrom: "chr1".to_string(),
            pos,
            ref_allele: "A".to_string(),
            alt_allele: "C".to_string(),
            maf,
        }
    }

    #[test]
    fn query_by_overlap() {
        let mut lookup = CachedVariantLookup::from_variants(vec![
            variant("rs1", 100, Some(0.5)),
            variant("rs2", 150, Some(0.5)),
            variant("rs3", 201, Some(0.5)),
        ]);
        let found = lookup.query("chr1", 100, 200, 0.0, false).unwrap();
        assert_eq!(
            found.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
            vec!["rs1", "rs2"]
        );
        assert!(lookup.query("chr2", 100, 200, 0.0, false).unwrap().is_empty());
    }

    #[test]
    fn query_spans_deletions() {
        let deletion = Variant {
            id: "del1".to_string(),
            chrom: "chr1".to_string(),
            pos: 95,
            ref_allele: "ACTGACTG".to_string(),
            alt_allele: "A".to_string(),
            maf: Some(0.5),
        };
        let mut lookup = CachedVariantLookup::from_variants(vec![deletion]);
        // span is 95..=102, overlapping a query starting at 100
        let found = lookup.query("chr1", 100, 200, 0.0, false).unwrap();
        assert_eq!(found.len(), 1);
        assert!(lookup.query("chr1", 103, 200, 0.0, false).unwrap().is_empty());
    }

    #[test]
    fn loads_vcf_files() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sites.vcf");
        let vcf = concat!(
            "##fileformat=VCFv4.2\n",
            "##INFO=<ID=CAF,Number=.,Type=String,Description=\"Allele frequencies\">\n",
            "##INFO=<ID=AF,Number=A,Type=Float,Description=\"Alternate frequency\">\n",
            "##INFO=<ID=AC,Number=A,Type=Integer,Description=\"Alternate count\">\n",
            "##INFO=<ID=AN,Number=1,Type=Integer,Description=\"Allele number\">\n",
            "##FILTER=<ID=q10,Description=\"Low quality\">\n",
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n",
            "##contig=<ID=chr1,length=10000>\n",
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n",
            "chr1\t100\trs1\tA\tC\t.\tPASS\tCAF=0.99,0.01\tGT\t0/0\t0/1\n",
            "chr1\t200\trs2\tA\tC\t.\t.\tAF=0.25\tGT\t0/0\t0/0\n",
            "chr1\t300\trs3\tA\tC\t.\tq10\tAF=0.5\tGT\t0/0\t0/0\n",
            "chr1\t400\trs4\tAT\tA\t.\tPASS\tAC=30;AN=100\tGT\t./.\t0/1\n",
            "chr1\t500\trs5\tA\tC\t.\tPASS\t.\tGT\t0/1\t1/1\n",
        );
        std::fs::write(&path, vcf)?;

        let mut lookup = CachedVariantLookup::from_paths(&[&path])?;
        // rs3 does not pass its filters
        assert_eq!(lookup.len(), 4);
        let found = lookup.query("chr1", 1, 1000, 0.0, false)?;
        assert_eq!(
            found.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
            vec!["rs1", "rs2", "rs4", "rs5"]
        );
        let mafs: Vec<f64> = found.iter().map(|v| v.maf.unwrap()).collect();
        assert!((mafs[0] - 0.01).abs() < 1e-6);
        assert!((mafs[1] - 0.25).abs() < 1e-6);
        assert!((mafs[2] - 0.30).abs() < 1e-6);
        assert!((mafs[3] - 0.75).abs() < 1e-6);
        assert_eq!(
            found[2].variant_type(),
            crate::variants::VariantType::Deletion
        );
        Ok(())
    }

    #[test]
    fn query_applies_maf_filter() {
        let mut lookup = CachedVariantLookup::from_variants(vec![
            variant("common", 100, Some(0.2)),
            variant("rare", 110, Some(0.001)),
            variant("unknown", 120, None),
        ]);
        let all = lookup.query("chr1", 1, 1000, 0.0, false).unwrap();
        assert_eq!(all.len(), 3);
        let common = lookup.query("chr1", 1, 1000, 0.01, false).unwrap();
        assert_eq!(
            common.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
            vec!["common"]
        );
        let with_missing = lookup.query("chr1", 1, 1000, 0.01, true).unwrap();
        assert_eq!(
            with_missing
                .iter()
                .map(|v| v.id.as_str())
                .collect::<Vec<_>>(),
            vec!["common", "unknown"]
        );
    }
}
