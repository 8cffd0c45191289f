//! Variant lookup backed by indexed files on disk.

use std::path::{Path, PathBuf};

use rust_htslib::bcf::{self, Read};

use crate::mapping::{Mapping, Strand};
use crate::variants::{passes_maf_filter, Error, Variant, VariantLookup, VariantRecord};

/// Variant lookup that keeps one indexed reader open per input file and
/// issues a positional fetch against each on every query.
pub struct FileVariantLookup {
    readers: Vec<(PathBuf, bcf::IndexedReader)>,
}

impl FileVariantLookup {
    /// Open indexed readers for the given VCF/BCF files.  Each file needs a
    /// tabix or CSI index next to it.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, Error> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let reader = bcf::IndexedReader::from_path(path)
                .map_err(|e| Error::Open(format!("{}: {}", path.display(), e)))?;
            readers.push((path.to_path_buf(), reader));
        }
        Ok(Self { readers })
    }
}

impl VariantLookup for FileVariantLookup {
    fn query(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
        min_maf: f64,
        include_missing_mafs: bool,
    ) -> Result<Vec<Variant>, Error> {
        let window = Mapping::new(chrom, start, end, Strand::Plus)
            .map_err(|e| Error::MalformedRecord(e.to_string()))?;
        let mut result = Vec::new();
        for (path, reader) in &mut self.readers {
            let rid = match reader.header().name2rid(chrom.as_bytes()) {
                Ok(rid) => rid,
                Err(_) => {
                    log::debug!("{} is not in {}", chrom, path.display());
                    continue;
                }
            };
            reader.fetch(rid, start - 1, Some(end))?;
            for record in reader.records() {
                let record = VariantRecord::from_bcf(&record?)?;
                if !record.passing {
                    continue;
                }
                let Some(variant) = record.to_variant() else {
                    continue;
                };
                if !variant.to_mapping().overlaps(&window) {
                    continue;
                }
                if passes_maf_filter(variant.maf, min_maf, include_missing_mafs) {
                    result.push(variant);
                }
            }
        }
        result.sort_by(|a, b| {
            (a.pos, &a.ref_allele, &a.alt_allele).cmp(&(b.pos, &b.ref_allele, &b.alt_allele))
        });
        Ok(result)
    }
}
