//! Wrapper around the interactive short-read aligner used to enumerate
//! genomic hits for candidate primers.
//!
//! The aligner is a long-lived child process fed FASTQ records on stdin and
//! read back as SAM on stdout.  Queries are batched: all records of one
//! `map` call are written, the stream is flushed (blank lines force the
//! aligner to process pending records), and exactly one SAM record per
//! query is read back in submission order.

pub mod cigar;

use std::io::{BufRead, Write};
use std::path::Path;

use ahash::AHashMap;

use crate::align::cigar::{parse_cigar_string, CigarString};
use crate::mapping::{Mapping, Strand};
use crate::reference::SequenceDictionary;
use crate::sequences;
use crate::subprocess::Subprocess;

pub use self::error::Error;

mod error {
    /// Error type for the aligner wrapper.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("problem with the aligner process")]
        Subprocess(#[from] crate::subprocess::Error),
        #[error("I/O error talking to the aligner")]
        Io(#[from] std::io::Error),
        #[error("aligner stream ended unexpectedly")]
        PrematureEof,
        #[error("aligner returned record {found} while {expected} was expected")]
        OutOfOrder { expected: String, found: String },
        #[error("mapped record {0} carries no hit count")]
        MissingHitCount(String),
        #[error("malformed SAM record: {0}")]
        MalformedSam(String),
        #[error("malformed XA entry: {0}")]
        MalformedXa(String),
        #[error("malformed CIGAR: {0}")]
        Cigar(String),
        #[error("malformed aligner header: {0}")]
        Header(String),
    }
}

/// A single alignment of a query to the reference.
///
/// Coordinates always describe the original query: when the query was
/// submitted reverse-complemented, construction with `rc = true` inverts
/// the strand flag and element-reverses the CIGAR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignerHit {
    pub chrom: String,
    /// 1-based position of the leftmost aligned reference base.
    pub start: u64,
    pub negative: bool,
    pub cigar: CigarString,
    /// Total edit distance.
    pub edits: u32,
}

impl AlignerHit {
    pub fn new(
        chrom: &str,
        start: u64,
        negative: bool,
        cigar: CigarString,
        edits: u32,
        rc: bool,
    ) -> Self {
        let (negative, cigar) = if rc {
            (!negative, cigar.reversed())
        } else {
            (negative, cigar)
        };
        Self {
            chrom: chrom.to_string(),
            start,
            negative,
            cigar,
            edits,
        }
    }

    pub fn end(&self) -> u64 {
        self.start + self.cigar.reference_length() - 1
    }

    /// Mismatches are the edits that are not accounted for by indels.
    pub fn mismatches(&self) -> u32 {
        (self.edits as u64).saturating_sub(self.cigar.indel_bases()) as u32
    }

    pub fn strand(&self) -> Strand {
        if self.negative {
            Strand::Minus
        } else {
            Strand::Plus
        }
    }

    pub fn to_mapping(&self) -> Mapping {
        Mapping::new(&self.chrom, self.start, self.end(), self.strand())
            .expect("an aligner hit covers a valid mapping")
    }
}

/// All hits for one query.  `hit_count` may exceed `hits.len()` when the
/// aligner truncated reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignerResult {
    pub query: String,
    pub hit_count: usize,
    pub hits: Vec<AlignerHit>,
}

impl AlignerResult {
    /// The reported hit with the fewest mismatches.
    pub fn best_hit(&self) -> Option<&AlignerHit> {
        self.hits.iter().min_by_key(|h| h.mismatches())
    }
}

/// Batch alignment of query sequences, preserving submission order.
pub trait Aligner {
    fn map(&mut self, queries: &[String]) -> Result<Vec<AlignerResult>, Error>;
}

/// A minimal SAM record as read back from the aligner.
#[derive(Debug, Clone)]
struct SamRecord {
    name: String,
    flag: u16,
    chrom: String,
    pos: u64,
    cigar: Option<CigarString>,
    attributes: AHashMap<String, String>,
}

impl SamRecord {
    fn is_unmapped(&self) -> bool {
        self.flag & 0x4 != 0
    }

    fn is_reverse(&self) -> bool {
        self.flag & 0x10 != 0
    }

    fn int_attribute(&self, tag: &str) -> Result<Option<i64>, Error> {
        match self.attributes.get(tag) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| Error::MalformedSam(format!("attribute {}:{}", tag, value))),
        }
    }

    fn str_attribute(&self, tag: &str) -> Option<&str> {
        self.attributes.get(tag).map(|v| v.as_str())
    }
}

fn parse_sam_record(line: &str) -> Result<SamRecord, Error> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 11 {
        return Err(Error::MalformedSam(format!(
            "expected at least 11 fields, got {}",
            fields.len()
        )));
    }
    let flag: u16 = fields[1]
        .parse()
        .map_err(|_| Error::MalformedSam(format!("flag {}", fields[1])))?;
    let pos: u64 = fields[3]
        .parse()
        .map_err(|_| Error::MalformedSam(format!("position {}", fields[3])))?;
    let cigar = match fields[5] {
        "*" => None,
        text => Some(parse_cigar_string(text)?),
    };
    let mut attributes = AHashMap::new();
    for field in &fields[11..] {
        let mut parts = field.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(tag), Some(_type), Some(value)) => {
                attributes.insert(tag.to_string(), value.to_string());
            }
            _ => return Err(Error::MalformedSam(format!("attribute {}", field))),
        }
    }
    Ok(SamRecord {
        name: fields[0].to_string(),
        flag,
        chrom: fields[2].to_string(),
        pos,
        cigar,
        attributes,
    })
}

/// Decode the `XA` attribute: semicolon-separated entries of
/// `chrom,±start,cigar,edits`.
fn hits_from_xa(xa: &str, rc: bool) -> Result<Vec<AlignerHit>, Error> {
    let mut hits = Vec::new();
    for entry in xa.split(';').filter(|e| !e.is_empty()) {
        let fields: Vec<&str> = entry.split(',').collect();
        let [chrom, pos, cigar, edits] = fields.as_slice() else {
            return Err(Error::MalformedXa(entry.to_string()));
        };
        let negative = match pos.chars().next() {
            Some('+') => false,
            Some('-') => true,
            _ => return Err(Error::MalformedXa(entry.to_string())),
        };
        let start: u64 = pos[1..]
            .parse()
            .map_err(|_| Error::MalformedXa(entry.to_string()))?;
        let edits: u32 = edits
            .parse()
            .map_err(|_| Error::MalformedXa(entry.to_string()))?;
        hits.push(AlignerHit::new(
            chrom,
            start,
            negative,
            parse_cigar_string(cigar)?,
            edits,
            rc,
        ));
    }
    Ok(hits)
}

/// Build the result for one query from its primary SAM record.
fn build_result(
    query: &str,
    record: &SamRecord,
    max_hits: usize,
    reverse_complement: bool,
    include_alt_hits: bool,
) -> Result<AlignerResult, Error> {
    if record.is_unmapped() {
        return Ok(AlignerResult {
            query: query.to_string(),
            hit_count: 0,
            hits: Vec::new(),
        });
    }
    let hit_count = record
        .int_attribute("HN")?
        .ok_or_else(|| Error::MissingHitCount(record.name.clone()))? as usize;
    if hit_count > max_hits {
        return Ok(AlignerResult {
            query: query.to_string(),
            hit_count,
            hits: Vec::new(),
        });
    }
    let cigar = record
        .cigar
        .clone()
        .ok_or_else(|| Error::MalformedSam("mapped record without a CIGAR".to_string()))?;
    let edits = record.int_attribute("NM")?.unwrap_or(0) as u32;
    let mut hits = vec![AlignerHit::new(
        &record.chrom,
        record.pos,
        record.is_reverse(),
        cigar,
        edits,
        reverse_complement,
    )];
    if let Some(xa) = record.str_attribute("XA") {
        hits.extend(hits_from_xa(xa, reverse_complement)?);
    }
    if !include_alt_hits {
        hits.retain(|hit| !hit.chrom.ends_with("_alt"));
    }
    let reported = if hits.is_empty() { hit_count } else { hits.len() };
    Ok(AlignerResult {
        query: query.to_string(),
        hit_count: reported,
        hits,
    })
}

/// Alignment options for the interactive aligner.
#[derive(Debug, Clone)]
pub struct BwaAlnOptions {
    /// `-l`: seed length.
    pub seed_length: u32,
    /// `-k`: maximum mismatches in the seed.
    pub max_seed_mismatches: u32,
    /// `-n`: maximum mismatches over the whole query.
    pub max_mismatches: u32,
    /// `-o`: maximum gap opens.
    pub max_gap_opens: u32,
    /// `-e`: maximum gap extends; -1 disables long gaps.
    pub max_gap_extends: i32,
    /// `-R`: maximum number of hits to report per query.
    pub max_hits: usize,
    /// `-t`: threads inside the aligner.
    pub threads: usize,
    /// Whether queries are submitted reverse-complemented.
    pub reverse_complement: bool,
    /// Whether hits to `*_alt` contigs are kept.
    pub include_alt_hits: bool,
}

impl Default for BwaAlnOptions {
    fn default() -> Self {
        Self {
            seed_length: 20,
            max_seed_mismatches: 3,
            max_mismatches: 3,
            max_gap_opens: 0,
            max_gap_extends: -1,
            max_hits: 250,
            threads: 1,
            reverse_complement: false,
            include_alt_hits: false,
        }
    }
}

/// Handle on the long-running interactive aligner.
///
/// The child is started with flags for a non-iterative all-hits search
/// (`-N`), SAM output with a single primary alignment per query (`-S`),
/// interactive no-input-buffering mode in which empty lines flush (`-Z`),
/// and input from stdin against the given reference index.
pub struct BwaAlnInteractive {
    proc: Subprocess,
    options: BwaAlnOptions,
    dict: SequenceDictionary,
    counter: u64,
}

impl BwaAlnInteractive {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        executable: P,
        reference_index: Q,
        options: BwaAlnOptions,
    ) -> Result<Self, Error> {
        let args = vec![
            "aln".to_string(),
            "-t".to_string(),
            options.threads.to_string(),
            "-n".to_string(),
            options.max_mismatches.to_string(),
            "-o".to_string(),
            options.max_gap_opens.to_string(),
            "-e".to_string(),
            options.max_gap_extends.to_string(),
            "-l".to_string(),
            options.seed_length.to_string(),
            "-k".to_string(),
            options.max_seed_mismatches.to_string(),
            "-R".to_string(),
            options.max_hits.to_string(),
            "-N".to_string(),
            "-S".to_string(),
            "-Z".to_string(),
            reference_index.as_ref().display().to_string(),
            "/dev/stdin".to_string(),
        ];
        let mut proc = Subprocess::spawn(executable, &args, false)?;
        let dict = read_header(&mut proc)?;
        Ok(Self {
            proc,
            options,
            dict,
            counter: 0,
        })
    }

    /// The contigs of the reference the aligner was started against.
    pub fn dictionary(&self) -> &SequenceDictionary {
        &self.dict
    }

    /// Terminate the aligner and release its streams.  Idempotent.
    pub fn close(&mut self) {
        self.proc.close();
    }
}

/// Consume the SAM header up to and including the first `@PG` line, keeping
/// the `@SQ` entries.  No alignment may be read before this completes.
fn read_header(proc: &mut Subprocess) -> Result<SequenceDictionary, Error> {
    let mut entries = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if proc.stdout()?.read_line(&mut line)? == 0 {
            return Err(Error::Header("stream ended before @PG".to_string()));
        }
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if !line.starts_with('@') {
            return Err(Error::Header(format!("unexpected line {:?}", line)));
        }
        if let Some(rest) = line.strip_prefix("@SQ\t") {
            let mut name = None;
            let mut length = None;
            for field in rest.split('\t') {
                if let Some(sn) = field.strip_prefix("SN:") {
                    name = Some(sn.to_string());
                } else if let Some(ln) = field.strip_prefix("LN:") {
                    length = ln.parse::<u64>().ok();
                }
            }
            match (name, length) {
                (Some(name), Some(length)) => entries.push((name, length)),
                _ => return Err(Error::Header(format!("incomplete @SQ line {:?}", line))),
            }
        }
        if line.starts_with("@PG") {
            break;
        }
    }
    Ok(SequenceDictionary::new(entries))
}

impl Aligner for BwaAlnInteractive {
    fn map(&mut self, queries: &[String]) -> Result<Vec<AlignerResult>, Error> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let first_id = self.counter;
        {
            let reverse_complement = self.options.reverse_complement;
            let stdin = self.proc.stdin()?;
            for (i, query) in queries.iter().enumerate() {
                let bases = if reverse_complement {
                    sequences::revcomp(query)
                } else {
                    query.clone()
                };
                write!(
                    stdin,
                    "@{}\n{}\n+\n{}\n",
                    first_id + i as u64,
                    bases,
                    "H".repeat(bases.len())
                )?;
            }
            stdin.flush()?;
            // empty lines force the aligner to emit all pending records
            for _ in 0..3 {
                stdin.write_all(b"\n\n")?;
                stdin.flush()?;
            }
        }
        self.counter += queries.len() as u64;

        let mut results = Vec::with_capacity(queries.len());
        let mut line = String::new();
        for (i, query) in queries.iter().enumerate() {
            line.clear();
            if self.proc.stdout()?.read_line(&mut line)? == 0 {
                return Err(Error::PrematureEof);
            }
            let record = parse_sam_record(line.trim_end_matches(|c| c == '\r' || c == '\n'))?;
            let expected = (first_id + i as u64).to_string();
            if record.name != expected {
                return Err(Error::OutOfOrder {
                    expected,
                    found: record.name,
                });
            }
            results.push(build_result(
                query,
                &record,
                self.options.max_hits,
                self.options.reverse_complement,
                self.options.include_alt_hits,
            )?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{build_result, hits_from_xa, parse_sam_record, AlignerHit, AlignerResult};
    use crate::align::cigar::parse_cigar_string;
    use crate::mapping::Strand;

    const QUERY: &str = "GGCTAGGTGCAGTGGTGCGATCT";

    fn primary(flag: u16, cigar: &str) -> String {
        format!(
            "0\t{}\tchr1\t781\t37\t{}\t*\t0\t0\t{}\t*\tNM:i:1\tHN:i:1",
            flag, cigar, QUERY
        )
    }

    #[test]
    fn sam_record_fields() {
        let record = parse_sam_record(&primary(0, "6M1D17M")).unwrap();
        assert_eq!(record.name, "0");
        assert_eq!(record.chrom, "chr1");
        assert_eq!(record.pos, 781);
        assert!(!record.is_unmapped());
        assert!(!record.is_reverse());
        assert_eq!(record.int_attribute("HN").unwrap(), Some(1));
        assert_eq!(record.int_attribute("NM").unwrap(), Some(1));
        assert_eq!(record.int_attribute("X0").unwrap(), None);
        assert!(parse_sam_record("too\tfew\tfields").is_err());
    }

    /// The single-hit scenario comes out the same whether or not the query
    /// was submitted reverse-complemented.
    #[rstest]
    #[case(false)]
    #[case(true)]
    fn single_hit(#[case] reverse_complement: bool) {
        // under RC the aligner sees the opposite strand and mirrored CIGAR
        let line = if reverse_complement {
            primary(16, "17M1D6M")
        } else {
            primary(0, "6M1D17M")
        };
        let record = parse_sam_record(&line).unwrap();
        let result = build_result(QUERY, &record, 100, reverse_complement, false).unwrap();
        assert_eq!(result.query, QUERY);
        assert_eq!(result.hit_count, 1);
        assert_eq!(result.hits.len(), 1);
        let hit = &result.hits[0];
        assert_eq!(hit.chrom, "chr1");
        assert_eq!(hit.start, 781);
        assert_eq!(hit.strand(), Strand::Plus);
        assert_eq!(hit.cigar.to_string(), "6M1D17M");
        assert_eq!(hit.edits, 1);
        assert_eq!(hit.end(), 781 + hit.cigar.reference_length() - 1);
        assert_eq!(hit.mismatches(), 0);
    }

    #[test]
    fn unmapped_record() {
        let line = format!("0\t4\t*\t0\t0\t*\t*\t0\t0\t{}\t*", QUERY);
        let record = parse_sam_record(&line).unwrap();
        let result = build_result(QUERY, &record, 100, false, false).unwrap();
        assert_eq!(
            result,
            AlignerResult {
                query: QUERY.to_string(),
                hit_count: 0,
                hits: vec![]
            }
        );
    }

    #[test]
    fn truncated_reporting_keeps_the_count() {
        let line = format!(
            "0\t0\tchr1\t781\t37\t23M\t*\t0\t0\t{}\t*\tNM:i:0\tHN:i:5000",
            QUERY
        );
        let record = parse_sam_record(&line).unwrap();
        let result = build_result(QUERY, &record, 100, false, false).unwrap();
        assert_eq!(result.hit_count, 5000);
        assert!(result.hits.is_empty());
    }

    #[test]
    fn missing_hit_count_is_an_error() {
        let line = format!("0\t0\tchr1\t781\t37\t23M\t*\t0\t0\t{}\t*\tNM:i:0", QUERY);
        let record = parse_sam_record(&line).unwrap();
        assert!(matches!(
            build_result(QUERY, &record, 100, false, false),
            Err(super::Error::MissingHitCount(_))
        ));
    }

    #[test]
    fn xa_hits_and_alt_filtering() {
        let line = format!(
            "0\t0\tchr1\t781\t37\t23M\t*\t0\t0\t{}\t*\tNM:i:0\tHN:i:3\t\
             XA:Z:chr2,-1302,23M,1;chr1_alt,+500,23M,2;",
            QUERY
        );
        let record = parse_sam_record(&line).unwrap();
        let result = build_result(QUERY, &record, 100, false, false).unwrap();
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hit_count, 2);
        assert_eq!(result.hits[1].chrom, "chr2");
        assert!(result.hits[1].negative);
        assert_eq!(result.hits[1].start, 1302);

        let with_alts = build_result(QUERY, &record, 100, false, true).unwrap();
        assert_eq!(with_alts.hits.len(), 3);
        assert_eq!(with_alts.hit_count, 3);
    }

    #[test]
    fn malformed_xa_is_an_error() {
        assert!(hits_from_xa("chr2,1302,23M,1;", false).is_err());
        assert!(hits_from_xa("chr2,+1302,23M", false).is_err());
        assert!(hits_from_xa("chr2,+1302,23M,x", false).is_err());
    }

    /// Reconstruction under RC: flipping `negative` back and element-
    /// reversing the CIGAR recovers the plain hit.
    #[rstest]
    #[case(false)]
    #[case(true)]
    fn rc_reconstruction(#[case] negative: bool) {
        let cigar = parse_cigar_string("6M1D17M").unwrap();
        let plain = AlignerHit::new("chr1", 781, negative, cigar.clone(), 1, false);
        let rc = AlignerHit::new("chr1", 781, negative, cigar.clone(), 1, true);
        assert_eq!(rc.negative, !plain.negative);
        assert_eq!(rc.cigar, plain.cigar.reversed());
        let back = AlignerHit::new("chr1", 781, rc.negative, rc.cigar.clone(), 1, true);
        assert_eq!(back, plain);
    }

    #[test]
    fn best_hit_prefers_fewest_mismatches() {
        let result = AlignerResult {
            query: QUERY.to_string(),
            hit_count: 2,
            hits: vec![
                AlignerHit::new(
                    "chr1",
                    781,
                    false,
                    parse_cigar_string("23M").unwrap(),
                    2,
                    false,
                ),
                AlignerHit::new(
                    "chr2",
                    100,
                    false,
                    parse_cigar_string("23M").unwrap(),
                    0,
                    false,
                ),
            ],
        };
        assert_eq!(result.best_hit().unwrap().chrom, "chr2");
    }

    #[test]
    fn header_parsing() {
        // read_header needs a subprocess; emulate one with `cat` fed the
        // header text
        use std::io::Write as _;
        let mut proc = crate::subprocess::Subprocess::spawn("cat", &[], false).unwrap();
        {
            let stdin = proc.stdin().unwrap();
            write!(
                stdin,
                "@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:248956422\n@SQ\tSN:chr2\tLN:242193529\n\
                 @PG\tID:aln\tPN:aln\n"
            )
            .unwrap();
            stdin.flush().unwrap();
        }
        let dict = super::read_header(&mut proc).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.length_of("chr1"), Some(248956422));
        assert_eq!(dict.index_of("chr2"), Some(1));
        proc.close();
    }
}
