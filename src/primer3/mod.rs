//! Driver for the external primer-picking executable.
//!
//! The picker is a long-lived child process spoken to over a line-oriented
//! tagged key/value protocol: a request is a series of `KEY=VALUE` lines
//! terminated by a lone `=`, and so is the response.  The driver encodes
//! design requests, decodes candidates and failure explanations, and applies
//! the post-hoc constraints the picker cannot express natively (the
//! dinucleotide-repeat limit).

pub mod failure;
pub mod input;

use std::io::{BufRead, Write};
use std::path::Path;

use ahash::{AHashMap, AHashSet};

use crate::primer::{Primer, PrimerPair};
use crate::primer3::failure::{tally_failures, FailureCount};
use crate::primer3::input::{DesignTask, Parameters, Weights, INPUT_TAGS};
use crate::region::DesignRegion;
use crate::sequences;
use crate::subprocess::Subprocess;

pub use self::error::Error;

mod error {
    /// Error type for the picker driver.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("invalid parameter: {0}")]
        InvalidParameter(String),
        #[error("problem with the picker process")]
        Subprocess(#[from] crate::subprocess::Error),
        #[error("I/O error talking to the picker")]
        Io(#[from] std::io::Error),
        #[error("picker failed: {message}")]
        Primer3 {
            message: String,
            error_lines: Vec<String>,
            primer3_error: Option<String>,
        },
        #[error("picker response is missing tag {0}")]
        MissingTag(String),
        #[error("malformed value for tag {0}: {1}")]
        MalformedTag(String, String),
        #[error("problem with coordinates")]
        Mapping(#[from] crate::mapping::Error),
        #[error("problem building primers")]
        Primer(#[from] crate::primer::Error),
    }
}

/// The candidates returned for one design request.
#[derive(Debug, Clone, PartialEq)]
pub enum DesignCandidates {
    Pairs(Vec<PrimerPair>),
    Left(Vec<Primer>),
    Right(Vec<Primer>),
}

/// Candidates plus the per-reason failure breakdown, sorted by count
/// descending.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignResult {
    pub candidates: DesignCandidates,
    pub failures: Vec<FailureCount>,
}

/// Handle on the long-running picker process.
pub struct Primer3 {
    proc: Subprocess,
}

impl Primer3 {
    /// Spawn the picker in strict-tags mode.  Its stderr is captured and
    /// surfaced together with protocol-level error lines.
    pub fn new<P: AsRef<Path>>(executable: P) -> Result<Self, Error> {
        let proc = Subprocess::spawn(executable, &["-strict_tags".to_string()], true)?;
        Ok(Self { proc })
    }

    /// Submit one design request for a previously built region and decode
    /// the picker's answer.
    pub fn design(
        &mut self,
        region: &DesignRegion,
        task: DesignTask,
        params: &Parameters,
        weights: &Weights,
    ) -> Result<DesignResult, Error> {
        let tags = assemble_tags(region, task, params, weights)?;
        {
            let stdin = self.proc.stdin()?;
            write_request(stdin, &tags)?;
            stdin.flush()?;
        }
        let output = match read_response(self.proc.stdout()?) {
            Ok(output) => {
                let stderr_lines = self.proc.take_stderr_lines();
                if !stderr_lines.is_empty() {
                    return Err(Error::Primer3 {
                        message: "picker wrote to stderr".to_string(),
                        error_lines: stderr_lines,
                        primer3_error: None,
                    });
                }
                output
            }
            Err(Error::Primer3 {
                message,
                mut error_lines,
                primer3_error,
            }) => {
                error_lines.extend(self.proc.take_stderr_lines());
                return Err(Error::Primer3 {
                    message,
                    error_lines,
                    primer3_error,
                });
            }
            Err(e) => return Err(e),
        };
        parse_design(&output, region, task, params)
    }

    /// Terminate the picker and release its streams.  Idempotent.
    pub fn close(&mut self) {
        self.proc.close();
    }
}

/// Merge tag lists; a later occurrence of a key overrides the earlier value
/// in place, keeping the first occurrence's position.
fn merge_tags(tags: &mut Vec<(String, String)>, additions: Vec<(String, String)>) {
    for (key, value) in additions {
        match tags.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => tags.push((key, value)),
        }
    }
}

/// Assemble the full request: globals, task tags, parameters, weights, and
/// finally the hard-masked template.
fn assemble_tags(
    region: &DesignRegion,
    task: DesignTask,
    params: &Parameters,
    weights: &Weights,
) -> Result<Vec<(String, String)>, Error> {
    params.validate()?;
    let mut tags = vec![
        ("PRIMER_FIRST_BASE_INDEX".to_string(), "1".to_string()),
        ("PRIMER_EXPLAIN_FLAG".to_string(), "1".to_string()),
    ];
    merge_tags(
        &mut tags,
        task.to_tags(
            region.target_offset(),
            region.target.length(),
            region.region.length(),
        ),
    );
    merge_tags(&mut tags, params.to_tags());
    merge_tags(&mut tags, weights.to_tags());
    merge_tags(
        &mut tags,
        vec![(
            "SEQUENCE_TEMPLATE".to_string(),
            region.hard_masked.clone(),
        )],
    );
    Ok(tags)
}

/// Emit `KEY=VALUE` lines terminated by a lone `=`.
fn write_request<W: Write>(writer: &mut W, tags: &[(String, String)]) -> Result<(), Error> {
    for (key, value) in tags {
        writeln!(writer, "{}={}", key, value)?;
    }
    writeln!(writer, "=")?;
    Ok(())
}

/// Read the response up to the lone `=` terminator.
///
/// Blank lines are skipped; lines without `=` accumulate as error text;
/// keys from the input-tag catalog are echoes and are discarded.  Error
/// text, a `PRIMER_ERROR` response, or premature stream closure all fail.
fn read_response<R: BufRead>(reader: &mut R) -> Result<AHashMap<String, String>, Error> {
    let mut output = AHashMap::new();
    let mut error_lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::Primer3 {
                message: "picker stream closed prematurely".to_string(),
                error_lines,
                primer3_error: None,
            });
        }
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if line == "=" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                if !INPUT_TAGS.contains(key) {
                    output.insert(key.to_string(), value.to_string());
                }
            }
            None => error_lines.push(line.to_string()),
        }
    }
    if !error_lines.is_empty() || output.contains_key("PRIMER_ERROR") {
        let primer3_error = output.get("PRIMER_ERROR").cloned();
        return Err(Error::Primer3 {
            message: primer3_error
                .clone()
                .unwrap_or_else(|| "picker reported errors".to_string()),
            error_lines,
            primer3_error,
        });
    }
    Ok(output)
}

fn require<'a>(output: &'a AHashMap<String, String>, key: &str) -> Result<&'a str, Error> {
    output
        .get(key)
        .map(|v| v.as_str())
        .ok_or_else(|| Error::MissingTag(key.to_string()))
}

fn require_u64(output: &AHashMap<String, String>, key: &str) -> Result<u64, Error> {
    let value = require(output, key)?;
    value
        .parse()
        .map_err(|_| Error::MalformedTag(key.to_string(), value.to_string()))
}

fn require_f64(output: &AHashMap<String, String>, key: &str) -> Result<f64, Error> {
    let value = require(output, key)?;
    value
        .parse()
        .map_err(|_| Error::MalformedTag(key.to_string(), value.to_string()))
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn tag(&self) -> &'static str {
        match self {
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }
}

/// Decode one candidate primer.  The position is region-relative and
/// 1-based; for the right side it names the 3'-most template coordinate and
/// the length extends backwards.  Bases are sliced from the un-masked
/// sequence, reverse-complemented for the minus strand.
fn parse_primer(
    output: &AHashMap<String, String>,
    side: Side,
    i: u64,
    region: &DesignRegion,
) -> Result<Primer, Error> {
    let key = format!("PRIMER_{}_{}", side.tag(), i);
    let value = require(output, &key)?;
    let (pos, len) = value
        .split_once(',')
        .ok_or_else(|| Error::MalformedTag(key.clone(), value.to_string()))?;
    let pos: u64 = pos
        .trim()
        .parse()
        .map_err(|_| Error::MalformedTag(key.clone(), value.to_string()))?;
    let len: u64 = len
        .trim()
        .parse()
        .map_err(|_| Error::MalformedTag(key.clone(), value.to_string()))?;

    let (mapping, bases) = match side {
        Side::Left => {
            let mapping = region
                .region
                .resolve(pos, len, Some(crate::mapping::Strand::Plus))?;
            let bases = region.soft_masked[(pos - 1) as usize..(pos - 1 + len) as usize]
                .to_ascii_uppercase();
            (mapping, bases)
        }
        Side::Right => {
            let start = (pos + 1)
                .checked_sub(len)
                .ok_or_else(|| Error::MalformedTag(key.clone(), value.to_string()))?;
            let mapping = region
                .region
                .resolve(start, len, Some(crate::mapping::Strand::Minus))?;
            let bases = sequences::revcomp(
                &region.soft_masked[(pos - len) as usize..pos as usize],
            )
            .to_ascii_uppercase();
            (mapping, bases)
        }
    };
    let tm = require_f64(output, &format!("{}_TM", key))?;
    let penalty = require_f64(output, &format!("{}_PENALTY", key))?;
    Ok(Primer::new(&bases, tm, penalty, mapping)?)
}

fn parse_pair(
    output: &AHashMap<String, String>,
    i: u64,
    region: &DesignRegion,
) -> Result<PrimerPair, Error> {
    let left = parse_primer(output, Side::Left, i, region)?;
    let right = parse_primer(output, Side::Right, i, region)?;
    let start = (left.mapping.start - region.region.start) as usize;
    let end = (right.mapping.end - region.region.start + 1) as usize;
    let amplicon_sequence = region.soft_masked[start..end].to_ascii_uppercase();
    let tm = require_f64(output, &format!("PRIMER_PAIR_{}_PRODUCT_TM", i))?;
    let penalty = require_f64(output, &format!("PRIMER_PAIR_{}_PENALTY", i))?;
    Ok(PrimerPair::new(left, right, &amplicon_sequence, tm, penalty)?)
}

/// Decode candidates per task, apply the dinucleotide post-filter, and
/// compute the failure breakdown.
fn parse_design(
    output: &AHashMap<String, String>,
    region: &DesignRegion,
    task: DesignTask,
    params: &Parameters,
) -> Result<DesignResult, Error> {
    let count = require_u64(output, task.count_tag())?;
    let max_dinuc = params.max_dinuc_bases as usize;
    let mut dropped: AHashSet<String> = AHashSet::new();

    let candidates = match task {
        DesignTask::PairPrimers => {
            let mut pairs = Vec::new();
            for i in 0..count {
                let pair = parse_pair(output, i, region)?;
                let left_long = pair.left().longest_dinuc_run() > max_dinuc;
                let right_long = pair.right().longest_dinuc_run() > max_dinuc;
                if left_long {
                    dropped.insert(pair.left().bases().to_string());
                }
                if right_long {
                    dropped.insert(pair.right().bases().to_string());
                }
                if !left_long && !right_long {
                    pairs.push(pair);
                }
            }
            DesignCandidates::Pairs(pairs)
        }
        DesignTask::PickLeft | DesignTask::PickRight => {
            let side = match task {
                DesignTask::PickLeft => Side::Left,
                _ => Side::Right,
            };
            let mut primers = Vec::new();
            for i in 0..count {
                let primer = parse_primer(output, side, i, region)?;
                if primer.longest_dinuc_run() > max_dinuc {
                    dropped.insert(primer.bases().to_string());
                } else {
                    primers.push(primer);
                }
            }
            match task {
                DesignTask::PickLeft => DesignCandidates::Left(primers),
                _ => DesignCandidates::Right(primers),
            }
        }
    };

    let explanations: Vec<&str> = [
        "PRIMER_LEFT_EXPLAIN",
        "PRIMER_RIGHT_EXPLAIN",
        "PRIMER_PAIR_EXPLAIN",
    ]
    .iter()
    .filter_map(|tag| output.get(*tag).map(|v| v.as_str()))
    .collect();
    let failures = tally_failures(&explanations, dropped.len() as u64);

    Ok(DesignResult {
        candidates,
        failures,
    })
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use ahash::AHashMap;
    use pretty_assertions::assert_eq;

    use super::{
        assemble_tags, parse_design, read_response, write_request, DesignCandidates, Error,
    };
    use crate::mapping::{Mapping, Strand};
    use crate::primer3::failure::{FailureCount, FailureReason};
    use crate::primer3::input::{DesignTask, Parameters, Weights};
    use crate::region::DesignRegion;
    use crate::sequences;

    const REGION_BASES: &str = "TCGATCGAAGCTTGGCACGTGTTCAAGGTCACACACACTCCTGAAGTCCG\
                                TTACGGTACGATCGGCTAAGTCCAGGTTCAAGCGTACGTTGACCTAGGCA\
                                GCTTAAGGCCTAGCTAGACT";

    fn region() -> DesignRegion {
        DesignRegion {
            target: Mapping::new("chr1", 1041, 1060, Strand::Plus).unwrap(),
            region: Mapping::new("chr1", 1001, 1120, Strand::Plus).unwrap(),
            soft_masked: REGION_BASES.to_string(),
            hard_masked: REGION_BASES.to_string(),
        }
    }

    fn insert(output: &mut AHashMap<String, String>, key: &str, value: &str) {
        output.insert(key.to_string(), value.to_string());
    }

    #[test]
    fn request_format() {
        let tags = vec![
            ("PRIMER_TASK".to_string(), "generic".to_string()),
            ("SEQUENCE_TEMPLATE".to_string(), "ACGT".to_string()),
        ];
        let mut buffer = Vec::new();
        write_request(&mut buffer, &tags).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "PRIMER_TASK=generic\nSEQUENCE_TEMPLATE=ACGT\n=\n"
        );
    }

    #[test]
    fn assembled_request_ends_with_template() {
        let region = region();
        let tags = assemble_tags(
            &region,
            DesignTask::PairPrimers,
            &Parameters::default(),
            &Weights::default(),
        )
        .unwrap();
        assert_eq!(tags[0].0, "PRIMER_FIRST_BASE_INDEX");
        assert_eq!(tags[1].0, "PRIMER_EXPLAIN_FLAG");
        let (last_key, last_value) = tags.last().unwrap();
        assert_eq!(last_key, "SEQUENCE_TEMPLATE");
        assert_eq!(last_value, &region.hard_masked);
        assert!(tags
            .iter()
            .any(|(k, v)| k == "SEQUENCE_TARGET" && v == "41,20"));
        // no duplicate keys
        let mut keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), tags.len());
    }

    #[test]
    fn response_discards_echoed_input_tags() {
        let text = "PRIMER_TASK=generic\n\nPRIMER_PAIR_NUM_RETURNED=0\n=\n";
        let output = read_response(&mut Cursor::new(text)).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output.get("PRIMER_PAIR_NUM_RETURNED").unwrap(), "0");
    }

    #[test]
    fn response_with_primer_error_fails() {
        let text = "PRIMER_ERROR=SEQUENCE_TARGET is junk\n=\n";
        match read_response(&mut Cursor::new(text)) {
            Err(Error::Primer3 { primer3_error, .. }) => {
                assert_eq!(primer3_error.as_deref(), Some("SEQUENCE_TARGET is junk"));
            }
            other => panic!("expected a picker error, got {:?}", other),
        }
    }

    #[test]
    fn response_with_error_text_fails() {
        let text = "something went sideways\nPRIMER_PAIR_NUM_RETURNED=0\n=\n";
        match read_response(&mut Cursor::new(text)) {
            Err(Error::Primer3 { error_lines, .. }) => {
                assert_eq!(error_lines, vec!["something went sideways".to_string()]);
            }
            other => panic!("expected a picker error, got {:?}", other),
        }
    }

    #[test]
    fn premature_closure_fails() {
        let text = "PRIMER_PAIR_NUM_RETURNED=0\n";
        assert!(matches!(
            read_response(&mut Cursor::new(text)),
            Err(Error::Primer3 { .. })
        ));
    }

    fn pair_output() -> AHashMap<String, String> {
        let mut output = AHashMap::new();
        insert(&mut output, "PRIMER_PAIR_NUM_RETURNED", "2");
        // candidate 0
        insert(&mut output, "PRIMER_LEFT_0", "11,20");
        insert(&mut output, "PRIMER_LEFT_0_TM", "60.1");
        insert(&mut output, "PRIMER_LEFT_0_PENALTY", "0.3");
        insert(&mut output, "PRIMER_RIGHT_0", "100,20");
        insert(&mut output, "PRIMER_RIGHT_0_TM", "59.8");
        insert(&mut output, "PRIMER_RIGHT_0_PENALTY", "0.6");
        insert(&mut output, "PRIMER_PAIR_0_PRODUCT_TM", "81.2");
        insert(&mut output, "PRIMER_PAIR_0_PENALTY", "0.9");
        // candidate 1: left primer covers the ACACACAC run
        insert(&mut output, "PRIMER_LEFT_1", "27,16");
        insert(&mut output, "PRIMER_LEFT_1_TM", "58.9");
        insert(&mut output, "PRIMER_LEFT_1_PENALTY", "1.3");
        insert(&mut output, "PRIMER_RIGHT_1", "100,20");
        insert(&mut output, "PRIMER_RIGHT_1_TM", "59.8");
        insert(&mut output, "PRIMER_RIGHT_1_PENALTY", "0.6");
        insert(&mut output, "PRIMER_PAIR_1_PRODUCT_TM", "80.0");
        insert(&mut output, "PRIMER_PAIR_1_PENALTY", "1.9");
        insert(&mut output, "PRIMER_LEFT_EXPLAIN", "considered 10, low tm 2, ok 8");
        insert(
            &mut output,
            "PRIMER_PAIR_EXPLAIN",
            "considered 5, high end compl 1, ok 4",
        );
        output
    }

    #[test]
    fn pair_parsing_and_post_filter() {
        let region = region();
        let result = parse_design(
            &pair_output(),
            &region,
            DesignTask::PairPrimers,
            &Parameters::default(),
        )
        .unwrap();

        let DesignCandidates::Pairs(pairs) = &result.candidates else {
            panic!("expected pairs");
        };
        // the second candidate fails the dinucleotide post-filter
        assert_eq!(pairs.len(), 1);
        let pair = &pairs[0];
        assert_eq!(pair.left().mapping, Mapping::new("chr1", 1011, 1030, Strand::Plus).unwrap());
        assert_eq!(
            pair.right().mapping,
            Mapping::new("chr1", 1081, 1100, Strand::Minus).unwrap()
        );
        // bases come from the un-masked slice, right reverse-complemented
        assert_eq!(pair.left().bases(), &REGION_BASES[10..30]);
        assert_eq!(
            pair.right().bases(),
            sequences::revcomp(&REGION_BASES[80..100])
        );
        assert_eq!(pair.amplicon(), &Mapping::new("chr1", 1011, 1100, Strand::Plus).unwrap());
        assert_eq!(pair.amplicon_sequence(), &REGION_BASES[10..100]);
        assert_eq!(pair.tm, 81.2);
        assert_eq!(pair.penalty, 0.9);

        // the dropped primer surfaces in the failure breakdown
        assert_eq!(
            result.failures,
            vec![
                FailureCount {
                    reason: FailureReason::LowTm,
                    count: 2
                },
                FailureCount {
                    reason: FailureReason::HighEndComplementarity,
                    count: 1
                },
                FailureCount {
                    reason: FailureReason::LongDinuc,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn left_list_parsing() {
        let region = region();
        let mut output = AHashMap::new();
        insert(&mut output, "PRIMER_LEFT_NUM_RETURNED", "1");
        insert(&mut output, "PRIMER_LEFT_0", "11,20");
        insert(&mut output, "PRIMER_LEFT_0_TM", "60.1");
        insert(&mut output, "PRIMER_LEFT_0_PENALTY", "0.3");
        let result = parse_design(
            &output,
            &region,
            DesignTask::PickLeft,
            &Parameters::default(),
        )
        .unwrap();
        let DesignCandidates::Left(primers) = &result.candidates else {
            panic!("expected left primers");
        };
        assert_eq!(primers.len(), 1);
        assert_eq!(primers[0].bases(), &REGION_BASES[10..30]);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn missing_count_tag_fails() {
        let region = region();
        let output = AHashMap::new();
        assert!(matches!(
            parse_design(&output, &region, DesignTask::PairPrimers, &Parameters::default()),
            Err(Error::MissingTag(_))
        ));
    }
}
