//! The closed taxonomy of reasons the picker rejects candidates, and the
//! parsing of its explanation strings.

use std::fmt::Display;
use std::sync::LazyLock;

use ahash::AHashMap;
use regex::Regex;

/// Why the picker rejected candidate primers or pairs.
#[derive(
    Debug,
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
pub enum FailureReason {
    AmpliconSize,
    GcClamp,
    GcContent,
    Hairpin,
    HighAnyComplementarity,
    HighEndComplementarity,
    HighTm,
    LowTm,
    InExcludedRegion,
    InTarget,
    /// Applied by the post-filter, never reported by the picker itself.
    LongDinuc,
    LongPolyX,
    LowercaseMasking,
    SequenceQuality,
    TmDiff,
    TooManyNs,
}

impl FailureReason {
    /// Map a reason string from an explanation line to the closed set.
    pub fn from_reason(reason: &str) -> Option<FailureReason> {
        Some(match reason {
            "unacceptable product size" => FailureReason::AmpliconSize,
            "GC clamp failed" => FailureReason::GcClamp,
            "GC content failed" => FailureReason::GcContent,
            "high hairpin stability" => FailureReason::Hairpin,
            "high any compl" => FailureReason::HighAnyComplementarity,
            "high end compl" => FailureReason::HighEndComplementarity,
            "high tm" => FailureReason::HighTm,
            "low tm" => FailureReason::LowTm,
            "in exclude region" => FailureReason::InExcludedRegion,
            "in target" => FailureReason::InTarget,
            "long dinucleotide run" => FailureReason::LongDinuc,
            "long poly-x seq" => FailureReason::LongPolyX,
            "lowercase masking of 3' end" => FailureReason::LowercaseMasking,
            "seq quality" => FailureReason::SequenceQuality,
            "tm diff too large" => FailureReason::TmDiff,
            "too many Ns" => FailureReason::TooManyNs,
            _ => return None,
        })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            FailureReason::AmpliconSize => "unacceptable product size",
            FailureReason::GcClamp => "GC clamp failed",
            FailureReason::GcContent => "GC content failed",
            FailureReason::Hairpin => "high hairpin stability",
            FailureReason::HighAnyComplementarity => "high any compl",
            FailureReason::HighEndComplementarity => "high end compl",
            FailureReason::HighTm => "high tm",
            FailureReason::LowTm => "low tm",
            FailureReason::InExcludedRegion => "in exclude region",
            FailureReason::InTarget => "in target",
            FailureReason::LongDinuc => "long dinucleotide run",
            FailureReason::LongPolyX => "long poly-x seq",
            FailureReason::LowercaseMasking => "lowercase masking of 3' end",
            FailureReason::SequenceQuality => "seq quality",
            FailureReason::TmDiff => "tm diff too large",
            FailureReason::TooManyNs => "too many Ns",
        }
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// A failure reason with the number of candidates it rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FailureCount {
    pub reason: FailureReason,
    pub count: u64,
}

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+) (\d+)$").expect("the token pattern is valid"));

/// Merge explanation strings into per-reason counts, adding
/// `extra_long_dinuc` rejections from the post-filter, sorted by count
/// descending.
///
/// Tokens are comma-delimited `"<reason> <count>"`; `ok` and `considered`
/// tokens carry no failure and are skipped.  Unknown reasons are logged and
/// dropped.
pub fn tally_failures(explanations: &[&str], extra_long_dinuc: u64) -> Vec<FailureCount> {
    let mut counts: AHashMap<FailureReason, u64> = AHashMap::new();
    for explanation in explanations {
        for token in explanation.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let Some(captures) = TOKEN.captures(token) else {
                log::warn!("unparseable explanation token: {:?}", token);
                continue;
            };
            let reason = captures.get(1).expect("group 1 is not optional").as_str();
            let count = captures.get(2).expect("group 2 is not optional").as_str();
            if reason == "ok" || reason == "considered" {
                continue;
            }
            let Some(reason) = FailureReason::from_reason(reason) else {
                log::warn!("unknown failure reason: {:?}", reason);
                continue;
            };
            let count = count.parse::<u64>().expect("group 2 matches digits only");
            *counts.entry(reason).or_insert(0) += count;
        }
    }
    if extra_long_dinuc > 0 {
        *counts.entry(FailureReason::LongDinuc).or_insert(0) += extra_long_dinuc;
    }
    let mut result: Vec<FailureCount> = counts
        .into_iter()
        .map(|(reason, count)| FailureCount { reason, count })
        .collect();
    result.sort_by(|a, b| b.count.cmp(&a.count).then(a.reason.cmp(&b.reason)));
    result
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::{tally_failures, FailureCount, FailureReason};

    #[test]
    fn merges_and_sorts_explanations() {
        let failures = tally_failures(
            &[
                "considered 3285, GC clamp failed 16, low tm 24, long poly-x seq 12, \
                 lowercase masking of 3' end 3208, ok 25",
                "considered 2992, GC clamp failed 26, low tm 28, high tm 32, \
                 long poly-x seq 13, lowercase masking of 3' end 2824, ok 61",
            ],
            0,
        );
        assert_eq!(
            failures,
            vec![
                FailureCount {
                    reason: FailureReason::LowercaseMasking,
                    count: 6032
                },
                FailureCount {
                    reason: FailureReason::LowTm,
                    count: 52
                },
                FailureCount {
                    reason: FailureReason::GcClamp,
                    count: 42
                },
                FailureCount {
                    reason: FailureReason::HighTm,
                    count: 32
                },
                FailureCount {
                    reason: FailureReason::LongPolyX,
                    count: 25
                },
            ]
        );
    }

    #[test]
    fn considered_and_ok_are_not_failures() {
        assert_eq!(tally_failures(&["considered 3285, ok 25"], 0), vec![]);
    }

    #[test]
    fn unknown_reasons_are_dropped() {
        assert_eq!(
            tally_failures(&["considered 1000, wib-wobbled 100, ok 900"], 0),
            vec![]
        );
    }

    #[test]
    fn post_filter_rejections_are_appended() {
        let failures = tally_failures(&["considered 10, low tm 2, ok 8"], 5);
        assert_eq!(
            failures,
            vec![
                FailureCount {
                    reason: FailureReason::LongDinuc,
                    count: 5
                },
                FailureCount {
                    reason: FailureReason::LowTm,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn reason_strings_round_trip() {
        for reason in [
            FailureReason::AmpliconSize,
            FailureReason::GcClamp,
            FailureReason::HighTm,
            FailureReason::LowercaseMasking,
            FailureReason::TooManyNs,
        ] {
            assert_eq!(FailureReason::from_reason(reason.reason()), Some(reason));
        }
        assert_eq!(FailureReason::from_reason("wib-wobbled"), None);
    }
}
