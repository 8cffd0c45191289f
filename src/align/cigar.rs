//! CIGAR strings as reported by the aligner.

use std::fmt::Display;

use nom::{combinator::all_consuming, multi::many1};

use crate::align::Error;

/// A single CIGAR operation.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum CigarOp {
    /// M
    Match,
    /// I
    Ins,
    /// D
    Del,
    /// N
    Skip,
    /// S
    SoftClip,
    /// H
    HardClip,
    /// P
    Pad,
    /// =
    Eq,
    /// X
    Mismatch,
}

impl CigarOp {
    /// Whether the operation consumes reference bases.
    pub fn is_advance_ref(&self) -> bool {
        matches!(
            self,
            CigarOp::Match | CigarOp::Del | CigarOp::Skip | CigarOp::Eq | CigarOp::Mismatch
        )
    }

    /// Whether the operation consumes query bases.
    pub fn is_advance_query(&self) -> bool {
        matches!(
            self,
            CigarOp::Match | CigarOp::Ins | CigarOp::SoftClip | CigarOp::Eq | CigarOp::Mismatch
        )
    }

    pub fn is_indel(&self) -> bool {
        matches!(self, CigarOp::Ins | CigarOp::Del)
    }
}

impl TryFrom<char> for CigarOp {
    type Error = Error;

    fn try_from(value: char) -> Result<Self, Error> {
        Ok(match value {
            'M' => Self::Match,
            'I' => Self::Ins,
            'D' => Self::Del,
            'N' => Self::Skip,
            'S' => Self::SoftClip,
            'H' => Self::HardClip,
            'P' => Self::Pad,
            '=' => Self::Eq,
            'X' => Self::Mismatch,
            _ => return Err(Error::Cigar(format!("invalid CIGAR character {}", value))),
        })
    }
}

impl From<CigarOp> for char {
    fn from(val: CigarOp) -> Self {
        match val {
            CigarOp::Match => 'M',
            CigarOp::Ins => 'I',
            CigarOp::Del => 'D',
            CigarOp::Skip => 'N',
            CigarOp::SoftClip => 'S',
            CigarOp::HardClip => 'H',
            CigarOp::Pad => 'P',
            CigarOp::Eq => '=',
            CigarOp::Mismatch => 'X',
        }
    }
}

impl Display for CigarOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", std::convert::Into::<char>::into(*self))
    }
}

/// CIGAR element consisting of count and operation.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct CigarElement {
    pub count: u32,
    pub op: CigarOp,
}

impl Display for CigarElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.count, self.op)
    }
}

impl CigarElement {
    fn from_strs(count: &str, op: &str) -> CigarElement {
        CigarElement {
            count: str::parse(count).expect("count matched digits"),
            op: op
                .chars()
                .next()
                .expect("op matched one character")
                .try_into()
                .expect("op matched a CIGAR character"),
        }
    }
}

/// A full CIGAR.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Default, Clone)]
pub struct CigarString {
    pub elems: Vec<CigarElement>,
}

impl CigarString {
    pub fn from(elems: Vec<CigarElement>) -> Self {
        Self { elems }
    }

    /// Number of reference bases covered.
    pub fn reference_length(&self) -> u64 {
        self.elems
            .iter()
            .filter(|e| e.op.is_advance_ref())
            .map(|e| e.count as u64)
            .sum()
    }

    /// Number of query bases covered.
    pub fn query_length(&self) -> u64 {
        self.elems
            .iter()
            .filter(|e| e.op.is_advance_query())
            .map(|e| e.count as u64)
            .sum()
    }

    /// Total number of inserted and deleted bases.
    pub fn indel_bases(&self) -> u64 {
        self.elems
            .iter()
            .filter(|e| e.op.is_indel())
            .map(|e| e.count as u64)
            .sum()
    }

    /// The CIGAR with its element order reversed.
    pub fn reversed(&self) -> CigarString {
        CigarString {
            elems: self.elems.iter().rev().copied().collect(),
        }
    }
}

impl std::ops::Deref for CigarString {
    type Target = Vec<CigarElement>;
    fn deref(&self) -> &Self::Target {
        &self.elems
    }
}

impl Display for CigarString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for item in &self.elems {
            write!(f, "{}", &item)?
        }
        Ok(())
    }
}

mod parse {
    use nom::{
        bytes::complete::take_while_m_n, character::complete::digit1, error::context,
        error::VerboseError, sequence::pair, IResult,
    };

    type Res<T, U> = IResult<T, U, VerboseError<T>>;

    use super::CigarElement;

    pub fn is_cigar_op_char(c: char) -> bool {
        "MIDNSHP=X".contains(c)
    }

    pub fn cigar_element(input: &str) -> Res<&str, CigarElement> {
        context(
            "cigar_element",
            pair(digit1, take_while_m_n(1, 1, is_cigar_op_char)),
        )(input)
        .map(|(rest, (count, op))| (rest, CigarElement::from_strs(count, op)))
    }
}

/// Parse a CIGAR `str` into a real one.
pub fn parse_cigar_string(input: &str) -> Result<CigarString, Error> {
    Ok(CigarString::from(
        all_consuming(many1(parse::cigar_element))(input)
            .map_err(|e| Error::Cigar(format!("problem parsing {:?}: {}", input, e)))?
            .1,
    ))
}
