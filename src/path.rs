//! Value paths.
//!
//! A path addresses a nested value relative to some root: `name` selects a
//! struct field or map entry, `[n]` selects a list element, and segments
//! compose left to right (`orders[2].lines[0].amount`). The blank path is the
//! root itself.
//!
//! Paths are parsed once into a [`DataPath`] and then consumed one
//! [`Segment`] at a time by the type being navigated, which is what decides
//! whether a segment flavor is acceptable.

use pest::Parser;
use pest_derive::Parser;

// used to print out readable forms of a path
use std::fmt;
use std::str::FromStr;

use crate::error::{MetatypeError, Result};

#[derive(Parser)]
#[grammar = "path.pest"]
struct PathParser;

// ------------- Segment -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Struct field or map key.
    Name(String),
    /// List position.
    Index(usize),
}

impl Segment {
    pub fn name(name: impl Into<String>) -> Self {
        Segment::Name(name.into())
    }
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Segment::Name(name) => Some(name),
            Segment::Index(_) => None,
        }
    }
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(index) => Some(*index),
            Segment::Name(_) => None,
        }
    }
}
impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Segment::Name(name) => write!(f, "{}", name),
            Segment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

// ------------- DataPath -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DataPath {
    segments: Vec<Segment>,
}

impl DataPath {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut pairs = PathParser::parse(Rule::path, trimmed)
            .map_err(|e| MetatypeError::invalid_path(trimmed, e.variant.message().to_string()))?;
        let mut segments = Vec::new();
        if let Some(path) = pairs.next() {
            for pair in path.into_inner() {
                match pair.as_rule() {
                    Rule::field => segments.push(Segment::Name(pair.as_str().to_owned())),
                    Rule::element => {
                        let digits = pair.into_inner().as_str();
                        let index = digits.parse::<usize>().map_err(|e| {
                            MetatypeError::invalid_path(trimmed, format!("bad index '{}': {}", digits, e))
                        })?;
                        segments.push(Segment::Index(index));
                    }
                    _ => (),
                }
            }
        }
        Ok(Self { segments })
    }
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
    pub fn len(&self) -> usize {
        self.segments.len()
    }
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
    pub fn first(&self) -> Option<&Segment> {
        self.segments.first()
    }
    /// The next segment to consume and everything after it.
    pub fn split_first(&self) -> Option<(&Segment, DataPath)> {
        self.segments.split_first().map(|(first, rest)| {
            (first, DataPath { segments: rest.to_vec() })
        })
    }
    /// Everything up to the final segment, and that segment.
    pub fn split_last(&self) -> Option<(DataPath, &Segment)> {
        self.segments.split_last().map(|(last, init)| {
            (DataPath { segments: init.to_vec() }, last)
        })
    }
    pub fn child(&self, segment: Segment) -> DataPath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        DataPath { segments }
    }
    pub fn join(&self, other: &DataPath) -> DataPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        DataPath { segments }
    }
    pub fn strip_prefix(&self, prefix: &DataPath) -> Option<DataPath> {
        self.segments
            .strip_prefix(prefix.segments.as_slice())
            .map(|rest| DataPath { segments: rest.to_vec() })
    }
}
impl From<Segment> for DataPath {
    fn from(segment: Segment) -> Self {
        Self { segments: vec![segment] }
    }
}
impl FromStr for DataPath {
    type Err = MetatypeError;
    fn from_str(s: &str) -> Result<Self> {
        DataPath::parse(s)
    }
}
impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 && matches!(segment, Segment::Name(_)) {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
