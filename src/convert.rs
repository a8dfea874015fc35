//! Pluggable strategies attached to a type when it is declared.
//!
//! A [`Validator`] never fails: it reports messages into a [`Recorder`],
//! keyed by the path of the value it looked at. A [`Converter`] turns a
//! string into a typed value ([`Conversion::FromString`]) or back
//! ([`Conversion::ToString`]); a failure from the first direction is absorbed
//! by the recorder when the caller supplies one.

use regex::Regex;

use std::fmt;
use std::sync::Arc;

use crate::datatype::DataType;
use crate::error::{MetatypeError, Result};
use crate::path::DataPath;
use crate::value::Value;

// ------------- Recorder -------------
/// Path-keyed, non-throwing accumulator of validation and conversion messages.
pub trait Recorder {
    fn report_error(&mut self, path: &DataPath, message: String);
    fn report_failure(&mut self, path: &DataPath, message: &str, cause: &dyn std::error::Error) {
        self.report_error(path, format!("{}: {}", message, cause));
    }
    /// Counts for one exact path, or for everything when `path` is `None`.
    fn error_count(&self, path: Option<&DataPath>) -> usize;
    fn error_messages(&self, path: Option<&DataPath>) -> Vec<String>;
    fn has_errors(&self, path: Option<&DataPath>) -> bool {
        self.error_count(path) > 0
    }
    fn clear(&mut self);
}

#[derive(Debug, Default, Clone)]
pub struct ErrorRecorder {
    reports: Vec<(DataPath, String)>,
}
impl ErrorRecorder {
    pub fn new() -> Self {
        Self::default()
    }
    /// Every report in the order it was made.
    pub fn reports(&self) -> &[(DataPath, String)] {
        &self.reports
    }
    pub fn paths(&self) -> Vec<String> {
        self.reports.iter().map(|(p, _)| p.to_string()).collect()
    }
}
impl Recorder for ErrorRecorder {
    fn report_error(&mut self, path: &DataPath, message: String) {
        self.reports.push((path.clone(), message));
    }
    fn error_count(&self, path: Option<&DataPath>) -> usize {
        self.reports
            .iter()
            .filter(|(p, _)| path.is_none_or(|wanted| p == wanted))
            .count()
    }
    fn error_messages(&self, path: Option<&DataPath>) -> Vec<String> {
        self.reports
            .iter()
            .filter(|(p, _)| path.is_none_or(|wanted| p == wanted))
            .map(|(_, m)| m.clone())
            .collect()
    }
    fn clear(&mut self) {
        self.reports.clear();
    }
}

// ------------- Validator -------------
pub trait Validator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn validate(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder);
}

/// Rejects absent values and empty strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Required;

impl Validator for Required {
    fn name(&self) -> &str {
        "Required"
    }
    fn validate(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder) {
        match value {
            Value::Absent => recorder.report_error(path, "a value is required".into()),
            Value::Text(s) if s.is_empty() => recorder.report_error(path, "a value is required".into()),
            _ => (),
        }
    }
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}
impl Range {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }
}
impl Validator for Range {
    fn name(&self) -> &str {
        "Range"
    }
    fn validate(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder) {
        if value.is_absent() {
            return;
        }
        let Some(number) = value.as_f64() else {
            recorder.report_error(path, format!("expected a number, found {}", value.describe()));
            return;
        };
        if let Some(min) = self.min {
            if number < min {
                recorder.report_error(path, format!("{} is less than the minimum {}", value, min));
            }
        }
        if let Some(max) = self.max {
            if number > max {
                recorder.report_error(path, format!("{} is greater than the maximum {}", value, max));
            }
        }
    }
}

/// The string form of the value must match the whole pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}
impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| MetatypeError::InvalidTypeDefinition(format!("bad pattern '{}': {}", pattern, e)))?;
        Ok(Self { source: pattern.to_owned(), regex })
    }
}
impl Validator for Pattern {
    fn name(&self) -> &str {
        "Pattern"
    }
    fn validate(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder) {
        if value.is_absent() {
            return;
        }
        let text = value.to_string();
        if !self.regex.is_match(&text) {
            recorder.report_error(path, format!("'{}' does not match {}", text, self.source));
        }
    }
}

/// Bounds on string length (in characters) or list/map size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Length {
    pub min: Option<usize>,
    pub max: Option<usize>,
}
impl Length {
    pub fn new(min: Option<usize>, max: Option<usize>) -> Self {
        Self { min, max }
    }
}
impl Validator for Length {
    fn name(&self) -> &str {
        "Length"
    }
    fn validate(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder) {
        let length = match value {
            Value::Absent => return,
            Value::Text(s) => s.chars().count(),
            other => match other.len() {
                Some(n) => n,
                None => {
                    recorder.report_error(path, format!("length of a {} is undefined", other.describe()));
                    return;
                }
            },
        };
        if self.min.is_some_and(|min| length < min) || self.max.is_some_and(|max| length > max) {
            let bound = |b: Option<usize>| b.map(|n| n.to_string()).unwrap_or_else(|| "*".into());
            recorder.report_error(
                path,
                format!("length {} is outside {}..{}", length, bound(self.min), bound(self.max)),
            );
        }
    }
}

// ------------- Converter -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Conversion {
    FromString,
    ToString,
}

/// A `FromString` converter receives `Value::Text` and produces a value of the
/// target type; a `ToString` converter must produce `Value::Text`.
pub trait Converter: Send + Sync + fmt::Debug {
    fn convert(&self, input: &Value, target: &DataType) -> Result<Value>;
}

type ConvertFn = dyn Fn(&Value, &DataType) -> Result<Value> + Send + Sync;

/// Converter backed by a function supplied at declaration time.
#[derive(Clone)]
pub struct FnConverter {
    name: String,
    function: Arc<ConvertFn>,
}
impl FnConverter {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Value, &DataType) -> Result<Value> + Send + Sync + 'static,
    {
        Self { name: name.into(), function: Arc::new(function) }
    }
}
impl fmt::Debug for FnConverter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FnConverter({})", self.name)
    }
}
impl Converter for FnConverter {
    fn convert(&self, input: &Value, target: &DataType) -> Result<Value> {
        (self.function)(input, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(path: &str) -> DataPath {
        DataPath::parse(path).unwrap()
    }

    #[test]
    fn recorder_filters_by_path() {
        let mut recorder = ErrorRecorder::new();
        recorder.report_error(&at("a"), "first".into());
        recorder.report_error(&at("b[0]"), "second".into());
        recorder.report_error(&at("a"), "third".into());
        assert_eq!(recorder.error_count(None), 3);
        assert_eq!(recorder.error_messages(Some(&at("a"))), vec!["first", "third"]);
        assert!(recorder.has_errors(Some(&at("b[0]"))));
        assert!(!recorder.has_errors(Some(&at("c"))));
        recorder.clear();
        assert!(!recorder.has_errors(None));
    }

    #[test]
    fn builtin_validators() {
        let mut recorder = ErrorRecorder::new();
        let path = at("x");
        Required.validate(&Value::from(""), &path, &mut recorder);
        Range::new(Some(0.0), Some(10.0)).validate(&Value::from(11), &path, &mut recorder);
        Range::new(Some(0.0), Some(10.0)).validate(&Value::from(5), &path, &mut recorder);
        Pattern::new("[a-z]+").unwrap().validate(&Value::from("abc1"), &path, &mut recorder);
        Length::new(None, Some(1)).validate(&Value::list(vec![Value::from(1), Value::from(2)]), &path, &mut recorder);
        assert_eq!(recorder.error_count(None), 4);
    }

    #[test]
    fn bad_pattern_is_a_definition_error() {
        assert!(matches!(Pattern::new("("), Err(MetatypeError::InvalidTypeDefinition(_))));
    }
}
