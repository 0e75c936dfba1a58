//! PromQL-style label selectors.
//!
//! Supports the subset of the PromQL vector-selector grammar used by profile
//! queries: an optional metric name followed by an optional brace-delimited
//! matcher list, e.g. `{service_name=~"svc[12]", env!="dev"}`.

use regex::Regex;

use crate::labels::{Labels, LABEL_NAME_METRIC};

/// Errors returned while parsing a label selector.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated quoted string in selector")]
    UnterminatedString,

    #[error("expected a match operator after label name {0:?}")]
    ExpectedOperator(String),

    #[error("invalid regular expression {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("empty label name in selector")]
    EmptyName,
}

/// The match operator of a single [`Matcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Eq,
    Neq,
    Re,
    Nre,
}

/// A single label matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
    // Compiled, fully-anchored pattern for Re/Nre.
    re: Option<Regex>,
}

impl Matcher {
    /// Construct a matcher, compiling the pattern for regex operators.
    pub fn new(op: MatchOp, name: impl Into<String>, value: impl Into<String>) -> Result<Self, SelectorError> {
        let name = name.into();
        let value = value.into();
        let re = match op {
            MatchOp::Re | MatchOp::Nre => Some(Regex::new(&format!("^(?:{value})$")).map_err(
                |source| SelectorError::InvalidRegex {
                    pattern: value.clone(),
                    source,
                },
            )?),
            MatchOp::Eq | MatchOp::Neq => None,
        };
        Ok(Self { name, op, value, re })
    }

    /// Whether the given label value satisfies this matcher. Absent labels
    /// match as the empty string, per Prometheus semantics.
    pub fn matches(&self, value: &str) -> bool {
        match self.op {
            MatchOp::Eq => value == self.value,
            MatchOp::Neq => value != self.value,
            MatchOp::Re => self.re.as_ref().is_some_and(|re| re.is_match(value)),
            MatchOp::Nre => !self.re.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }
}

/// Whether a label set satisfies every matcher in `matchers`.
pub fn matches_labels(matchers: &[Matcher], labels: &Labels) -> bool {
    matchers
        .iter()
        .all(|m| m.matches(labels.get(&m.name).unwrap_or("")))
}

/// Parse a label selector into a matcher list.
///
/// Accepted forms: `{}`, `{a="b", c=~"d"}`, `metric_name`,
/// `metric_name{a!="b"}`. A bare metric name becomes an equality matcher on
/// `__name__`.
pub fn parse_selector(input: &str) -> Result<Vec<Matcher>, SelectorError> {
    let mut p = Parser {
        src: input.as_bytes(),
        pos: 0,
    };
    let mut matchers = Vec::new();

    p.skip_ws();
    let name = p.take_identifier();
    if !name.is_empty() {
        matchers.push(Matcher::new(MatchOp::Eq, LABEL_NAME_METRIC, name)?);
    }
    p.skip_ws();

    if p.eof() {
        if matchers.is_empty() {
            // Neither a metric name nor a matcher list.
            return Err(SelectorError::EmptyName);
        }
        return Ok(matchers);
    }

    p.expect(b'{')?;
    loop {
        p.skip_ws();
        if p.peek() == Some(b'}') {
            p.pos += 1;
            break;
        }
        let name = p.take_identifier();
        if name.is_empty() {
            return Err(SelectorError::EmptyName);
        }
        p.skip_ws();
        let op = p.take_operator(&name)?;
        p.skip_ws();
        let value = p.take_quoted()?;
        matchers.push(Matcher::new(op, name, value)?);
        p.skip_ws();
        match p.peek() {
            Some(b',') => p.pos += 1,
            Some(b'}') => {
                p.pos += 1;
                break;
            }
            Some(c) => return Err(SelectorError::UnexpectedChar(c as char, p.pos)),
            None => return Err(SelectorError::UnterminatedString),
        }
    }
    p.skip_ws();
    if let Some(c) = p.peek() {
        return Err(SelectorError::UnexpectedChar(c as char, p.pos));
    }
    Ok(matchers)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), SelectorError> {
        match self.peek() {
            Some(got) if got == c => {
                self.pos += 1;
                Ok(())
            }
            Some(got) => Err(SelectorError::UnexpectedChar(got as char, self.pos)),
            None => Err(SelectorError::UnterminatedString),
        }
    }

    fn take_identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b':' || c == b'.')
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn take_operator(&mut self, name: &str) -> Result<MatchOp, SelectorError> {
        let op = match (self.peek(), self.src.get(self.pos + 1).copied()) {
            (Some(b'='), Some(b'~')) => {
                self.pos += 2;
                MatchOp::Re
            }
            (Some(b'='), _) => {
                self.pos += 1;
                MatchOp::Eq
            }
            (Some(b'!'), Some(b'=')) => {
                self.pos += 2;
                MatchOp::Neq
            }
            (Some(b'!'), Some(b'~')) => {
                self.pos += 2;
                MatchOp::Nre
            }
            _ => return Err(SelectorError::ExpectedOperator(name.to_string())),
        };
        Ok(op)
    }

    fn take_quoted(&mut self) -> Result<String, SelectorError> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or(SelectorError::UnterminatedString)?;
                    out.push(match escaped {
                        b'n' => '\n',
                        b't' => '\t',
                        other => other as char,
                    });
                    self.pos += 1;
                }
                Some(c) => {
                    out.push(c as char);
                    self.pos += 1;
                }
                None => return Err(SelectorError::UnterminatedString),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_empty_braces() {
        assert!(parse_selector("{}").unwrap().is_empty());
    }

    #[test]
    fn parse_single_equality() {
        let m = parse_selector(r#"{service_name="svc1"}"#).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].name, "service_name");
        assert_eq!(m[0].op, MatchOp::Eq);
        assert!(m[0].matches("svc1"));
        assert!(!m[0].matches("svc2"));
    }

    #[test]
    fn parse_regex_is_anchored() {
        let m = parse_selector(r#"{service_name=~"svc[12]"}"#).unwrap();
        assert!(m[0].matches("svc1"));
        assert!(m[0].matches("svc2"));
        assert!(!m[0].matches("svc12"));
        assert!(!m[0].matches("xsvc1"));
    }

    #[test]
    fn parse_metric_name_prefix() {
        let m = parse_selector(r#"process_cpu{foo!="bar"}"#).unwrap();
        assert_eq!(m[0].name, LABEL_NAME_METRIC);
        assert_eq!(m[0].value, "process_cpu");
        assert_eq!(m[1].op, MatchOp::Neq);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_matches!(parse_selector("{foo=}"), Err(_));
        assert_matches!(parse_selector(r#"{foo="bar"#), Err(SelectorError::UnterminatedString));
        assert_matches!(parse_selector(r#"{="bar"}"#), Err(SelectorError::EmptyName));
        assert_matches!(parse_selector(""), Err(SelectorError::EmptyName));
        assert_matches!(parse_selector(r#"{foo=~"["}"#), Err(SelectorError::InvalidRegex { .. }));
    }

    #[test]
    fn absent_labels_match_as_empty() {
        let labels = Labels::from_strings(&["a", "1"]);
        let m = parse_selector(r#"{missing!="x"}"#).unwrap();
        assert!(matches_labels(&m, &labels));
        let m = parse_selector(r#"{missing="x"}"#).unwrap();
        assert!(!matches_labels(&m, &labels));
    }
}
