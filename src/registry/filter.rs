use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::registry::constants::OBJECT_CLASS;
use crate::registry::errors::{invalid_filter, RegistryError, RegistryResult};
use crate::registry::types::Properties;

/// LDAP-style filter over service properties.
///
/// Supported: `(k=v)`, `(k=*)`, `(k=a*b)`, `(k>=v)`, `(k<=v)` and the
/// `&`, `|`, `!` combinators. Keys match case-insensitively; array values
/// match when any element does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { key: String, value: String },
    Present { key: String },
    Substring { key: String, parts: Vec<String> },
    GreaterEq { key: String, value: String },
    LessEq { key: String, value: String },
}

impl Filter {
    pub fn parse(input: &str) -> RegistryResult<Filter> {
        let mut parser = Parser::new(input);
        parser.skip_whitespace();
        let filter = parser.filter()?;
        parser.skip_whitespace();
        if parser.peek().is_some() {
            return Err(invalid_filter(input, "trailing characters after filter"));
        }
        Ok(filter)
    }

    pub fn object_class(interface: &str) -> Filter {
        Filter::Equal {
            key: OBJECT_CLASS.to_string(),
            value: interface.to_string(),
        }
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), right) => {
                left.push(right);
                Filter::And(left)
            }
            (left, right) => Filter::And(vec![left, right]),
        }
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(properties)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(properties)),
            Filter::Not(inner) => !inner.matches(properties),
            Filter::Present { key } => lookup(properties, key).is_some(),
            Filter::Equal { key, value } => {
                lookup(properties, key).is_some_and(|v| compare(v, &|leaf| equal(leaf, value)))
            }
            Filter::Substring { key, parts } => lookup(properties, key)
                .is_some_and(|v| compare(v, &|leaf| leaf_string(leaf).is_some_and(|s| substring(&s, parts)))),
            Filter::GreaterEq { key, value } => lookup(properties, key)
                .is_some_and(|v| compare(v, &|leaf| ordered(leaf, value).is_some_and(|o| o.is_ge()))),
            Filter::LessEq { key, value } => lookup(properties, key)
                .is_some_and(|v| compare(v, &|leaf| ordered(leaf, value).is_some_and(|o| o.is_le()))),
        }
    }
}

impl FromStr for Filter {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Equal { key, value } => write!(f, "({key}={})", escape(value)),
            Filter::Present { key } => write!(f, "({key}=*)"),
            Filter::Substring { key, parts } => {
                let joined: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({key}={})", joined.join("*"))
            }
            Filter::GreaterEq { key, value } => write!(f, "({key}>={})", escape(value)),
            Filter::LessEq { key, value } => write!(f, "({key}<={})", escape(value)),
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn lookup<'a>(properties: &'a Properties, key: &str) -> Option<&'a Value> {
    properties
        .get(key)
        .or_else(|| {
            properties
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
}

fn compare(value: &Value, leaf_test: &dyn Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| compare(item, leaf_test)),
        other => leaf_test(other),
    }
}

fn leaf_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn equal(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => match (n.as_f64(), expected.trim().parse::<f64>()) {
            (Some(actual), Ok(wanted)) => actual == wanted,
            _ => false,
        },
        Value::Bool(b) => expected.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" }),
        _ => false,
    }
}

fn ordered(value: &Value, expected: &str) -> Option<std::cmp::Ordering> {
    match value {
        Value::String(s) => Some(s.as_str().cmp(expected)),
        Value::Number(n) => {
            let wanted = expected.trim().parse::<f64>().ok()?;
            n.as_f64()?.partial_cmp(&wanted)
        }
        _ => None,
    }
}

fn substring(value: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return value == first;
    };
    if !value.starts_with(first.as_str()) {
        return false;
    }
    let mut pos = first.len();
    for part in middle.iter().filter(|p| !p.is_empty()) {
        match value[pos..].find(part.as_str()) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }
    value.len() - pos >= last.len() && value[pos..].ends_with(last.as_str())
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, wanted: char) -> RegistryResult<()> {
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            Some(c) => Err(self.error(format!("expected '{wanted}' at {}, found '{c}'", self.pos - 1))),
            None => Err(self.error(format!("expected '{wanted}', found end of input"))),
        }
    }

    fn error(&self, reason: impl Into<String>) -> RegistryError {
        invalid_filter(self.source, reason)
    }

    fn filter(&mut self) -> RegistryResult<Filter> {
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.bump();
                self.skip_whitespace();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of input")),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> RegistryResult<Vec<Filter>> {
        let mut filters = Vec::new();
        self.skip_whitespace();
        while self.peek() == Some('(') {
            filters.push(self.filter()?);
            self.skip_whitespace();
        }
        if filters.is_empty() {
            return Err(self.error("combinator without operands"));
        }
        Ok(filters)
    }

    fn item(&mut self) -> RegistryResult<Filter> {
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            key.push(c);
            self.pos += 1;
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let operator = match self.bump() {
            Some('=') => '=',
            Some(op @ ('<' | '>')) => {
                self.expect('=')?;
                op
            }
            Some('~') => return Err(self.error("approximate match is not supported")),
            _ => return Err(self.error(format!("missing operator after '{key}'"))),
        };

        let parts = self.value()?;
        match operator {
            '=' => match parts.as_slice() {
                [single] => Ok(Filter::Equal {
                    key,
                    value: single.clone(),
                }),
                [a, b] if a.is_empty() && b.is_empty() => Ok(Filter::Present { key }),
                _ => Ok(Filter::Substring { key, parts }),
            },
            op => {
                if parts.len() != 1 {
                    return Err(self.error("wildcards are only valid with '='"));
                }
                let value = parts.into_iter().next().unwrap_or_default();
                if op == '>' {
                    Ok(Filter::GreaterEq { key, value })
                } else {
                    Ok(Filter::LessEq { key, value })
                }
            }
        }
    }

    /// Reads a value up to the closing parenthesis, splitting on unescaped `*`.
    fn value(&mut self) -> RegistryResult<Vec<String>> {
        let mut parts = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.pos += 1;
                    match self.bump() {
                        Some(c) => current.push(c),
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some('*') => {
                    self.pos += 1;
                    parts.push(std::mem::take(&mut current));
                }
                Some(c) => {
                    self.pos += 1;
                    current.push(c);
                }
                None => return Err(self.error("unterminated value")),
            }
        }
        parts.push(current);
        Ok(parts)
    }
}
