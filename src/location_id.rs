//! Location identifiers
//!
//! A location identifier is the parsed form of an XPath-like address such as
//! `/example-module:container/list[key1='a'][key2='b']/leaf`. Parsing is purely
//! lexical; resolution against the schema happens in [`crate::validator`].

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RpError};

/// A `[name='value']` predicate selecting a list instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPredicate {
    /// Name of the key leaf
    pub name: String,
    /// Value the key leaf must hold
    pub value: String,
}

/// One `/`-separated step of a location identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Node name
    pub name: String,
    /// Explicit module qualifier (`module:name`), if present
    pub namespace: Option<String>,
    /// Key predicates in the order they were written
    pub keys: Vec<KeyPredicate>,
}

impl Step {
    /// Value of the key predicate named `name`
    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|k| k.name == name)
            .map(|k| k.value.as_str())
    }

    /// Check if this step carries any key predicates
    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{}:", ns)?;
        }
        f.write_str(&self.name)?;
        for key in &self.keys {
            let quote = if key.value.contains('\'') { '"' } else { '\'' };
            write!(f, "[{}={}{}{}]", key.name, quote, key.value, quote)?;
        }
        Ok(())
    }
}

/// Parsed, immutable location identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationId {
    /// The address string this identifier was parsed from
    xpath: String,
    /// Steps from the root to the addressed node, never empty
    steps: Vec<Step>,
}

impl LocationId {
    /// Parse an address string into a location identifier
    pub fn parse(xpath: &str) -> Result<Self> {
        let steps = Parser::new(xpath).parse()?;
        Ok(Self {
            xpath: xpath.to_string(),
            steps,
        })
    }

    /// The address string as given to [`LocationId::parse`]
    pub fn xpath(&self) -> &str {
        &self.xpath
    }

    /// All steps, root first
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step at `index`
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// The step naming the addressed node
    pub fn last(&self) -> &Step {
        // parse() guarantees at least one step
        &self.steps[self.steps.len() - 1]
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a parsed identifier
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromStr for LocationId {
    type Err = RpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LocationId {
    /// Canonical rendering; equal to the input for canonical addresses
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "/{}", step)?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Vec<Step>> {
        if self.input.is_empty() {
            return Err(RpError::MalformedAddress("empty address".into()));
        }
        if self.peek() != Some(b'/') {
            return Err(self.error("address must start with '/'"));
        }

        let mut steps = Vec::new();
        while self.pos < self.bytes.len() {
            self.expect(b'/', "expected '/'")?;
            steps.push(self.step()?);
        }
        Ok(steps)
    }

    fn step(&mut self) -> Result<Step> {
        if matches!(self.peek(), None | Some(b'/')) {
            return Err(self.error("empty step name"));
        }

        let first = self.identifier("node name")?;
        let (namespace, name) = if self.peek() == Some(b':') {
            self.pos += 1;
            let name = self.identifier("node name after prefix")?;
            (Some(first.to_string()), name.to_string())
        } else {
            (None, first.to_string())
        };

        let mut keys = Vec::new();
        while self.peek() == Some(b'[') {
            keys.push(self.predicate()?);
        }

        match self.peek() {
            None | Some(b'/') => Ok(Step {
                name,
                namespace,
                keys,
            }),
            Some(_) => Err(self.error("unexpected character after step")),
        }
    }

    fn predicate(&mut self) -> Result<KeyPredicate> {
        self.pos += 1; // '['
        let name = self.identifier("key name")?.to_string();
        self.expect(b'=', "expected '=' in key predicate")?;

        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q as char,
            None => return Err(self.error("unterminated key predicate")),
            Some(_) => return Err(self.error("key value must be quoted")),
        };
        self.pos += 1;

        let rest = &self.input[self.pos..];
        let len = rest
            .find(quote)
            .ok_or_else(|| self.error("unterminated quoted key value"))?;
        let value = rest[..len].to_string();
        self.pos += len + 1;

        self.expect(b']', "unterminated key predicate")?;
        Ok(KeyPredicate { name, value })
    }

    fn identifier(&mut self, what: &str) -> Result<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.pos += 1,
            _ => return Err(self.error(&format!("expected {}", what))),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(&self.input[start..self.pos])
    }

    fn expect(&mut self, byte: u8, message: &str) -> Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, message: &str) -> RpError {
        RpError::MalformedAddress(format!(
            "{} at offset {} in '{}'",
            message, self.pos, self.input
        ))
    }
}
