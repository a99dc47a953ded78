//! CSS-like selectors used for event delegation and subtree queries.
//!
//! The supported grammar is a comma separated list of complex selectors. Each complex selector
//! is a chain of compound selectors joined by whitespace (descendant) or `>` (child). A compound
//! selector is an optional tag name or `*`, followed by any number of `.class`, `#id`,
//! `[attr]` and `[attr=value]` (value optionally quoted) filters.
//!
//! Matching is host-agnostic: hosts expose their nodes through [`SelectorTarget`].

use core::{fmt, str::FromStr};

/// Errors produced while parsing a selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// The selector source is empty or whitespace.
    #[error("selector is empty")]
    Empty,
    /// An unexpected character was encountered.
    #[error("unexpected `{ch}` at offset {position} in selector")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte offset into the source.
        position: usize,
    },
    /// The selector ended where more input was required.
    #[error("selector ends unexpectedly")]
    UnexpectedEnd,
    /// An attribute filter or quoted value was never closed.
    #[error("unterminated attribute filter starting at offset {position}")]
    UnterminatedAttribute {
        /// Byte offset of the opening bracket or quote.
        position: usize,
    },
}

/// Read access to a host node for selector matching.
pub trait SelectorTarget: Sized {
    /// Lowercase tag name, or `None` for non-element nodes.
    fn tag(&self) -> Option<&str>;
    /// Attribute value by name.
    fn attribute(&self, name: &str) -> Option<&str>;
    /// Parent node, if attached.
    fn parent(&self) -> Option<Self>;
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    // The combinator of the first part is never consulted.
    parts: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeFilter {
    name: String,
    value: Option<String>,
}

impl Selector {
    /// Parses a selector list.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectorError`] describing the first syntax problem.
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }
        let alternatives = Parser::new(source).list()?;
        Ok(Self {
            source: trimmed.to_owned(),
            alternatives,
        })
    }

    /// The trimmed source text this selector was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if `target` matches any alternative of this selector.
    pub fn matches<T: SelectorTarget>(&self, target: &T) -> bool {
        self.alternatives
            .iter()
            .any(|complex| complex.matches_at(complex.parts.len() - 1, target))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Complex {
    fn matches_at<T: SelectorTarget>(&self, index: usize, target: &T) -> bool {
        let (combinator, compound) = &self.parts[index];
        if !compound.matches(target) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => target
                .parent()
                .is_some_and(|parent| self.matches_at(index - 1, &parent)),
            Combinator::Descendant => {
                let mut ancestor = target.parent();
                while let Some(node) = ancestor {
                    if self.matches_at(index - 1, &node) {
                        return true;
                    }
                    ancestor = node.parent();
                }
                false
            }
        }
    }
}

impl Compound {
    fn matches<T: SelectorTarget>(&self, target: &T) -> bool {
        let Some(tag) = target.tag() else {
            return false;
        };
        if let Some(expected) = &self.tag
            && !expected.eq_ignore_ascii_case(tag)
        {
            return false;
        }
        if let Some(id) = &self.id
            && target.attribute("id") != Some(id.as_str())
        {
            return false;
        }
        if !self.classes.is_empty() {
            let classes = target.attribute("class").unwrap_or_default();
            if !self
                .classes
                .iter()
                .all(|class| classes.split_ascii_whitespace().any(|c| c == class))
            {
                return false;
            }
        }
        self.attributes
            .iter()
            .all(|filter| match (target.attribute(&filter.name), &filter.value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            })
    }
}

// ============================================================================
// Parser
// ============================================================================

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        self.pos != start
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(ch) => SelectorError::UnexpectedChar {
                ch,
                position: self.pos,
            },
            None => SelectorError::UnexpectedEnd,
        }
    }

    fn ident(&mut self) -> Result<&'a str, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        if start == self.pos {
            return Err(self.unexpected());
        }
        Ok(&self.src[start..self.pos])
    }

    fn list(&mut self) -> Result<Vec<Complex>, SelectorError> {
        let mut alternatives = Vec::new();
        loop {
            self.skip_whitespace();
            alternatives.push(self.complex()?);
            match self.peek() {
                None => return Ok(alternatives),
                Some(',') => {
                    self.bump();
                }
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    fn complex(&mut self) -> Result<Complex, SelectorError> {
        let mut parts = vec![(Combinator::Descendant, self.compound()?)];
        loop {
            let had_whitespace = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => return Ok(Complex { parts }),
                Some('>') => {
                    self.bump();
                    self.skip_whitespace();
                    parts.push((Combinator::Child, self.compound()?));
                }
                Some(_) if had_whitespace => {
                    parts.push((Combinator::Descendant, self.compound()?));
                }
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let start = self.pos;
        let mut compound = Compound::default();
        match self.peek() {
            Some('*') => {
                self.bump();
            }
            Some(c) if is_ident_char(c) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
            }
            _ => {}
        }
        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    compound.classes.push(self.ident()?.to_owned());
                }
                Some('#') => {
                    self.bump();
                    compound.id = Some(self.ident()?.to_owned());
                }
                Some('[') => {
                    compound.attributes.push(self.attribute()?);
                }
                _ => break,
            }
        }
        if self.pos == start {
            return Err(self.unexpected());
        }
        Ok(compound)
    }

    fn attribute(&mut self) -> Result<AttributeFilter, SelectorError> {
        let open = self.pos;
        self.bump();
        self.skip_whitespace();
        let name = self.ident()?.to_owned();
        self.skip_whitespace();
        let value = match self.peek() {
            Some(']') => None,
            Some('=') => {
                self.bump();
                self.skip_whitespace();
                let value = self.attribute_value()?;
                self.skip_whitespace();
                Some(value)
            }
            Some(_) => return Err(self.unexpected()),
            None => return Err(SelectorError::UnterminatedAttribute { position: open }),
        };
        match self.peek() {
            Some(']') => {
                self.bump();
                Ok(AttributeFilter { name, value })
            }
            Some(_) => Err(self.unexpected()),
            None => Err(SelectorError::UnterminatedAttribute { position: open }),
        }
    }

    fn attribute_value(&mut self) -> Result<String, SelectorError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                let open = self.pos;
                self.bump();
                let body = self.pos;
                loop {
                    match self.bump() {
                        Some(c) if c == quote => {
                            return Ok(self.src[body..self.pos - 1].to_owned());
                        }
                        Some(_) => {}
                        None => return Err(SelectorError::UnterminatedAttribute { position: open }),
                    }
                }
            }
            _ => Ok(self.ident()?.to_owned()),
        }
    }
}
