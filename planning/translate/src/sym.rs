use crate::errors::Span;
use std::{
    borrow::Cow,
    fmt::{Debug, Display},
};

/// Symbol of the task (object, predicate, variable, ...), possibly annotated with its origin (file/line)
#[derive(Clone)]
pub struct Sym {
    /// Canonical view of the symbol (lower cased for PDDL)
    /// Small string optimization avoids heap allocation for short identifiers.
    symbol: compact_str::CompactString,
    /// Origin of the symbol, used for error reporting.
    pub span: Option<Span>,
}

impl Sym {
    pub fn new(s: impl AsRef<str>) -> Sym {
        Sym {
            symbol: compact_str::CompactString::new(s.as_ref()),
            span: None,
        }
    }

    pub fn with_source<'a>(s: impl Into<Cow<'a, str>>, source: Span) -> Sym {
        Sym {
            symbol: s.into().into(),
            span: Some(source),
        }
    }

    pub fn canonical_str(&self) -> &str {
        self.symbol.as_str()
    }

    /// Variables of schemas are the symbols starting with a question mark (e.g. `?x`).
    pub fn is_variable(&self) -> bool {
        self.symbol.starts_with('?')
    }

    /// Same symbol with its origin erased
    pub fn unspanned(&self) -> Sym {
        Sym {
            symbol: self.symbol.clone(),
            span: None,
        }
    }
}

impl AsRef<str> for Sym {
    fn as_ref(&self) -> &str {
        &self.symbol
    }
}

impl std::borrow::Borrow<str> for Sym {
    fn borrow(&self) -> &str {
        &self.symbol
    }
}

impl From<&str> for Sym {
    fn from(value: &str) -> Self {
        Sym::new(value)
    }
}

impl From<String> for Sym {
    fn from(value: String) -> Self {
        Sym {
            symbol: value.into(),
            span: None,
        }
    }
}

impl From<&Sym> for Sym {
    fn from(value: &Sym) -> Self {
        value.clone()
    }
}

impl Debug for Sym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}
impl Display for Sym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}

impl PartialEq<str> for Sym {
    fn eq(&self, other: &str) -> bool {
        self.canonical_str() == other
    }
}
impl PartialEq<&str> for Sym {
    fn eq(&self, other: &&str) -> bool {
        self.canonical_str() == *other
    }
}

impl Eq for Sym {}

impl PartialOrd for Sym {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Sym {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.symbol.cmp(&other.symbol)
    }
}

impl std::hash::Hash for Sym {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.symbol.hash(state)
    }
}
