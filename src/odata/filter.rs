//! OData `$filter` assembly
//!
//! All string values pass through [`escape_literal`] before they are
//! interpolated, including values joined with `and`.

use std::fmt;

/// OData protocol dialect of the target service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ODataVersion {
    /// `substringof('v', Field) eq true`
    V2,
    /// `contains(Field, 'v')`
    V4,
}

/// Double every single quote so the value stays one string literal
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Quote and escape a string literal: `O'Neil` -> `'O''Neil'`
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", escape_literal(value))
}

/// Property names (and `/`-separated paths) accepted in filters
pub fn is_valid_field_name(field: &str) -> bool {
    !field.is_empty()
        && field
            .split('/')
            .all(|part| {
                let mut chars = part.chars();
                matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
}

/// A `$filter` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter(String);

impl Filter {
    /// `field eq 'value'`
    pub fn eq(field: &str, value: &str) -> Self {
        Self(format!("{} eq {}", field, quote_literal(value)))
    }

    /// Substring match in the dialect of the target service
    pub fn contains(field: &str, value: &str, version: ODataVersion) -> Self {
        let literal = quote_literal(value);
        match version {
            ODataVersion::V2 => Self(format!("substringof({}, {}) eq true", literal, field)),
            ODataVersion::V4 => Self(format!("contains({}, {})", field, literal)),
        }
    }

    /// `eq` when `exact`, otherwise [`Filter::contains`]
    pub fn matching(field: &str, value: &str, exact: bool, version: ODataVersion) -> Self {
        if exact {
            Self::eq(field, value)
        } else {
            Self::contains(field, value, version)
        }
    }

    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        Self(format!("{} and {}", self.0, other.0))
    }

    /// Join all filters with `and`; `None` for an empty input
    pub fn all<I: IntoIterator<Item = Filter>>(filters: I) -> Option<Self> {
        filters.into_iter().reduce(Filter::and)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Filter> for String {
    fn from(filter: Filter) -> Self {
        filter.0
    }
}
