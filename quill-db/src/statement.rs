//! SQL text with bound parameters and an optional cache hint.

use quill_cache::CacheHint;
use quill_core::Value;

/// A statement ready to hand to the store.
///
/// Parameters are positional (`$1`, `$2`, ...) and bound in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub hint: Option<CacheHint>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            hint: None,
        }
    }

    /// Bind the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Bind several parameters in order.
    pub fn bind_all<I>(mut self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    /// Attach explicit table/entity information, bypassing text
    /// classification for this statement.
    pub fn hint(mut self, hint: CacheHint) -> Self {
        self.hint = Some(hint);
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}
