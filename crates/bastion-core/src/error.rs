use thiserror::Error;

/// A tensor or symbolic input does not have the shape an operation requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context}: expected {expected}, got {found}")]
pub struct ShapeError {
    pub context: String,
    pub expected: String,
    pub found: String,
}

impl ShapeError {
    pub fn new(
        context: impl Into<String>,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        Self {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// A feature combination or model capability that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not implemented: {what}")]
pub struct Unimplemented {
    pub what: String,
}

impl Unimplemented {
    pub fn new(what: impl Into<String>) -> Self {
        Self { what: what.into() }
    }
}

/// Check that a slice has exactly `expected` entries.
pub(crate) fn check_len<T>(context: &str, items: &[T], expected: usize) -> Result<(), ShapeError> {
    if items.len() == expected {
        Ok(())
    } else {
        Err(ShapeError::new(
            context,
            format!("length {expected}"),
            format!("length {}", items.len()),
        ))
    }
}
