use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// Every violated rule, collected before any year is computed.
    #[error("invalid parameters: {}", .0.join("; "))]
    InvalidParameters(Vec<String>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("year {0} is not part of the projected sequence")]
    YearOutOfRange(i32),
}
