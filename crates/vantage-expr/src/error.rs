use thiserror::Error;

/// Errors produced while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
}

impl ExprError {
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        ExprError::Parse {
            offset,
            message: message.into(),
        }
    }
}
