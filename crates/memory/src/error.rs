use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// User ids become part of file names, so only `[A-Za-z0-9_-]` is allowed.
    #[error("invalid user id {0:?}")]
    InvalidUserId(String),
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<&str, MemoryError> {
    let valid = !user_id.is_empty()
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(user_id)
    } else {
        Err(MemoryError::InvalidUserId(user_id.to_string()))
    }
}
