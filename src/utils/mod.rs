pub mod error;

pub use error::{BoxError, PoolError, Result};

/// Reject empty or whitespace-only identifiers.
pub fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PoolError::InvalidArgument(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}
