//! Validation helper functions for configuration types.

use crate::core::errors::{CleanupError, Result};

/// Validate that an f64 value is greater than zero.
pub fn validate_positive_f64(value: f64, field: &str) -> Result<()> {
    if value <= 0.0 {
        return Err(CleanupError::validation_field(
            format!("{} must be greater than 0.0", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that an f64 value is non-negative.
pub fn validate_non_negative(value: f64, field: &str) -> Result<()> {
    if value < 0.0 {
        return Err(CleanupError::validation_field(
            format!("{} must be non-negative", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that an f64 value is in the unit range [0.0, 1.0].
pub fn validate_unit_range(value: f64, field: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CleanupError::validation_field(
            format!("{} must be between 0.0 and 1.0", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that a u32 value is greater than zero.
pub fn validate_positive_u32(value: u32, field: &str) -> Result<()> {
    if value == 0 {
        return Err(CleanupError::validation_field(
            format!("{} must be greater than 0", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that a u64 value is greater than zero.
pub fn validate_positive_u64(value: u64, field: &str) -> Result<()> {
    if value == 0 {
        return Err(CleanupError::validation_field(
            format!("{} must be greater than 0", field),
            field,
        ));
    }
    Ok(())
}
