/// Errors raised while building filters, loading configuration or parsing input.
///
/// Per-event processing never fails; these only surface at construction,
/// resize and I/O boundaries.
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("invalid sensor dimensions {width}x{height} (each must be in 1..={max})")]
    InvalidDimensions { width: u32, height: u32, max: u32 },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("configuration validation failed:\n{0}")]
    Config(String),

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, MotionError>;

/// Validate sensor dimensions and convert them to `usize`.
pub(crate) fn check_dimensions(width: u32, height: u32) -> Result<(usize, usize)> {
    if width == 0 || height == 0 || width > crate::MAX_SENSOR_DIM || height > crate::MAX_SENSOR_DIM
    {
        return Err(MotionError::InvalidDimensions {
            width,
            height,
            max: crate::MAX_SENSOR_DIM,
        });
    }
    Ok((width as usize, height as usize))
}

/// Reject non-finite or non-positive values for a named tunable.
pub(crate) fn check_positive(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(MotionError::InvalidParameter {
            name,
            reason: format!("must be finite and > 0, got {}", value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_accepted() {
        assert_eq!(check_dimensions(128, 64).unwrap(), (128, 64));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            check_dimensions(0, 64),
            Err(MotionError::InvalidDimensions { width: 0, .. })
        ));
    }

    #[test]
    fn test_oversized_dimension_rejected() {
        assert!(check_dimensions(crate::MAX_SENSOR_DIM + 1, 1).is_err());
    }

    #[test]
    fn test_positive_check() {
        assert!(check_positive("tau", 1.0).is_ok());
        assert!(check_positive("tau", 0.0).is_err());
        assert!(check_positive("tau", f64::NAN).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = MotionError::InvalidParameter {
            name: "decay_tau_us",
            reason: "must be finite and > 0, got -1".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid parameter `decay_tau_us`: must be finite and > 0, got -1"
        );
    }
}
