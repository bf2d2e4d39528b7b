//! Rule and threshold validation.

use super::model::{IspConfig, NewRule};

/// Validation error for rules and thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A rate threshold lies outside 0..=1.
    RateOutOfRange(&'static str),
    /// A warn threshold exceeds its action threshold.
    WarnAboveAction(&'static str),
    /// A throttle limit is zero.
    ZeroLimit(&'static str),
    /// The queue selector is empty or has unsafe characters.
    InvalidQueue,
    /// A rule threshold is negative or not finite.
    InvalidThreshold,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::RateOutOfRange(_) => "Rate thresholds must be between 0 and 1",
            Self::WarnAboveAction(_) => "Warn threshold must not exceed action threshold",
            Self::ZeroLimit(_) => "Throttle limits must be positive",
            Self::InvalidQueue => "Queue selector must be non-empty and shell-safe",
            Self::InvalidThreshold => "Threshold must be a finite, non-negative number",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::RateOutOfRange(field) | Self::WarnAboveAction(field) | Self::ZeroLimit(field) => {
                field
            }
            Self::InvalidQueue => "queue",
            Self::InvalidThreshold => "threshold",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field(), self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a configuration.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validates an ISP configuration.
///
/// # Errors
///
/// Returns every problem found.
pub fn validate_isp_config(config: &IspConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let pairs = [
        ("bounce", config.bounce_warn, config.bounce_action),
        ("complaint", config.complaint_warn, config.complaint_action),
        ("deferral", config.deferral_warn, config.deferral_action),
    ];
    for (field, warn, action) in pairs {
        if !(0.0..=1.0).contains(&warn) || !(0.0..=1.0).contains(&action) {
            errors.push(ValidationError::RateOutOfRange(field));
        } else if warn > action {
            errors.push(ValidationError::WarnAboveAction(field));
        }
    }

    if config.max_connections == 0 {
        errors.push(ValidationError::ZeroLimit("max_connections"));
    }
    if config.max_msg_rate == 0 {
        errors.push(ValidationError::ZeroLimit("max_msg_rate"));
    }

    let queue_ok = !config.queue.is_empty()
        && config
            .queue
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._/@:*-=".contains(c));
    if !queue_ok {
        errors.push(ValidationError::InvalidQueue);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validates a rule.
///
/// # Errors
///
/// Returns every problem found.
pub fn validate_rule(rule: &NewRule) -> ValidationResult {
    let mut errors = Vec::new();
    if !rule.threshold.is_finite() || rule.threshold < 0.0 {
        errors.push(ValidationError::InvalidThreshold);
    } else if rule.metric.is_ratio() && rule.threshold > 1.0 {
        errors.push(ValidationError::RateOutOfRange("threshold"));
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
