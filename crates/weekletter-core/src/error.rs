use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeekletterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid period: week {week} of {year}")]
    InvalidPeriod { week: u32, year: i32 },

    #[error("Unknown subject: {id}")]
    UnknownSubject { id: String },
}

impl WeekletterError {
    /// Short machine-readable code, used as the `code` field in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            WeekletterError::Config(_) => "CONFIG_ERROR",
            WeekletterError::InvalidPeriod { .. } => "INVALID_PERIOD",
            WeekletterError::UnknownSubject { .. } => "UNKNOWN_SUBJECT",
        }
    }
}

pub type Result<T> = std::result::Result<T, WeekletterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = WeekletterError::InvalidPeriod { week: 54, year: 2024 };
        assert_eq!(err.code(), "INVALID_PERIOD");
        assert_eq!(err.to_string(), "Invalid period: week 54 of 2024");
        assert_eq!(WeekletterError::Config("bad".into()).code(), "CONFIG_ERROR");
    }
}
