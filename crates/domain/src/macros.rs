//! Macro for implementing Display and FromStr for status-like enums
//!
//! Storage columns hold these enums as lowercase strings; the macro keeps
//! both directions of the conversion in one place.

/// Implements Display and FromStr traits for status-like enums
///
/// Parsing is case-insensitive; output is the lowercase form given in the
/// mapping.
#[macro_export]
macro_rules! impl_status_string_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestStatus {
        Active,
        Expired,
    }

    impl_status_string_conversions!(TestStatus {
        Active => "active",
        Expired => "expired",
    });

    #[test]
    fn display_and_parse_are_inverse() {
        assert_eq!(TestStatus::Active.to_string(), "active");
        assert_eq!(TestStatus::from_str("EXPIRED").unwrap(), TestStatus::Expired);
    }

    #[test]
    fn parse_rejects_unknown_values() {
        let result = TestStatus::from_str("terminated");
        assert!(result.unwrap_err().contains("Invalid TestStatus"));
    }
}
