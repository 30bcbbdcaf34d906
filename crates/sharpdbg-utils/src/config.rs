//! Environment-driven configuration helpers.
//!
//! Embedders configure the debugger core through `SHARPDBG_*` variables in the
//! same way logging is configured. These helpers keep the parsing rules in one
//! place so every flag accepts the same spellings.

use std::env;

/// Configuration parsing error
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError
{
    /// The variable is set but is not a recognizable boolean.
    #[error("{name}: expected a boolean (1/0, true/false, yes/no, on/off), got {value:?}")]
    InvalidFlag
    {
        name: String, value: String
    },
}

/// Parse a boolean flag value.
///
/// Accepts `1/0`, `true/false`, `yes/no`, `on/off` in any case. Returns `None`
/// for anything else.
#[must_use]
pub fn parse_flag(value: &str) -> Option<bool>
{
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a boolean flag from the environment.
///
/// `Ok(None)` means the variable is unset, so callers keep their default.
///
/// ## Errors
///
/// `ConfigError::InvalidFlag` when the variable is set to something that is
/// not a boolean.
pub fn env_flag(name: &str) -> Result<Option<bool>, ConfigError>
{
    match env::var(name) {
        Ok(value) => parse_flag(&value).map(Some).ok_or(ConfigError::InvalidFlag {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_flag_spellings()
    {
        for truthy in ["1", "true", "YES", " on "] {
            assert_eq!(parse_flag(truthy), Some(true), "{truthy}");
        }
        for falsy in ["0", "False", "no", "OFF"] {
            assert_eq!(parse_flag(falsy), Some(false), "{falsy}");
        }
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn test_env_flag_unset_is_none()
    {
        assert_eq!(env_flag("SHARPDBG_TEST_FLAG_THAT_IS_NEVER_SET"), Ok(None));
    }
}
