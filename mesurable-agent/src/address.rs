//! Composite measurement addresses (`unitKey:measurementType`)

use thiserror::Error;

/// Separator between the unit key and the measurement type.
pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address `{0}` has no `:` separator")]
    MissingSeparator(String),
    #[error("address `{0}` has an empty unit key")]
    EmptyUnit(String),
    #[error("address `{0}` has an empty measurement type")]
    EmptyMeasurement(String),
}

/// Builds `"unitKey:type"`.
pub fn build_address(unit_key: &str, kind: &str) -> String {
    format!("{unit_key}{SEPARATOR}{kind}")
}

/// Splits an address on its first separator.
///
/// Both sides must be non-empty. Everything after the first `:` belongs to
/// the measurement type.
pub fn parse_address(address: &str) -> Result<(&str, &str), AddressError> {
    let (unit_key, kind) = address
        .split_once(SEPARATOR)
        .ok_or_else(|| AddressError::MissingSeparator(address.to_string()))?;

    if unit_key.is_empty() {
        return Err(AddressError::EmptyUnit(address.to_string()));
    }
    if kind.is_empty() {
        return Err(AddressError::EmptyMeasurement(address.to_string()));
    }

    Ok((unit_key, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_address() {
        assert_eq!(build_address("dht22", "temperature"), "dht22:temperature");
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("dht22:temperature"),
            Ok(("dht22", "temperature"))
        );
    }

    #[test]
    fn test_parse_address_without_separator_fails() {
        assert_eq!(
            parse_address("nodot"),
            Err(AddressError::MissingSeparator("nodot".into()))
        );
    }

    #[test]
    fn test_parse_address_empty_sides_fail() {
        assert!(matches!(parse_address(":sensor"), Err(AddressError::EmptyUnit(_))));
        assert!(matches!(parse_address("hw:"), Err(AddressError::EmptyMeasurement(_))));
        assert!(parse_address(":").is_err());
    }

    #[test]
    fn test_parse_address_splits_on_first_separator() {
        assert_eq!(parse_address("sps30:pm:2.5"), Ok(("sps30", "pm:2.5")));
    }
}
