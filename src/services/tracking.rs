//! Human-facing order identifiers such as `SOS007`.

use crate::errors::ServiceError;

/// Fixed prefix of every tracking code.
pub const TRACKING_PREFIX: &str = "SOS";

/// Renders an order id as a tracking code, padding to at least three digits.
pub fn format_tracking_code(order_id: i32) -> String {
    format!("{}{:03}", TRACKING_PREFIX, order_id)
}

/// Parses a tracking code back into an order id.
///
/// Surrounding whitespace is ignored; anything other than the prefix followed
/// by one or more ASCII digits is a `ValidationError`.
pub fn parse_tracking_code(code: &str) -> Result<i32, ServiceError> {
    let invalid = || ServiceError::ValidationError(format!("Invalid tracking code '{}'", code));

    let digits = code
        .trim()
        .strip_prefix(TRACKING_PREFIX)
        .ok_or_else(invalid)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits.parse::<i32>().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn pads_small_ids_and_widens_large_ones() {
        assert_eq!(format_tracking_code(1), "SOS001");
        assert_eq!(format_tracking_code(7), "SOS007");
        assert_eq!(format_tracking_code(999), "SOS999");
        assert_eq!(format_tracking_code(1234), "SOS1234");
    }

    #[test]
    fn parses_codes_back_to_ids() {
        assert_eq!(parse_tracking_code("SOS007").ok(), Some(7));
        assert_eq!(parse_tracking_code(" SOS1234 ").ok(), Some(1234));
    }

    #[test]
    fn rejects_malformed_codes() {
        for code in ["XYZ007", "SOS", "", "SOS-7", "SOS7a", "sos007", "SOS+12", "SOS99999999999"] {
            assert_matches!(
                parse_tracking_code(code),
                Err(ServiceError::ValidationError(_)),
                "{} should be rejected",
                code
            );
        }
    }
}
