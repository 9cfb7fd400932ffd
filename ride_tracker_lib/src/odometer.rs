use serde::Serialize;
use thiserror::Error;

/// Literal the AI endpoint is told to answer with when it cannot read the photo.
pub const ERROR_SENTINEL: &str = "ERROR";

pub const SCAN_PROMPT: &str = "Analyze this image of a vehicle dashboard/odometer.
Extract the numeric odometer reading.
Rules:
1. Return ONLY the number (digits).
2. Do NOT include units like 'km' or 'miles'.
3. Do NOT include decimals unless clearly visible.
4. If the image is blurry or not an odometer, return exactly \"ERROR\".";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OdometerError {
    #[error("Could not read odometer, got '{0}'")]
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OdometerReading {
    pub raw: String,
    pub value: f64,
}

/// Validates the text returned by the AI endpoint. The sentinel and anything that is not a
/// plain non-negative number are the same failure.
pub fn parse_odometer_reply(reply: &str) -> Result<OdometerReading, OdometerError> {
    let raw = reply.trim();
    if raw.is_empty() || raw == ERROR_SENTINEL {
        return Err(OdometerError::Unreadable(raw.to_string()));
    }

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(OdometerReading {
            raw: raw.to_string(),
            value,
        }),
        _ => Err(OdometerError::Unreadable(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_numbers() {
        assert_eq!(parse_odometer_reply(" 12540\n").unwrap().value, 12540.0);
        assert_eq!(parse_odometer_reply("12540.5").unwrap().raw, "12540.5");
    }

    #[test]
    fn sentinel_and_garbage_are_unreadable() {
        for reply in ["ERROR", "", "12,540 km", "about 12000", "NaN", "inf", "-5"] {
            assert!(parse_odometer_reply(reply).is_err(), "accepted {reply:?}");
        }
    }
}
