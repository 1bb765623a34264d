//! Serde helpers for durations written as fractional seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a duration as seconds.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

/// Deserialize a duration from seconds.
///
/// # Errors
///
/// Rejects negative, non-finite or out-of-range values.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Same encoding for `Option<Duration>`, with `null` meaning `None`.
pub mod option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize an optional duration as seconds or `null`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional duration from seconds or `null`.
    ///
    /// # Errors
    ///
    /// Rejects negative, non-finite or out-of-range values.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Timings {
        #[serde(with = "super")]
        delay: Duration,
        #[serde(default, with = "super::option")]
        budget: Option<Duration>,
    }

    #[test]
    fn fractional_seconds_parse() -> Result<(), serde_json::Error> {
        let timings: Timings = serde_json::from_str(r#"{"delay": 0.25, "budget": null}"#)?;
        assert_eq!(timings.delay, Duration::from_millis(250));
        assert_eq!(timings.budget, None);

        let timings: Timings = serde_json::from_str(r#"{"delay": 1, "budget": 300}"#)?;
        assert_eq!(timings.budget, Some(Duration::from_secs(300)));
        Ok(())
    }

    #[test]
    fn negative_seconds_are_rejected() {
        let parsed = serde_json::from_str::<Timings>(r#"{"delay": -1}"#);
        assert!(parsed.is_err());
    }
}
