//! Duration parsing and serde codecs, lifted out of `shipper`'s
//! `deserialize_duration`/`serialize_duration` helpers (`types.rs`) and
//! generalized for run-timing reports instead of retry backoff alone.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Parse a human duration string (`"2s"`, `"5m"`, `"1h30m"`) into a
/// [`Duration`].
pub fn parse(text: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(text)
}

/// Render a [`Duration`] in the same human form `parse` accepts.
pub fn format(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse(&text).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    format(*duration).serialize(serializer)
}

pub fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    text.map(|t| parse(&t).map_err(serde::de::Error::custom)).transpose()
}

/// A span that has finished, with both the raw [`Duration`] and its
/// human-readable rendering — matches the grounding project's habit of
/// carrying `duration_ms` alongside a formatted summary in receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElapsedReport {
    pub millis: u128,
    pub human: String,
}

impl ElapsedReport {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            millis: duration.as_millis(),
            human: format(duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        let d = parse("2m30s").unwrap();
        assert_eq!(d, Duration::from_secs(150));
        assert_eq!(format(d), "2m 30s");
    }

    #[test]
    fn deserialize_duration_rejects_malformed_text() {
        #[derive(Debug, serde::Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "deserialize_duration")]
            value: Duration,
        }
        let err = serde_json::from_str::<Wrapper>(r#"{"value": "not-a-duration"}"#).unwrap_err();
        assert!(err.to_string().contains("not-a-duration") || err.is_data());
    }

    #[test]
    fn elapsed_report_carries_millis_and_human_form() {
        let report = ElapsedReport::from_duration(Duration::from_millis(1500));
        assert_eq!(report.millis, 1500);
        assert_eq!(report.human, "1s 500ms");
    }
}
