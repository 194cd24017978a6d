use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::SyncResult;

/// Position of a client in the pull protocol.
///
/// Phases advance strictly in declaration order. Page variants carry the keyset of the last
/// row delivered; a `None` timestamp is the seed of a phase and selects its first page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullCursor {
    BootstrapIssues,
    #[serde(rename_all = "camelCase")]
    DescriptionPage {
        issue_id: String,
        #[serde(with = "seed_timestamp")]
        created_at: Option<DateTime<Utc>>,
    },
    /// Keyed by comment id: an issue owns many comments, so an issue id cannot break
    /// `createdAt` ties.
    #[serde(rename_all = "camelCase")]
    CommentPage {
        comment_id: String,
        #[serde(with = "seed_timestamp")]
        created_at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    LogTail { last_change_id: i64 },
}

impl PullCursor {
    pub fn description_seed() -> Self {
        PullCursor::DescriptionPage {
            issue_id: "0".to_string(),
            created_at: None,
        }
    }

    pub fn comment_seed() -> Self {
        PullCursor::CommentPage {
            comment_id: "0".to_string(),
            created_at: None,
        }
    }

    /// Decode a client supplied token. Missing or unreadable tokens restart at bootstrap.
    pub fn decode(token: Option<&str>) -> Self {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return PullCursor::BootstrapIssues;
        };

        match Self::try_decode(token) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!("Discarding unreadable pull cursor: {}", e);
                PullCursor::BootstrapIssues
            }
        }
    }

    pub fn try_decode(token: &str) -> Result<Self, String> {
        let bytes = general_purpose::STANDARD
            .decode(token)
            .map_err(|e| format!("invalid base64: {}", e))?;
        serde_json::from_slice(&bytes).map_err(|e| format!("invalid cursor: {}", e))
    }

    pub fn encode(&self) -> SyncResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(general_purpose::STANDARD.encode(json))
    }

    /// Ordinal of the phase, used to check that a session never moves backwards.
    pub fn phase_rank(&self) -> u8 {
        match self {
            PullCursor::BootstrapIssues => 0,
            PullCursor::DescriptionPage { .. } => 1,
            PullCursor::CommentPage { .. } => 2,
            PullCursor::LogTail { .. } => 3,
        }
    }

    pub fn phase_name(&self) -> &'static str {
        match self {
            PullCursor::BootstrapIssues => "BOOTSTRAP_ISSUES",
            PullCursor::DescriptionPage { .. } => "DESCRIPTION_PAGE",
            PullCursor::CommentPage { .. } => "COMMENT_PAGE",
            PullCursor::LogTail { .. } => "LOG_TAIL",
        }
    }

    pub fn is_bootstrapping(&self) -> bool {
        !matches!(self, PullCursor::LogTail { .. })
    }
}

/// Page timestamps travel as RFC 3339 strings, with `""` for a phase seed.
mod seed_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(at) => serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode_raw(json: &str) -> String {
        general_purpose::STANDARD.encode(json)
    }

    #[test]
    fn test_missing_cursor_is_bootstrap() {
        assert_eq!(PullCursor::decode(None), PullCursor::BootstrapIssues);
        assert_eq!(PullCursor::decode(Some("")), PullCursor::BootstrapIssues);
    }

    #[test]
    fn test_garbage_cursor_is_bootstrap() {
        assert_eq!(PullCursor::decode(Some("%%%")), PullCursor::BootstrapIssues);
        let unknown_phase = encode_raw(r#"{"phase":"SNAPSHOT","page":3}"#);
        assert_eq!(PullCursor::decode(Some(&unknown_phase)), PullCursor::BootstrapIssues);
        let bad_time = encode_raw(r#"{"phase":"COMMENT_PAGE","commentId":"C1","createdAt":"yesterday"}"#);
        assert_eq!(PullCursor::decode(Some(&bad_time)), PullCursor::BootstrapIssues);
    }

    #[test]
    fn test_seed_wire_shape() {
        let token = PullCursor::description_seed().encode().unwrap();
        let bytes = general_purpose::STANDARD.decode(token).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"phase": "DESCRIPTION_PAGE", "issueId": "0", "createdAt": ""})
        );
    }

    #[test]
    fn test_page_cursor_keeps_sub_second_precision() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let cursor = PullCursor::CommentPage {
            comment_id: "C9".to_string(),
            created_at: Some(at),
        };
        let decoded = PullCursor::decode(Some(&cursor.encode().unwrap()));
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_log_tail_token() {
        let token = encode_raw(r#"{"phase":"LOG_TAIL","lastChangeId":42}"#);
        assert_eq!(
            PullCursor::decode(Some(&token)),
            PullCursor::LogTail { last_change_id: 42 }
        );
    }

    #[test]
    fn test_phase_order() {
        let phases = [
            PullCursor::BootstrapIssues,
            PullCursor::description_seed(),
            PullCursor::comment_seed(),
            PullCursor::LogTail { last_change_id: 0 },
        ];
        for pair in phases.windows(2) {
            assert!(pair[0].phase_rank() < pair[1].phase_rank());
        }
        assert!(!phases[3].is_bootstrapping());
    }
}
