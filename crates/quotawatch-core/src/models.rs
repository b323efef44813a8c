use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageWindow {
    pub label: String,
    pub used_percent: f64,
    /// `100 - used_percent`; negative while the provider reports overage.
    pub remaining_percent: f64,
    pub window_minutes: Option<i64>,
    pub resets_at: Option<DateTime<Utc>>,
    pub reset_description: Option<String>,
}

impl UsageWindow {
    pub fn resets_at_local(&self) -> Option<DateTime<Local>> {
        self.resets_at.map(|ts| ts.with_timezone(&Local))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credits {
    pub remaining: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub indicator: Option<String>,
    pub description: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: Option<i64>,
    pub kind: Option<String>,
    pub message: Option<String>,
}

/// Canonical provider record. Usage windows and `error` may coexist when the
/// upstream reports stale usage next to a transient failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub display_name: String,
    pub version: Option<String>,
    pub source: Option<String>,
    pub account: Option<String>,
    pub organization: Option<String>,
    pub plan: Option<String>,
    pub status: Option<StatusInfo>,
    pub primary: Option<UsageWindow>,
    pub secondary: Option<UsageWindow>,
    pub tertiary: Option<UsageWindow>,
    pub credits: Option<Credits>,
    pub error: Option<ErrorInfo>,
}

impl Provider {
    pub fn windows(&self) -> impl Iterator<Item = &UsageWindow> {
        [&self.primary, &self.secondary, &self.tertiary]
            .into_iter()
            .flatten()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 20.0,
            critical: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub min_remaining_percent: Option<f64>,
    pub urgent_provider_id: Option<String>,
    pub warning_count: u32,
    pub critical_count: u32,
    pub next_reset_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    Timeout,
    NonZeroExit,
    ParseError,
    UnexpectedShape,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureReason::NotFound => "not found",
            FailureReason::Timeout => "timeout",
            FailureReason::NonZeroExit => "nonzero exit",
            FailureReason::ParseError => "parse error",
            FailureReason::UnexpectedShape => "unexpected shape",
        };
        f.write_str(label)
    }
}

/// Outcome of one fetch attempt. `timestamp` is when the attempt started.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Success {
        providers: Vec<Provider>,
        timestamp: DateTime<Utc>,
    },
    Failure {
        reason: FailureReason,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl FetchResult {
    pub fn failure(
        reason: FailureReason,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        FetchResult::Failure {
            reason,
            message: message.into(),
            timestamp,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FetchResult::Success { timestamp, .. } | FetchResult::Failure { timestamp, .. } => {
                *timestamp
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}
