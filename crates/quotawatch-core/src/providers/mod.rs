//! Translation boundary between raw upstream payloads and the canonical
//! [`Provider`] record. Every provider emits its own shape; fields are probed
//! one by one and default to `None` instead of failing the batch.

use crate::models::{Credits, ErrorInfo, Provider, StatusInfo, UsageWindow};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

pub mod names;

pub use names::display_name;

pub const UNKNOWN_PROVIDER_ID: &str = "unknown";

const DEFAULT_LABELS: [(&str, &str); 3] = [
    ("primary", "Session"),
    ("secondary", "Weekly"),
    ("tertiary", "Tertiary"),
];

pub fn normalize(raw: &Value) -> Option<Provider> {
    if raw.is_null() {
        return None;
    }

    let raw_id = str_field(raw, "provider");
    let id = raw_id.clone().unwrap_or_else(|| UNKNOWN_PROVIDER_ID.to_string());
    let name = raw_id
        .as_deref()
        .map(display_name)
        .unwrap_or_else(|| "Unknown".to_string());

    let usage = raw.get("usage");
    let identity = usage
        .and_then(|u| u.get("identity"))
        .filter(|v| v.is_object())
        .or_else(|| raw.get("identity").filter(|v| v.is_object()));

    let account =
        str_field(raw, "account").or_else(|| identity.and_then(|i| str_field(i, "accountEmail")));
    let organization = str_field(raw, "organization")
        .or_else(|| identity.and_then(|i| str_field(i, "accountOrganization")));
    let plan =
        str_field(raw, "plan").or_else(|| identity.and_then(|i| str_field(i, "loginMethod")));

    let [primary, secondary, tertiary] = DEFAULT_LABELS.map(|(key, label)| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|w| normalize_window(w, label))
    });

    Some(Provider {
        id,
        display_name: name,
        version: str_field(raw, "version"),
        source: str_field(raw, "source"),
        account,
        organization,
        plan,
        status: raw.get("status").and_then(normalize_status),
        primary,
        secondary,
        tertiary,
        credits: raw.get("credits").and_then(normalize_credits),
        error: raw.get("error").and_then(normalize_error),
    })
}

fn normalize_window(raw: &Value, default_label: &str) -> Option<UsageWindow> {
    if !raw.is_object() {
        return None;
    }
    let used_percent = raw.get("usedPercent").and_then(Value::as_f64).unwrap_or(0.0);
    Some(UsageWindow {
        label: str_field(raw, "label").unwrap_or_else(|| default_label.to_string()),
        used_percent,
        remaining_percent: 100.0 - used_percent,
        window_minutes: raw.get("windowMinutes").and_then(Value::as_i64),
        resets_at: raw.get("resetsAt").and_then(parse_timestamp),
        reset_description: str_field(raw, "resetDescription"),
    })
}

fn normalize_status(raw: &Value) -> Option<StatusInfo> {
    if !raw.is_object() {
        return None;
    }
    Some(StatusInfo {
        indicator: str_field(raw, "indicator"),
        description: str_field(raw, "description"),
        updated_at: raw.get("updatedAt").and_then(parse_timestamp),
        url: str_field(raw, "url"),
    })
}

fn normalize_credits(raw: &Value) -> Option<Credits> {
    let remaining = raw.get("remaining").and_then(Value::as_f64)?;
    Some(Credits {
        remaining,
        updated_at: raw.get("updatedAt").and_then(parse_timestamp),
    })
}

fn normalize_error(raw: &Value) -> Option<ErrorInfo> {
    if !raw.is_object() {
        return None;
    }
    Some(ErrorInfo {
        code: raw.get("code").and_then(Value::as_i64),
        kind: str_field(raw, "kind"),
        message: str_field(raw, "message"),
    })
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// RFC 3339 strings or epoch seconds.
pub(crate) fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn full_payload() -> Value {
        json!({
            "provider": "claude",
            "version": "2.1.0",
            "source": "oauth",
            "status": {
                "indicator": "minor",
                "description": "Elevated errors",
                "updatedAt": "2026-10-17T08:00:00Z",
                "url": "https://status.example.com"
            },
            "usage": {
                "primary": {
                    "usedPercent": 55,
                    "windowMinutes": 300,
                    "resetsAt": "2026-10-17T12:00:00Z",
                    "resetDescription": "in 4h"
                },
                "secondary": { "usedPercent": 12.5 },
                "tertiary": { "label": "Opus", "usedPercent": 80 },
                "identity": {
                    "accountEmail": "dev@example.com",
                    "accountOrganization": "Acme",
                    "loginMethod": "Max"
                }
            },
            "credits": { "remaining": 42.5, "updatedAt": 1792224000 },
            "error": null
        })
    }

    #[test]
    fn null_input_yields_none() {
        assert!(normalize(&Value::Null).is_none());
    }

    #[test]
    fn empty_object_defaults_to_unknown() {
        let p = normalize(&json!({})).unwrap();
        assert_eq!(p.id, "unknown");
        assert_eq!(p.display_name, "Unknown");
        assert!(p.primary.is_none());
        assert!(p.account.is_none());
        assert!(p.error.is_none());
    }

    #[test]
    fn normalize_is_deterministic() {
        for raw in [json!({}), Value::Null, full_payload()] {
            assert_eq!(normalize(&raw), normalize(&raw));
        }
    }

    #[test]
    fn full_payload_maps_every_field() {
        let p = normalize(&full_payload()).unwrap();
        assert_eq!(p.id, "claude");
        assert_eq!(p.display_name, "Claude");
        assert_eq!(p.version.as_deref(), Some("2.1.0"));
        assert_eq!(p.account.as_deref(), Some("dev@example.com"));
        assert_eq!(p.organization.as_deref(), Some("Acme"));
        assert_eq!(p.plan.as_deref(), Some("Max"));

        let primary = p.primary.unwrap();
        assert_eq!(primary.label, "Session");
        assert_eq!(primary.remaining_percent, 45.0);
        assert_eq!(primary.window_minutes, Some(300));
        assert_eq!(
            primary.resets_at.map(|t| t.to_rfc3339()),
            Some("2026-10-17T12:00:00+00:00".to_string())
        );

        assert_eq!(p.secondary.unwrap().label, "Weekly");
        assert_eq!(p.tertiary.unwrap().label, "Opus");

        let credits = p.credits.unwrap();
        assert_eq!(credits.remaining, 42.5);
        assert!(credits.updated_at.is_some());
        assert_eq!(p.status.unwrap().indicator.as_deref(), Some("minor"));
    }

    #[test]
    fn top_level_account_wins_over_identity() {
        let p = normalize(&json!({
            "provider": "codex",
            "account": "top@example.com",
            "identity": { "accountEmail": "nested@example.com", "loginMethod": "Pro" }
        }))
        .unwrap();
        assert_eq!(p.account.as_deref(), Some("top@example.com"));
        assert_eq!(p.plan.as_deref(), Some("Pro"));
    }

    #[test]
    fn window_without_used_percent_defaults_to_zero() {
        let p = normalize(&json!({ "provider": "gemini", "usage": { "primary": {} } })).unwrap();
        let w = p.primary.unwrap();
        assert_eq!(w.used_percent, 0.0);
        assert_eq!(w.remaining_percent, 100.0);
        assert!(w.resets_at.is_none());
        assert!(w.window_minutes.is_none());
    }

    #[test]
    fn overage_is_not_clamped() {
        let raw = json!({ "provider": "codex", "usage": { "primary": { "usedPercent": 120 } } });
        let p = normalize(&raw).unwrap();
        assert_eq!(p.primary.unwrap().remaining_percent, -20.0);
    }

    #[test]
    fn malformed_fields_degrade_to_none() {
        let p = normalize(&json!({
            "provider": "cursor",
            "usage": { "primary": "broken", "secondary": { "usedPercent": "lots", "resetsAt": "soon" } },
            "credits": { "remaining": "many" },
            "status": 7,
            "error": { "message": "token expired", "code": 401 }
        }))
        .unwrap();
        assert!(p.primary.is_none());
        let secondary = p.secondary.unwrap();
        assert_eq!(secondary.used_percent, 0.0);
        assert!(secondary.resets_at.is_none());
        assert!(p.credits.is_none());
        assert!(p.status.is_none());
        let error = p.error.unwrap();
        assert_eq!(error.message.as_deref(), Some("token expired"));
        assert_eq!(error.code, Some(401));
        assert!(error.kind.is_none());
    }

    #[test]
    fn unknown_provider_keeps_raw_id_as_display_name() {
        let p = normalize(&json!({ "provider": "selfhosted" })).unwrap();
        assert_eq!(p.id, "selfhosted");
        assert_eq!(p.display_name, "selfhosted");
    }
}
