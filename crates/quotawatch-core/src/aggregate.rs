use crate::models::{AggregateStats, Provider, Thresholds};

/// Summarizes every window of every provider that is not reporting an error.
/// Thresholds compare with strict `<`; critical takes precedence over warning.
pub fn aggregate(providers: &[Provider], thresholds: Thresholds) -> AggregateStats {
    let mut stats = AggregateStats::default();

    for provider in providers.iter().filter(|p| !p.has_error()) {
        for window in provider.windows() {
            let remaining = window.remaining_percent;

            if stats.min_remaining_percent.map_or(true, |min| remaining < min) {
                stats.min_remaining_percent = Some(remaining);
                stats.urgent_provider_id = Some(provider.id.clone());
            }

            if remaining < thresholds.critical {
                stats.critical_count += 1;
            } else if remaining < thresholds.warning {
                stats.warning_count += 1;
            }

            if let Some(reset) = window.resets_at {
                if stats.next_reset_time.map_or(true, |next| reset < next) {
                    stats.next_reset_time = Some(reset);
                }
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorInfo, UsageWindow};
    use crate::providers::normalize;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn window(remaining: f64) -> UsageWindow {
        UsageWindow {
            label: "Session".to_string(),
            used_percent: 100.0 - remaining,
            remaining_percent: remaining,
            window_minutes: None,
            resets_at: None,
            reset_description: None,
        }
    }

    fn provider(id: &str, windows: [Option<UsageWindow>; 3]) -> Provider {
        let [primary, secondary, tertiary] = windows;
        Provider {
            id: id.to_string(),
            display_name: id.to_string(),
            version: None,
            source: None,
            account: None,
            organization: None,
            plan: None,
            status: None,
            primary,
            secondary,
            tertiary,
            credits: None,
            error: None,
        }
    }

    #[test]
    fn empty_input_yields_empty_stats() {
        assert_eq!(aggregate(&[], Thresholds::default()), AggregateStats::default());
    }

    #[test]
    fn happy_path_from_raw_payload() {
        let raw = json!([{ "provider": "claude", "usage": { "primary": { "usedPercent": 55 } } }]);
        let providers: Vec<Provider> = raw
            .as_array()
            .unwrap()
            .iter()
            .filter_map(normalize)
            .collect();
        let stats = aggregate(&providers, Thresholds::default());
        assert_eq!(stats.min_remaining_percent, Some(45.0));
        assert_eq!(stats.urgent_provider_id.as_deref(), Some("claude"));
        assert_eq!(stats.warning_count, 0);
        assert_eq!(stats.critical_count, 0);
    }

    #[test]
    fn window_below_warning_counts_once() {
        let stats = aggregate(
            &[provider("codex", [Some(window(15.0)), None, None])],
            Thresholds::default(),
        );
        assert_eq!(stats.warning_count, 1);
        assert_eq!(stats.critical_count, 0);
    }

    #[test]
    fn exact_critical_boundary_is_not_critical() {
        let stats = aggregate(
            &[provider("codex", [Some(window(5.0)), None, None])],
            Thresholds::default(),
        );
        assert_eq!(stats.critical_count, 0);
        assert_eq!(stats.warning_count, 1);

        let at_warning = aggregate(
            &[provider("codex", [Some(window(20.0)), None, None])],
            Thresholds::default(),
        );
        assert_eq!(at_warning.warning_count, 0);
    }

    #[test]
    fn critical_takes_precedence_over_warning() {
        let stats = aggregate(
            &[provider("codex", [Some(window(2.0)), Some(window(10.0)), Some(window(90.0))])],
            Thresholds::default(),
        );
        assert_eq!(stats.critical_count, 1);
        assert_eq!(stats.warning_count, 1);
        assert_eq!(stats.min_remaining_percent, Some(2.0));
    }

    #[test]
    fn errored_providers_are_excluded() {
        let mut broken = provider("cursor", [Some(window(1.0)), None, None]);
        broken.error = Some(ErrorInfo {
            message: Some("expired".to_string()),
            ..Default::default()
        });
        let stats = aggregate(
            &[broken, provider("claude", [Some(window(60.0)), None, None])],
            Thresholds::default(),
        );
        assert_eq!(stats.min_remaining_percent, Some(60.0));
        assert_eq!(stats.urgent_provider_id.as_deref(), Some("claude"));
        assert_eq!(stats.critical_count, 0);
    }

    #[test]
    fn only_errored_providers_yield_no_minimum() {
        let mut broken = provider("cursor", [Some(window(1.0)), None, None]);
        broken.error = Some(ErrorInfo::default());
        let stats = aggregate(&[broken, provider("gemini", [None, None, None])], Thresholds::default());
        assert_eq!(stats.min_remaining_percent, None);
        assert_eq!(stats.urgent_provider_id, None);
    }

    #[test]
    fn ties_keep_first_minimum() {
        let stats = aggregate(
            &[
                provider("first", [Some(window(30.0)), None, None]),
                provider("second", [Some(window(30.0)), None, None]),
            ],
            Thresholds::default(),
        );
        assert_eq!(stats.urgent_provider_id.as_deref(), Some("first"));
    }

    #[test]
    fn next_reset_is_earliest_across_providers() {
        let now = Utc::now();
        let mut late = window(50.0);
        late.resets_at = Some(now + Duration::hours(5));
        let mut soon = window(70.0);
        soon.resets_at = Some(now + Duration::minutes(20));

        let stats = aggregate(
            &[
                provider("claude", [Some(late), None, None]),
                provider("codex", [None, Some(soon), None]),
            ],
            Thresholds::default(),
        );
        assert_eq!(stats.next_reset_time, Some(now + Duration::minutes(20)));
    }

    #[test]
    fn minimum_matches_true_minimum() {
        let lists = [
            vec![provider("a", [Some(window(80.0)), Some(window(-10.0)), None])],
            vec![
                provider("a", [Some(window(33.3)), None, None]),
                provider("b", [None, None, Some(window(12.0))]),
            ],
        ];
        for providers in lists {
            let expected = providers
                .iter()
                .flat_map(|p| p.windows().map(|w| w.remaining_percent))
                .fold(f64::INFINITY, f64::min);
            let stats = aggregate(&providers, Thresholds::default());
            assert_eq!(stats.min_remaining_percent, Some(expected));
        }
    }

    #[test]
    fn custom_thresholds_are_respected() {
        let thresholds = Thresholds {
            warning: 50.0,
            critical: 25.0,
        };
        let stats = aggregate(
            &[provider("claude", [Some(window(40.0)), Some(window(20.0)), None])],
            thresholds,
        );
        assert_eq!(stats.warning_count, 1);
        assert_eq!(stats.critical_count, 1);
    }
}
