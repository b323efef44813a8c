//! Last-known-good cache and the externally visible refresh state.
//!
//! Staleness is never stored: it is derived from the last success timestamp
//! each time the state is read, so the caller passes `now` explicitly.

use crate::aggregate::aggregate;
use crate::cache::{CacheRecord, CacheStore};
use crate::config::Config;
use crate::models::{AggregateStats, FetchResult, Provider, Thresholds};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshState {
    Idle,
    Loading,
    Ok,
    Stale,
    Error,
    ErrorWithCache,
}

/// Single label for consumers that render one indicator. Declared lowest
/// first so `Ord` follows priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
    Loading,
    Stale,
    Error,
}

impl Severity {
    pub fn from_state(state: RefreshState, stats: &AggregateStats) -> Self {
        match state {
            RefreshState::Error | RefreshState::ErrorWithCache => Severity::Error,
            RefreshState::Stale => Severity::Stale,
            RefreshState::Loading => Severity::Loading,
            RefreshState::Idle | RefreshState::Ok if stats.critical_count > 0 => Severity::Critical,
            RefreshState::Idle | RefreshState::Ok if stats.warning_count > 0 => Severity::Warning,
            RefreshState::Idle | RefreshState::Ok => Severity::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Timer,
    Manual,
}

/// Settings that change how cached data is read, never what is fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpretation {
    pub thresholds: Thresholds,
    pub stale_after: Duration,
}

impl Default for Interpretation {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            stale_after: Duration::from_secs(600),
        }
    }
}

impl From<&Config> for Interpretation {
    fn from(cfg: &Config) -> Self {
        Self {
            thresholds: cfg.thresholds(),
            stale_after: cfg.stale_after(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    pub state: RefreshState,
    pub visual_severity: Severity,
    pub providers: Vec<Provider>,
    pub stats: AggregateStats,
    pub cache_age_seconds: Option<i64>,
    pub last_error: Option<String>,
}

impl ViewModel {
    pub fn idle() -> Self {
        Self {
            state: RefreshState::Idle,
            visual_severity: Severity::Normal,
            providers: Vec::new(),
            stats: AggregateStats::default(),
            cache_age_seconds: None,
            last_error: None,
        }
    }
}

/// Settled phases. `Stale` is not one of them; it is layered on top of `Ok`
/// and `ErrorWithCache` when the cache is read. `Loading` is tracked beside
/// the phase so the previous outcome still drives severity during a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Ok,
    Error,
    ErrorWithCache,
}

pub struct StateMachine<S> {
    store: S,
    record: CacheRecord,
    phase: Phase,
    loading: bool,
    interpretation: Interpretation,
}

impl<S: CacheStore> StateMachine<S> {
    /// Loads the durable record once and picks the initial phase from it.
    pub fn seed(store: S, interpretation: Interpretation) -> Self {
        let record = CacheRecord::load(&store);
        let phase = if record.last_payload.is_some() {
            Phase::Ok
        } else if record.last_error.is_some() {
            Phase::Error
        } else {
            Phase::Idle
        };
        debug!("seeded refresh state as {phase:?}");
        Self {
            store,
            record,
            phase,
            loading: false,
            interpretation,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> RefreshState {
        if self.loading {
            return RefreshState::Loading;
        }
        self.settled_state(now)
    }

    fn settled_state(&self, now: DateTime<Utc>) -> RefreshState {
        match self.phase {
            Phase::Idle => RefreshState::Idle,
            Phase::Error => RefreshState::Error,
            Phase::Ok if self.is_stale(now) => RefreshState::Stale,
            Phase::Ok => RefreshState::Ok,
            Phase::ErrorWithCache if self.is_stale(now) => RefreshState::Stale,
            Phase::ErrorWithCache => RefreshState::ErrorWithCache,
        }
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let limit = i64::try_from(self.interpretation.stale_after.as_secs()).unwrap_or(i64::MAX);
        self.record
            .age_seconds(now)
            .is_some_and(|age| age > limit)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Enters `Loading`. Returns `false`, changing nothing, when a fetch is
    /// already in flight.
    pub fn begin_refresh(&mut self, trigger: Trigger) -> bool {
        if self.is_loading() {
            debug!("dropping {trigger:?} refresh: fetch already in flight");
            return false;
        }
        debug!("refresh started by {trigger:?}");
        self.loading = true;
        true
    }

    /// Applies a finished fetch. Failures only ever replace the error message,
    /// in memory and in the store.
    pub fn complete(&mut self, result: FetchResult) {
        self.loading = false;
        let persisted = match result {
            FetchResult::Success {
                providers,
                timestamp,
            } => {
                info!("refresh succeeded with {} providers", providers.len());
                self.record.last_payload = Some(providers);
                // Stored as whole seconds; keep memory identical to a reload.
                self.record.last_success_timestamp = Some(timestamp.trunc_subsecs(0));
                self.record.last_error = None;
                self.phase = Phase::Ok;
                self.record.save(&mut self.store)
            }
            FetchResult::Failure {
                reason, message, ..
            } => {
                self.phase = if self.record.last_payload.is_some() {
                    Phase::ErrorWithCache
                } else {
                    Phase::Error
                };
                warn!("refresh failed ({reason}), now {:?}", self.phase);
                let persisted = self.store.write_last_error(&message);
                self.record.last_error = Some(message);
                persisted
            }
        };

        if let Err(e) = persisted {
            warn!("failed to persist cache record: {e}");
        }
    }

    pub fn set_interpretation(&mut self, interpretation: Interpretation) {
        self.interpretation = interpretation;
    }

    pub fn interpretation(&self) -> Interpretation {
        self.interpretation
    }

    pub fn record(&self) -> &CacheRecord {
        &self.record
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// While loading, severity never drops below `Loading` but an error or
    /// stale cache from the last settled phase still outranks it.
    pub fn view(&self, now: DateTime<Utc>) -> ViewModel {
        let state = self.state(now);
        let providers = self.record.last_payload.clone().unwrap_or_default();
        let stats = aggregate(&providers, self.interpretation.thresholds);
        let mut visual_severity = Severity::from_state(self.settled_state(now), &stats);
        if self.loading {
            visual_severity = visual_severity.max(Severity::Loading);
        }
        ViewModel {
            state,
            visual_severity,
            providers,
            stats,
            cache_age_seconds: self.record.age_seconds(now),
            last_error: self.record.last_error.clone(),
        }
    }
}
