//! Long-lived coordinator: owns the state machine, the refresh timer and the
//! single in-flight fetch. Everything runs on one task; the only resumption
//! points are the timer, the UI tick, an incoming command, or the fetch
//! completing.

use crate::cache::CacheStore;
use crate::config::{Config, Reaction};
use crate::fetch::Fetcher;
use crate::models::FetchResult;
use crate::state::{Interpretation, RefreshState, StateMachine, Trigger, ViewModel};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, OptionFuture};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// How often staleness is re-read while nothing else happens.
pub const VIEW_TICK: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum Command {
    Refresh,
    Reconfigure(Box<Config>),
    Shutdown,
}

/// Cloneable entry point for consumers.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    commands: mpsc::UnboundedSender<Command>,
    views: watch::Receiver<ViewModel>,
}

impl RefreshHandle {
    /// Same as the timer firing early; ignored while a fetch is in flight.
    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    pub fn reconfigure(&self, config: Config) {
        let _ = self.commands.send(Command::Reconfigure(Box::new(config)));
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.views.clone()
    }

    pub fn current(&self) -> ViewModel {
        self.views.borrow().clone()
    }
}

pub struct Refresher<F, S> {
    machine: StateMachine<S>,
    fetcher: F,
    config: Config,
    commands: mpsc::UnboundedReceiver<Command>,
    views: watch::Sender<ViewModel>,
    published_state: RefreshState,
    started_at: (Instant, DateTime<Utc>),
}

impl<F: Fetcher, S: CacheStore> Refresher<F, S> {
    pub fn new(config: Config, fetcher: F, store: S) -> (Self, RefreshHandle) {
        let machine = StateMachine::seed(store, Interpretation::from(&config));
        let started_at = (Instant::now(), Utc::now());
        let initial = machine.view(started_at.1);
        let published_state = initial.state;
        let (views_tx, views_rx) = watch::channel(initial);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let refresher = Self {
            machine,
            fetcher,
            config,
            commands: commands_rx,
            views: views_tx,
            published_state,
            started_at,
        };
        let handle = RefreshHandle {
            commands: commands_tx,
            views: views_rx,
        };
        (refresher, handle)
    }

    /// Runs until `Shutdown` or every handle is dropped. Dropping the
    /// in-flight fetch on exit kills the child process.
    pub async fn run(mut self) {
        let mut timer = refresh_timer(self.config.refresh_interval());
        let mut view_tick = tokio::time::interval_at(Instant::now() + VIEW_TICK, VIEW_TICK);
        let mut in_flight: Option<BoxFuture<'static, FetchResult>> = None;

        self.trigger(Trigger::Startup, &mut in_flight);

        loop {
            tokio::select! {
                Some(result) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    self.machine.complete(result);
                    self.publish();
                }
                _ = timer.tick() => {
                    self.trigger(Trigger::Timer, &mut in_flight);
                }
                _ = view_tick.tick() => {
                    self.publish_if_state_changed();
                }
                command = self.commands.recv() => match command {
                    Some(Command::Refresh) => self.trigger(Trigger::Manual, &mut in_flight),
                    Some(Command::Reconfigure(config)) => self.reconfigure(*config, &mut timer),
                    Some(Command::Shutdown) | None => {
                        info!("refresher shutting down");
                        break;
                    }
                },
            }
        }
    }

    fn trigger(&mut self, trigger: Trigger, in_flight: &mut Option<BoxFuture<'static, FetchResult>>) {
        if !self.machine.begin_refresh(trigger) {
            return;
        }
        *in_flight = Some(self.fetcher.fetch(self.config.fetch_options()));
        self.publish();
    }

    fn reconfigure(&mut self, config: Config, timer: &mut Interval) {
        let changes = self.config.changes(&config);
        self.config = config;

        let mut reevaluate = false;
        for change in changes {
            match change.reaction() {
                Reaction::RescheduleTimer => {
                    info!("refresh interval now {:?}", self.config.refresh_interval());
                    *timer = refresh_timer(self.config.refresh_interval());
                }
                Reaction::ReevaluateView => reevaluate = true,
                Reaction::NextFetch => debug!("{change:?} applies from the next fetch"),
            }
        }

        if reevaluate {
            self.machine
                .set_interpretation(Interpretation::from(&self.config));
            self.publish();
        }
    }

    /// Wall time advanced by the runtime clock, so staleness moves in step
    /// with the timers.
    fn now(&self) -> DateTime<Utc> {
        let (instant, wall) = self.started_at;
        let elapsed = chrono::Duration::from_std(instant.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        wall + elapsed
    }

    fn publish(&mut self) {
        let view = self.machine.view(self.now());
        self.published_state = view.state;
        self.views.send_replace(view);
    }

    fn publish_if_state_changed(&mut self) {
        if self.machine.state(self.now()) != self.published_state {
            self.publish();
        }
    }
}

/// First tick one full period from now; the startup fetch is triggered
/// separately.
fn refresh_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}
