//! Enforcement service
//!
//! Owns one instance of every engine component and drives them from a request
//! channel. Platform events arrive as [`EnforcementRequest`]s, so the engine
//! never depends on how they were delivered.

use crate::enforcement::metrics::MetricsCollector;
use crate::enforcement::notify::NotificationDispatcher;
use crate::enforcement::operator::Operator;
use crate::enforcement::platform::Platform;
use crate::enforcement::rate_limit::RateLimiters;
use crate::enforcement::reconcile::Reconciler;
use crate::enforcement::retry::RetryExecutor;
use crate::enforcement::silence::SilenceGuard;
use crate::enforcement::store::Store;
use crate::enforcement::strike::StrikeEngine;
use crate::enforcement::unban::{UnbanListener, UnbanOutcome};
use crate::enforcement::{EnforcementRequest, EnforcementSettings, SweepReply};
use crate::ENFORCEMENT_TARGET;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Capacity of the request channel
const REQUEST_BUFFER: usize = 100;

#[derive(Clone)]
pub struct EnforcementService {
    silence: SilenceGuard,
    reconciler: Arc<Reconciler>,
    notifier: Arc<NotificationDispatcher>,
    strikes: Arc<StrikeEngine>,
    unban_listener: Arc<UnbanListener>,
    operator: Arc<Operator>,
}

impl EnforcementService {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn Store>,
        metrics: Arc<dyn MetricsCollector>,
        settings: EnforcementSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let limiters = Arc::new(RateLimiters::new(settings.rate_limit_delay));
        let silence = SilenceGuard::new(Arc::clone(&store), settings.silence_on_store_error);
        let retry = RetryExecutor::new(
            Arc::clone(&platform),
            Arc::clone(&limiters),
            Arc::clone(&store),
            Arc::clone(&metrics),
        );

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            silence.clone(),
            retry,
            Arc::clone(&settings),
        ));
        let notifier = Arc::new(NotificationDispatcher::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            silence.clone(),
        ));
        let strikes = Arc::new(StrikeEngine::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            silence.clone(),
            Arc::clone(&notifier),
            Arc::clone(&metrics),
        ));
        let unban_listener = Arc::new(UnbanListener::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            silence.clone(),
            limiters,
            Arc::clone(&strikes),
            Arc::clone(&metrics),
            Arc::clone(&settings),
        ));
        let operator = Arc::new(Operator::new(
            platform,
            store,
            silence.clone(),
            Arc::clone(&reconciler),
            metrics,
            settings,
        ));

        Self {
            silence,
            reconciler,
            notifier,
            strikes,
            unban_listener,
            operator,
        }
    }

    pub fn silence(&self) -> &SilenceGuard {
        &self.silence
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    pub fn strikes(&self) -> &StrikeEngine {
        &self.strikes
    }

    pub fn unban_listener(&self) -> &UnbanListener {
        &self.unban_listener
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Create the request channel for [`Self::run`]
    pub fn channel() -> (Sender<EnforcementRequest>, Receiver<EnforcementRequest>) {
        mpsc::channel(REQUEST_BUFFER)
    }

    /// Start the enforcement task on the runtime
    pub fn start(
        self,
        rx: Receiver<EnforcementRequest>,
        initial_delay: Duration,
        sweep_interval: Option<Duration>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(rx, initial_delay, sweep_interval).await })
    }

    /// Process requests until [`EnforcementRequest::Shutdown`] or every
    /// sender is gone
    ///
    /// A sweep runs once after `initial_delay`, then every `sweep_interval`
    /// if one is set. Sweeps and unban events run on their own tasks, so the
    /// queue keeps draining while a long sweep works through the rate
    /// limiter. At most one sweep runs at a time.
    pub async fn run(
        &self,
        mut rx: Receiver<EnforcementRequest>,
        initial_delay: Duration,
        sweep_interval: Option<Duration>,
    ) {
        info!(
            target: ENFORCEMENT_TARGET,
            initial_delay_secs = initial_delay.as_secs(),
            sweep_interval_secs = sweep_interval.map(|i| i.as_secs()),
            "Starting enforcement task"
        );

        let initial = tokio::time::sleep(initial_delay);
        tokio::pin!(initial);
        let mut initial_done = false;
        let mut interval = sweep_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval
        });
        let mut sweep: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(EnforcementRequest::Reconcile { reply }) => {
                            info!(target: ENFORCEMENT_TARGET, "Received reconcile request");
                            self.start_sweep(&mut sweep, reply);
                        }
                        Some(EnforcementRequest::UnbanDetected { guild_id, user_id }) => {
                            let service = self.clone();
                            tokio::spawn(async move {
                                service.handle_unban(guild_id, user_id).await;
                            });
                        }
                        Some(EnforcementRequest::Shutdown) => {
                            info!(target: ENFORCEMENT_TARGET, "Received shutdown request for enforcement task");
                            break;
                        }
                        None => break,
                    }
                }
                () = &mut initial, if !initial_done => {
                    initial_done = true;
                    info!(target: ENFORCEMENT_TARGET, "Running initial enforcement sweep");
                    self.start_sweep(&mut sweep, None);
                }
                _ = async {
                    match interval.as_mut() {
                        Some(interval) => interval.tick().await,
                        None => std::future::pending().await,
                    }
                } => {
                    info!(target: ENFORCEMENT_TARGET, "Performing periodic enforcement sweep");
                    self.start_sweep(&mut sweep, None);
                }
            }
        }

        if let Some(task) = sweep.filter(|task| !task.is_finished()) {
            warn!(target: ENFORCEMENT_TARGET, "Aborting sweep in progress");
            task.abort();
        }
        info!(target: ENFORCEMENT_TARGET, "Enforcement task shut down");
    }

    /// Spawn a sweep unless the previous one is still running
    fn start_sweep(&self, running: &mut Option<JoinHandle<()>>, reply: Option<SweepReply>) {
        if running.as_ref().is_some_and(|task| !task.is_finished()) {
            info!(target: ENFORCEMENT_TARGET, "Sweep already running, skipping");
            return;
        }

        let reconciler = Arc::clone(&self.reconciler);
        *running = Some(tokio::spawn(async move {
            let result = reconciler.reconcile().await;
            match &result {
                Ok(report) => info!(
                    target: ENFORCEMENT_TARGET,
                    banned = report.banned.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped.len(),
                    "Sweep finished"
                ),
                Err(e) => error!(target: ENFORCEMENT_TARGET, error = %e, "Sweep failed"),
            }
            if let Some(reply) = reply {
                // The requester may have given up waiting
                let _ = reply.send(result);
            }
        }));
    }

    async fn handle_unban(&self, guild_id: u64, user_id: u64) {
        match self.unban_listener.on_unban_detected(guild_id, user_id).await {
            Ok(UnbanOutcome::Ignored(reason)) => {
                info!(target: ENFORCEMENT_TARGET, guild_id, user_id, %reason, "Unban ignored");
            }
            Ok(UnbanOutcome::Enforced { rebanned, strike, .. }) => info!(
                target: ENFORCEMENT_TARGET,
                guild_id,
                user_id,
                rebanned,
                strike = strike.as_ref().and_then(|s| s.count()),
                "Unban handled"
            ),
            Err(e) => error!(
                target: ENFORCEMENT_TARGET,
                guild_id,
                user_id,
                error = %e,
                "Failed to handle unban"
            ),
        }
    }
}
