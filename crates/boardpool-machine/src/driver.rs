//! The polling driver.
//!
//! A [`StateDriver`] owns one machine's relationship with wall-clock time:
//! every poll interval it fetches the entities whose timeout has elapsed and
//! delivers `handle_timeout` to each, then runs the subsystem's extra
//! polling hook. The control loop itself never does the work: each tick is
//! spawned as its own task so a slow persistence layer or handler cannot
//! stall the loop's own heartbeat.
//!
//! If a tick is still running when the next interval arrives, the loop logs
//! and waits rather than piling up ticks. If the same tick is still running
//! after the watchdog limit, the process terminates itself: a wedged poller
//! is worse than a restart, and an external supervisor is assumed to bring
//! the service back. That path is deliberately unconditional.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use boardpool_core::PoolConfig;

use crate::error::Result;
use crate::events::QueuedEvent;
use crate::machine::StateMachine;

/// Default seconds between polling passes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long one tick may run before the watchdog kills the process.
pub const WATCHDOG_LIMIT: Duration = Duration::from_secs(600);

/// Driver lifecycle, observable through [`StateDriver::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Not running. Terminal once stopped; create a new driver to restart.
    Stopped,
    /// Polling.
    Running,
    /// Stop requested; the current tick and the loop are winding down.
    Stopping,
}

/// Settings for one driver instance.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Identity of the server whose entities this process polls.
    pub server_id: String,
    /// Time between polling passes.
    pub poll_interval: Duration,
    /// Tick duration beyond which the watchdog aborts the process.
    pub watchdog_limit: Duration,
}

impl DriverConfig {
    /// Defaults with the given owning-server identity.
    #[must_use]
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            poll_interval: POLL_INTERVAL,
            watchdog_limit: WATCHDOG_LIMIT,
        }
    }
}

impl From<&PoolConfig> for DriverConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            server_id: config.server_id.clone(),
            poll_interval: config.poll_interval(),
            watchdog_limit: WATCHDOG_LIMIT,
        }
    }
}

/// Subsystem-specific extra polling performed on every tick, after timeout
/// delivery (e.g. scanning for expired requests).
#[async_trait]
pub trait PollHook: Send + Sync {
    /// Run one polling pass. Failures are logged by the driver and do not
    /// stop future ticks.
    async fn poll_others(&self) -> Result<()>;
}

/// The polling driver for one state machine.
pub struct StateDriver<M: Send + Sync + 'static> {
    machine: Arc<StateMachine<M>>,
    config: DriverConfig,
    hook: Option<Arc<dyn PollHook>>,
    event_rx: Mutex<Option<UnboundedReceiver<QueuedEvent>>>,
    status: Arc<Mutex<DriverStatus>>,
    stop_requested: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<M: Send + Sync + 'static> StateDriver<M> {
    /// Create a driver for the given machine.
    pub fn new(machine: Arc<StateMachine<M>>, config: DriverConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            machine,
            config,
            hook: None,
            event_rx: Mutex::new(None),
            status: Arc::new(Mutex::new(DriverStatus::Stopped)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach the subsystem's extra polling hook.
    #[must_use]
    pub fn with_poll_hook(mut self, hook: Arc<dyn PollHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Attach the receiving half of the machine's event channel; the driver
    /// will run the dispatch task for it.
    #[must_use]
    pub fn with_event_receiver(self, rx: UnboundedReceiver<QueuedEvent>) -> Self {
        *self.event_rx.lock() = Some(rx);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> DriverStatus {
        *self.status.lock()
    }

    /// The machine this driver polls.
    #[must_use]
    pub fn machine(&self) -> &Arc<StateMachine<M>> {
        &self.machine
    }

    /// Deliver an external event through to the machine.
    ///
    /// # Errors
    ///
    /// Same contract as [`StateMachine::handle_event`].
    pub fn handle_event(&self, name: &str, event: &str, args: &Value) -> Result<()> {
        self.machine.handle_event(name, event, args)
    }

    /// Deliver a timeout through to the machine. Normally driver-internal;
    /// exposed for administrative use.
    ///
    /// # Errors
    ///
    /// Same contract as [`StateMachine::handle_timeout`].
    pub fn handle_timeout(&self, name: &str) -> Result<()> {
        self.machine.handle_timeout(name)
    }

    /// Check-and-transition passthrough; see
    /// [`StateMachine::conditional_state_change`].
    ///
    /// # Errors
    ///
    /// Same contract as the machine method.
    pub fn conditional_state_change(
        &self,
        name: &str,
        old_state: &str,
        new_state: &str,
    ) -> Result<bool> {
        self.machine.conditional_state_change(name, old_state, new_state)
    }

    /// Start the polling loop (and the event dispatch task, if an event
    /// receiver was attached). Does nothing if already running.
    pub fn start(&self) {
        {
            let mut status = self.status.lock();
            if *status != DriverStatus::Stopped {
                tracing::warn!(kind = self.machine.kind(), "driver already running");
                return;
            }
            *status = DriverStatus::Running;
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(run_loop(
            Arc::clone(&self.machine),
            self.hook.clone(),
            self.config.clone(),
            Arc::clone(&self.stop_requested),
        )));
        if let Some(rx) = self.event_rx.lock().take() {
            tasks.push(tokio::spawn(dispatch_loop(
                Arc::clone(&self.machine),
                rx,
                self.shutdown.subscribe(),
            )));
        }
        tracing::info!(
            kind = self.machine.kind(),
            server_id = %self.config.server_id,
            interval = ?self.config.poll_interval,
            "driver started"
        );
    }

    /// Request a stop and wait for the loop and dispatcher to exit. The
    /// in-flight tick finishes first.
    pub async fn stop(&self) {
        {
            let mut status = self.status.lock();
            if *status != DriverStatus::Running {
                return;
            }
            *status = DriverStatus::Stopping;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(error) = task.await {
                tracing::error!(%error, "driver task did not exit cleanly");
            }
        }
        *self.status.lock() = DriverStatus::Stopped;
        tracing::info!(kind = self.machine.kind(), "driver stopped on request");
    }
}

async fn run_loop<M: Send + Sync + 'static>(
    machine: Arc<StateMachine<M>>,
    hook: Option<Arc<dyn PollHook>>,
    config: DriverConfig,
    stop_requested: Arc<AtomicBool>,
) {
    while !stop_requested.load(Ordering::SeqCst) {
        let started = Instant::now();
        let tick = tokio::spawn(run_tick(
            Arc::clone(&machine),
            hook.clone(),
            config.server_id.clone(),
        ));

        tokio::time::sleep(config.poll_interval).await;

        // If the tick is still alive we have a problem; don't start another,
        // just wait with backoff. Past the watchdog limit, die loudly so the
        // supervisor restarts us.
        let mut delay = Duration::from_secs(1);
        while !tick.is_finished() {
            let elapsed = started.elapsed();
            if elapsed >= config.watchdog_limit {
                tracing::error!(
                    kind = machine.kind(),
                    elapsed_secs = elapsed.as_secs(),
                    "tick wedged past the watchdog limit; aborting process"
                );
                std::process::abort();
            }
            tracing::warn!(
                kind = machine.kind(),
                elapsed_secs = elapsed.as_secs(),
                "tick still running; not starting another"
            );
            tokio::time::sleep(delay).await;
            if delay < Duration::from_secs(60) {
                delay = delay.mul_f64(1.1);
            }
        }
    }
}

async fn run_tick<M: Send + Sync + 'static>(
    machine: Arc<StateMachine<M>>,
    hook: Option<Arc<dyn PollHook>>,
    server_id: String,
) {
    match machine.storage().list_timed_out(&server_id) {
        Ok(names) => {
            for name in names {
                tracing::info!(kind = machine.kind(), entity = %name, "handling timeout");
                if let Err(error) = machine.handle_timeout(&name) {
                    tracing::error!(
                        kind = machine.kind(),
                        entity = %name,
                        %error,
                        "error while handling timeout (ignored)"
                    );
                }
            }
        }
        Err(error) => {
            tracing::error!(kind = machine.kind(), %error, "could not list timed-out entities");
        }
    }

    if let Some(hook) = hook {
        if let Err(error) = hook.poll_others().await {
            tracing::error!(kind = machine.kind(), %error, "error in poll hook (ignored)");
        }
    }
}

async fn dispatch_loop<M: Send + Sync + 'static>(
    machine: Arc<StateMachine<M>>,
    mut rx: UnboundedReceiver<QueuedEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if let Err(error) = machine.handle_event(&event.name, &event.event, &event.args)
                    {
                        tracing::error!(
                            kind = machine.kind(),
                            entity = %event.name,
                            event = %event.event,
                            %error,
                            "error while handling queued event (ignored)"
                        );
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
