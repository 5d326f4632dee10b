//! Registration manager: owns the lifecycle of one outbound announcement.
//!
//! State machine:
//!
//! ```text
//! Unpublished ──register()──▶ Registering ──success──▶ Published
//!      ▲                          │                       │
//!      └──────retries exhausted───┘      loss detected ───┘ (back to Registering)
//!      ▲                                                  │
//!      └──────────────────unregister()────────────────────┘
//! ```
//!
//! Only one attempt may be in flight at a time, whether it came from a
//! caller or from the health monitor healing a lost announcement. Every
//! attempt carries an epoch; `unregister()` bumps it so an attempt that
//! finishes afterwards rolls its publish back instead of committing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use streamlink_core::config::RegistrationConfig;
use streamlink_core::ServiceDescriptor;

use crate::transport::Transport;

/// Floor for the health-check period; `interval` rejects a zero period.
const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(1);

/// Timing and retry bounds for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPolicy {
    /// Publish attempts per `register()` call. Values below 1 behave as 1.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub monitor_interval: Duration,
    pub settle_delay: Duration,
    pub shutdown_grace: Duration,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self::from(&RegistrationConfig::default())
    }
}

impl From<&RegistrationConfig> for RegistrationPolicy {
    fn from(c: &RegistrationConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            retry_delay: Duration::from_millis(c.retry_delay_ms),
            monitor_interval: Duration::from_millis(c.monitor_interval_ms),
            settle_delay: Duration::from_millis(c.settle_delay_ms),
            shutdown_grace: Duration::from_millis(c.shutdown_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unpublished,
    Registering,
    Published,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Unpublished => "unpublished",
            RegistrationState::Registering => "registering",
            RegistrationState::Published => "published",
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Inner {
    state: RegistrationState,
    /// Set while Published or while an attempt is in flight.
    descriptor: Option<ServiceDescriptor>,
    epoch: u64,
    retry_count: u32,
    closed: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    policy: RegistrationPolicy,
    inner: Mutex<Inner>,
    shutdown: watch::Sender<bool>,
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Published,
    Exhausted,
    Cancelled,
    Superseded,
}

/// What `begin_attempt` hands to the attempt it admitted.
struct Admitted {
    epoch: u64,
    /// Descriptor that was Published when the attempt began.
    previous: Option<ServiceDescriptor>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to Registering unless an attempt is already in flight.
    fn begin_attempt(&self, descriptor: &ServiceDescriptor) -> Option<Admitted> {
        let mut inner = self.lock();
        if inner.closed {
            tracing::warn!(name = descriptor.instance_name(), "registration manager is closed");
            return None;
        }
        if inner.state == RegistrationState::Registering {
            tracing::warn!(
                name = descriptor.instance_name(),
                "registration already in progress"
            );
            return None;
        }
        let previous = match inner.state {
            RegistrationState::Published => inner.descriptor.take(),
            _ => None,
        };
        inner.state = RegistrationState::Registering;
        inner.descriptor = Some(descriptor.clone());
        inner.retry_count = 0;
        inner.epoch += 1;
        Some(Admitted {
            epoch: inner.epoch,
            previous,
        })
    }

    fn is_current(&self, epoch: u64) -> bool {
        let inner = self.lock();
        inner.epoch == epoch && !inner.closed
    }

    /// Record a failed publish. Returns the new count.
    fn bump_retry(&self, epoch: u64) -> u32 {
        let mut inner = self.lock();
        if inner.epoch == epoch {
            inner.retry_count += 1;
        }
        inner.retry_count
    }

    /// Commit an attempt. Returns true only if this attempt is now Published.
    fn complete(&self, epoch: u64, descriptor: &ServiceDescriptor, outcome: Outcome) -> bool {
        let superseded = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                true
            } else if outcome == Outcome::Published {
                inner.state = RegistrationState::Published;
                inner.descriptor = Some(descriptor.clone());
                return true;
            } else {
                inner.state = RegistrationState::Unpublished;
                inner.descriptor = None;
                false
            }
        };

        if superseded && outcome == Outcome::Published {
            tracing::info!(
                name = descriptor.instance_name(),
                "registration superseded by unregister, retracting"
            );
            self.retract_quietly(descriptor);
        }
        false
    }

    /// Reset after an attempt that never reached `complete`.
    fn abandon(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch == epoch && inner.state == RegistrationState::Registering {
            inner.state = RegistrationState::Unpublished;
            inner.descriptor = None;
        }
    }

    /// Put back the record a cancelled same-name attempt was replacing.
    /// If `unregister()` ran in the meantime the record is retracted instead.
    fn restore(&self, epoch: u64, previous: &ServiceDescriptor) {
        {
            let mut inner = self.lock();
            if inner.epoch == epoch {
                inner.state = RegistrationState::Published;
                inner.descriptor = Some(previous.clone());
                tracing::debug!(name = previous.instance_name(), "kept previous announcement");
                return;
            }
        }
        self.retract_quietly(previous);
    }

    fn retract_quietly(&self, descriptor: &ServiceDescriptor) {
        if let Err(e) = self.transport.retract(descriptor) {
            tracing::warn!(name = descriptor.instance_name(), error = %e, "retract failed");
        }
    }

    /// Sleep for `duration` unless shutdown is signalled first.
    async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = time::sleep(duration) => true,
            _ = shutdown.changed() => false,
        }
    }

    async fn publish_with_retries(
        &self,
        epoch: u64,
        descriptor: &ServiceDescriptor,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let max = self.policy.max_retries.max(1);
        loop {
            if !self.is_current(epoch) {
                return Outcome::Superseded;
            }
            match self.transport.publish(descriptor) {
                Ok(()) => {
                    tracing::info!(
                        name = descriptor.instance_name(),
                        service_type = descriptor.service_type(),
                        port = descriptor.port(),
                        "service registered"
                    );
                    return Outcome::Published;
                }
                Err(e) => {
                    let attempt = self.bump_retry(epoch);
                    if attempt >= max {
                        tracing::error!(
                            name = descriptor.instance_name(),
                            attempts = attempt,
                            error = %e,
                            "registration failed, retries exhausted"
                        );
                        return Outcome::Exhausted;
                    }
                    tracing::warn!(
                        name = descriptor.instance_name(),
                        attempt,
                        max,
                        error = %e,
                        "registration attempt failed"
                    );
                    if !Self::pause(self.policy.retry_delay, shutdown).await {
                        return Outcome::Cancelled;
                    }
                }
            }
        }
    }

    /// One health-monitor tick.
    fn check_health(&self) {
        let descriptor = {
            let inner = self.lock();
            if inner.closed || inner.state != RegistrationState::Published {
                return;
            }
            match inner.descriptor.clone() {
                Some(d) => d,
                None => return,
            }
        };

        let visible = match self.transport.list_active(descriptor.service_type()) {
            Ok(names) => names.iter().any(|n| n == descriptor.instance_name()),
            Err(e) => {
                tracing::warn!(error = %e, "health check query failed");
                return;
            }
        };
        if visible {
            tracing::trace!(name = descriptor.instance_name(), "announcement visible");
            return;
        }

        tracing::warn!(name = descriptor.instance_name(), "announcement lost");
        let epoch = {
            let mut inner = self.lock();
            let unchanged = inner.state == RegistrationState::Published
                && inner.descriptor.as_ref() == Some(&descriptor);
            if inner.closed || !unchanged {
                tracing::debug!("registration changed during health check, skipping re-publish");
                return;
            }
            inner.state = RegistrationState::Registering;
            inner.epoch += 1;
            inner.epoch
        };

        let outcome = match self.transport.publish(&descriptor) {
            Ok(()) => {
                tracing::info!(name = descriptor.instance_name(), "announcement restored");
                Outcome::Published
            }
            Err(e) => {
                tracing::error!(
                    name = descriptor.instance_name(),
                    error = %e,
                    "re-publish after loss failed"
                );
                Outcome::Exhausted
            }
        };
        self.complete(epoch, &descriptor, outcome);
    }
}

/// Clears the in-flight state if an attempt is dropped mid-way.
struct AttemptGuard<'a> {
    shared: &'a Shared,
    epoch: u64,
    armed: bool,
}

impl AttemptGuard<'_> {
    fn complete(mut self, descriptor: &ServiceDescriptor, outcome: Outcome) -> bool {
        self.armed = false;
        self.shared.complete(self.epoch, descriptor, outcome)
    }

    fn restore(mut self, previous: &ServiceDescriptor) {
        self.armed = false;
        self.shared.restore(self.epoch, previous);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("registration attempt interrupted");
            self.shared.abandon(self.epoch);
        }
    }
}

async fn monitor_loop(shared: Arc<Shared>) {
    let period = shared.policy.monitor_interval.max(MIN_MONITOR_INTERVAL);
    let mut shutdown = shared.shutdown.subscribe();
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(interval_ms = period.as_millis() as u64, "registration monitor starting");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => shared.check_health(),
            _ = shutdown.changed() => break,
        }
    }

    tracing::debug!("registration monitor stopped");
}

// ── Manager ───────────────────────────────────────────────────────────────────

pub struct RegistrationManager {
    shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl RegistrationManager {
    pub fn new(transport: Arc<dyn Transport>, policy: RegistrationPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                transport,
                policy,
                inner: Mutex::new(Inner {
                    state: RegistrationState::Unpublished,
                    descriptor: None,
                    epoch: 0,
                    retry_count: 0,
                    closed: false,
                }),
                shutdown,
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Publish `descriptor`, retrying transient failures.
    ///
    /// Returns `false` straight away if another attempt is in flight or the
    /// manager is closed. Must be called from within a Tokio runtime; the
    /// health monitor is spawned on it after the first success.
    pub async fn register(&self, descriptor: ServiceDescriptor) -> bool {
        let Some(admitted) = self.shared.begin_attempt(&descriptor) else {
            return false;
        };
        let guard = AttemptGuard {
            shared: &self.shared,
            epoch: admitted.epoch,
            armed: true,
        };
        tracing::info!(
            name = descriptor.instance_name(),
            service_type = descriptor.service_type(),
            "registering service"
        );

        if let Some(previous) = &admitted.previous {
            if previous.instance_name() != descriptor.instance_name() {
                self.shared.retract_quietly(previous);
            }
        }

        let mut shutdown = self.shared.shutdown.subscribe();
        let settle = self.shared.policy.settle_delay;
        let outcome = if !settle.is_zero() && !Shared::pause(settle, &mut shutdown).await {
            Outcome::Cancelled
        } else {
            self.shared
                .publish_with_retries(admitted.epoch, &descriptor, &mut shutdown)
                .await
        };

        // Same-name record this attempt was replacing, if it is still live.
        let replaced = admitted
            .previous
            .as_ref()
            .filter(|p| p.instance_name() == descriptor.instance_name());

        if outcome == Outcome::Cancelled {
            tracing::warn!(name = descriptor.instance_name(), "registration cancelled by shutdown");
            // Shutdown alone does not withdraw a live record; unregister() does.
            if let Some(previous) = replaced {
                guard.restore(previous);
                return false;
            }
        }
        if outcome != Outcome::Published {
            if let Some(previous) = replaced {
                self.shared.retract_quietly(previous);
            }
        }

        let published = guard.complete(&descriptor, outcome);
        if published {
            self.ensure_monitor();
        }
        published
    }

    /// Retract the current announcement. No-op if nothing is registered.
    pub fn unregister(&self) {
        let (was, descriptor) = {
            let mut inner = self.shared.lock();
            let was = inner.state;
            if was == RegistrationState::Unpublished {
                tracing::debug!("unregister: nothing registered");
                return;
            }
            inner.epoch += 1;
            inner.state = RegistrationState::Unpublished;
            (was, inner.descriptor.take())
        };

        match (was, descriptor) {
            (RegistrationState::Published, Some(d)) => {
                match self.shared.transport.retract(&d) {
                    Ok(()) => tracing::info!(name = d.instance_name(), "service unregistered"),
                    Err(e) => {
                        tracing::warn!(name = d.instance_name(), error = %e, "retract failed")
                    }
                }
            }
            // An in-flight attempt retracts on its own if it lands.
            (_, d) => tracing::info!(
                name = d.as_ref().map(|d| d.instance_name()).unwrap_or_default(),
                "in-flight registration cancelled by unregister"
            ),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state() == RegistrationState::Published
    }

    pub fn state(&self) -> RegistrationState {
        self.shared.lock().state
    }

    /// The descriptor that is published or being published.
    pub fn current_descriptor(&self) -> Option<ServiceDescriptor> {
        self.shared.lock().descriptor.clone()
    }

    /// Failed publish attempts in the current or latest `register()` call.
    pub fn retry_count(&self) -> u32 {
        self.shared.lock().retry_count
    }

    pub fn policy(&self) -> &RegistrationPolicy {
        &self.shared.policy
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the health monitor. Waits up to the shutdown grace for a running
    /// tick, then aborts. Further `register()` calls return false.
    pub async fn close(&self) {
        {
            let mut inner = self.shared.lock();
            if inner.closed {
                tracing::debug!("registration manager already closed");
                return;
            }
            inner.closed = true;
        }
        self.shared.shutdown.send_replace(true);

        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            let grace = self.shared.policy.shutdown_grace;
            if time::timeout(grace, &mut handle).await.is_err() {
                tracing::warn!(grace_ms = grace.as_millis() as u64, "monitor did not stop in time, aborting");
                handle.abort();
            }
        }
        tracing::info!("registration manager closed");
    }

    fn ensure_monitor(&self) {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if self.shared.lock().closed {
            return;
        }
        *slot = Some(tokio::spawn(monitor_loop(self.shared.clone())));
    }
}

impl Drop for RegistrationManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
