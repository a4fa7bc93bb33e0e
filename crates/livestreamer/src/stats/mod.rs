//! Periodic listener stats.
//!
//! [`StatsScheduler`] runs only while the registry has clients. Every tick it
//! samples the client count, raises the peak and pushes a `stats` envelope to
//! each client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use shared::{ws_types, StatsSnapshot};

use crate::message::envelope;
use crate::registry::{ClientRegistry, RegistryEvent};

/// Background work gated by registry membership.
///
/// The registry calls `start` when it goes from empty to non-empty and `stop`
/// when it becomes empty again. Both must be idempotent. No registry lock is
/// held during either call, so implementations may call back into the registry.
pub trait Scheduler: Send + Sync {
    fn start(&self, registry: Weak<ClientRegistry>);
    fn stop(&self);
}

/// What happens to the peak count when the registry empties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakPolicy {
    /// Peak restarts from zero for every non-empty period
    ResetWhenEmpty,
    /// Peak is kept for the lifetime of the process
    Persist,
}

impl PeakPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reset" | "reset_when_empty" => Some(Self::ResetWhenEmpty),
            "persist" => Some(Self::Persist),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub interval: Duration,
    pub peak_policy: PeakPolicy,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            peak_policy: PeakPolicy::ResetWhenEmpty,
        }
    }
}

struct RunningTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Tokio-task backed [`Scheduler`] publishing [`StatsSnapshot`]s.
pub struct StatsScheduler {
    config: StatsConfig,
    running: Mutex<Option<RunningTask>>,
    /// Peak counter of the current run. Replaced on reset so a stopping run
    /// cannot write into the next one.
    peak: Mutex<Arc<AtomicUsize>>,
}

impl StatsScheduler {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            peak: Mutex::new(Arc::new(AtomicUsize::new(0))),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn peak(&self) -> usize {
        self.peak_counter().load(Ordering::Acquire)
    }

    fn peak_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Scheduler for StatsScheduler {
    fn start(&self, registry: Weak<ClientRegistry>) {
        let mut running = self.lock();
        if running
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
        {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime, stats scheduler not started");
            return;
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = runtime.spawn(run(
            registry,
            self.config.interval,
            self.peak_counter(),
            stop_rx,
        ));
        *running = Some(RunningTask { stop_tx, handle });
        tracing::debug!(interval_ms = self.config.interval.as_millis() as u64, "Stats scheduler started");
    }

    fn stop(&self) {
        let Some(task) = self.lock().take() else {
            return;
        };
        // The task checks this before every tick, so a tick in progress completes.
        let _ = task.stop_tx.send(());
        if self.config.peak_policy == PeakPolicy::ResetWhenEmpty {
            *self.peak.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                Arc::new(AtomicUsize::new(0));
        }
        tracing::debug!("Stats scheduler stopped");
    }
}

async fn run(
    registry: Weak<ClientRegistry>,
    interval: Duration,
    peak: Arc<AtomicUsize>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let Some((sub_id, mut events)) = registry.upgrade().map(|r| r.subscribe()) else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {}
            event = events.recv() => match event {
                Some(RegistryEvent::ClientCount(_)) => {}
                Some(_) => continue,
                None => break,
            },
        }
        let Some(registry) = registry.upgrade() else {
            break;
        };
        publish_snapshot(&registry, &peak);
    }

    if let Some(registry) = registry.upgrade() {
        registry.unsubscribe(sub_id);
    }
}

fn publish_snapshot(registry: &ClientRegistry, peak: &AtomicUsize) -> StatsSnapshot {
    let count = registry.client_count();
    let peak = peak.fetch_max(count, Ordering::AcqRel).max(count);
    let snapshot = StatsSnapshot { count, peak };
    let delivered = registry.broadcast(&envelope(ws_types::STATS, &snapshot));
    tracing::trace!(count, peak, delivered, "Stats published");
    snapshot
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use shared::WsEnvelope;

    use super::*;
    use crate::registry::{Client, ClientSocket};

    const INTERVAL: Duration = Duration::from_secs(5);

    fn setup(policy: PeakPolicy) -> (Arc<ClientRegistry>, Arc<StatsScheduler>) {
        let scheduler = Arc::new(StatsScheduler::new(StatsConfig {
            interval: INTERVAL,
            peak_policy: policy,
        }));
        let registry = ClientRegistry::new(scheduler.clone());
        (registry, scheduler)
    }

    fn connect(registry: &ClientRegistry, id: i64) -> (Uuid, mpsc::Receiver<WsEnvelope>) {
        let (socket, rx) = ClientSocket::channel(64);
        let uuid = Uuid::new_v4();
        registry
            .add_client(Client {
                id,
                uuid,
                username: format!("user{}", id),
                socket,
            })
            .unwrap();
        (uuid, rx)
    }

    async fn next_stats(rx: &mut mpsc::Receiver<WsEnvelope>) -> StatsSnapshot {
        let env = rx.recv().await.unwrap();
        assert_eq!(env.r#type, ws_types::STATS);
        serde_json::from_value(env.payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn first_client_receives_snapshot_immediately() {
        let (registry, scheduler) = setup(PeakPolicy::ResetWhenEmpty);
        let (_, mut rx) = connect(&registry, 1);

        assert!(scheduler.is_running());
        assert_eq!(next_stats(&mut rx).await, StatsSnapshot { count: 1, peak: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_repeat_every_interval() {
        let (registry, _scheduler) = setup(PeakPolicy::ResetWhenEmpty);
        let (_, mut rx) = connect(&registry, 1);
        next_stats(&mut rx).await;

        let before = tokio::time::Instant::now();
        next_stats(&mut rx).await;
        assert!(before.elapsed() >= INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_reentrant() {
        let (registry, scheduler) = setup(PeakPolicy::ResetWhenEmpty);
        let (_, mut rx) = connect(&registry, 1);
        next_stats(&mut rx).await;

        scheduler.start(Arc::downgrade(&registry));
        scheduler.start(Arc::downgrade(&registry));

        tokio::time::sleep(INTERVAL / 2).await;
        assert!(rx.try_recv().is_err(), "a second timer must not be started");
        next_stats(&mut rx).await;
        tokio::time::sleep(INTERVAL / 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn count_change_publishes_immediately() {
        let (registry, _scheduler) = setup(PeakPolicy::ResetWhenEmpty);
        let (_, mut rx1) = connect(&registry, 1);
        next_stats(&mut rx1).await;

        let (_, _rx2) = connect(&registry, 2);

        let before = tokio::time::Instant::now();
        assert_eq!(next_stats(&mut rx1).await, StatsSnapshot { count: 2, peak: 2 });
        assert!(before.elapsed() < INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let (registry, scheduler) = setup(PeakPolicy::Persist);
        let (_, mut rx) = connect(&registry, 1);
        next_stats(&mut rx).await;

        scheduler.stop();
        scheduler.stop();
        tokio::time::sleep(INTERVAL * 3).await;

        assert!(rx.try_recv().is_err());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn peak_resets_when_registry_empties() {
        let (registry, scheduler) = setup(PeakPolicy::ResetWhenEmpty);
        let (a, mut rx_a) = connect(&registry, 1);
        let (b, _rx_b) = connect(&registry, 2);
        while next_stats(&mut rx_a).await.count < 2 {}
        assert_eq!(scheduler.peak(), 2);

        registry.delete_client(&a);
        registry.delete_client(&b);
        assert_eq!(scheduler.peak(), 0);

        let (_, mut rx_c) = connect(&registry, 3);
        assert_eq!(next_stats(&mut rx_c).await, StatsSnapshot { count: 1, peak: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn late_tick_from_stopped_run_keeps_reset_peak() {
        let (registry, scheduler) = setup(PeakPolicy::ResetWhenEmpty);
        let (a, mut rx_a) = connect(&registry, 1);
        next_stats(&mut rx_a).await;
        let stopping_run = scheduler.peak_counter();

        registry.delete_client(&a);
        stopping_run.fetch_max(5, Ordering::AcqRel);
        assert_eq!(scheduler.peak(), 0);

        let (_, mut rx_b) = connect(&registry, 2);
        assert_eq!(next_stats(&mut rx_b).await, StatsSnapshot { count: 1, peak: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn peak_persists_across_empty_periods() {
        let (registry, scheduler) = setup(PeakPolicy::Persist);
        let (a, mut rx_a) = connect(&registry, 1);
        let (b, _rx_b) = connect(&registry, 2);
        while next_stats(&mut rx_a).await.count < 2 {}

        registry.delete_client(&a);
        registry.delete_client(&b);
        assert!(!scheduler.is_running());

        let (_, mut rx_c) = connect(&registry, 3);
        assert_eq!(next_stats(&mut rx_c).await, StatsSnapshot { count: 1, peak: 2 });
    }

    #[test]
    fn start_without_runtime_is_ignored() {
        let (registry, scheduler) = setup(PeakPolicy::Persist);
        scheduler.start(Arc::downgrade(&registry));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn peak_policy_parse() {
        assert_eq!(PeakPolicy::parse("reset"), Some(PeakPolicy::ResetWhenEmpty));
        assert_eq!(PeakPolicy::parse("persist"), Some(PeakPolicy::Persist));
        assert_eq!(PeakPolicy::parse("sometimes"), None);
    }
}
