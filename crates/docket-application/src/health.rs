//! Connection health monitor.
//!
//! Polls the transport on a fixed interval and republishes connectivity to
//! subscribers only when it changes. A transport found down is reconnected from
//! the poller, with exponential backoff between failed attempts.

use async_trait::async_trait;
use docket_core::config::HealthSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the monitor needs from a transport.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Attempts a reconnect if disconnected; `true` if one succeeded.
    async fn reconnect(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthOptions {
    pub poll_interval: Duration,
    pub auto_reconnect: bool,
    /// Longest wait between two failed automatic reconnects.
    pub max_backoff: Duration,
}

impl HealthOptions {
    /// Polls every `poll_interval` and reconnects automatically, backing off
    /// up to twelve intervals.
    pub fn polling(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            auto_reconnect: true,
            max_backoff: poll_interval * 12,
        }
    }

    pub fn without_auto_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }
}

impl From<&HealthSettings> for HealthOptions {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            auto_reconnect: settings.auto_reconnect,
            max_backoff: settings.max_backoff(),
        }
    }
}

/// Edge-triggered connectivity signal with automatic and manual reconnect.
///
/// The polling task stops on [`stop`](Self::stop) or when the monitor is dropped.
pub struct HealthMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    signal: Arc<watch::Sender<bool>>,
    shutdown_token: CancellationToken,
}

impl HealthMonitor {
    /// Starts polling `probe` on the current Tokio runtime.
    pub fn start(probe: Arc<dyn ConnectivityProbe>, options: HealthOptions) -> Self {
        let (signal, _) = watch::channel(probe.is_connected());
        let monitor = Self {
            probe,
            signal: Arc::new(signal),
            shutdown_token: CancellationToken::new(),
        };

        tokio::spawn(run_poller(
            monitor.probe.clone(),
            monitor.signal.clone(),
            monitor.shutdown_token.clone(),
            options,
        ));
        info!(
            "[Health] Polling every {:?} (auto reconnect: {})",
            options.poll_interval, options.auto_reconnect
        );
        monitor
    }

    /// Last published connectivity value.
    pub fn is_connected(&self) -> bool {
        *self.signal.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Polls once, outside the interval. Returns the current value.
    pub fn poll_now(&self) -> bool {
        publish(&self.signal, self.probe.is_connected())
    }

    /// Delegates to the transport's reconnect. No-op while connected or stopped.
    pub async fn force_reconnect(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        if self.probe.is_connected() {
            debug!("[Health] Already connected; force_reconnect ignored");
            self.poll_now();
            return false;
        }
        let reconnected = self.probe.reconnect().await;
        self.poll_now();
        reconnected
    }

    /// Stops polling. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown_token.is_cancelled() {
            self.shutdown_token.cancel();
            info!("[Health] Stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        debug!("[Health] Monitor dropped");
    }
}

/// Delay before the next automatic reconnect, doubling per failure.
struct Backoff {
    base: Duration,
    max: Duration,
    delay: Duration,
    next_attempt: Option<Instant>,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            delay: base,
            next_attempt: None,
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    /// Records a failed attempt; returns the wait before the next one.
    fn failed(&mut self, now: Instant) -> Duration {
        let wait = self.delay;
        self.next_attempt = Some(now + wait);
        self.delay = (self.delay * 2).min(self.max);
        wait
    }

    fn reset(&mut self) {
        self.delay = self.base;
        self.next_attempt = None;
    }
}

async fn run_poller(
    probe: Arc<dyn ConnectivityProbe>,
    signal: Arc<watch::Sender<bool>>,
    shutdown_token: CancellationToken,
    options: HealthOptions,
) {
    let mut interval = tokio::time::interval(options.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut backoff = Backoff::new(options.poll_interval, options.max_backoff);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => {
                debug!("[Health] Poller shutting down");
                break;
            }
            _ = interval.tick() => {
                if publish(&signal, probe.is_connected()) {
                    backoff.reset();
                    continue;
                }
                if !options.auto_reconnect || !backoff.is_ready(Instant::now()) {
                    continue;
                }

                let reconnected = tokio::select! {
                    biased;
                    _ = shutdown_token.cancelled() => break,
                    reconnected = probe.reconnect() => reconnected,
                };
                if reconnected {
                    info!("[Health] Transport recovered");
                    backoff.reset();
                } else {
                    let wait = backoff.failed(Instant::now());
                    warn!("[Health] Reconnect failed; next attempt in {:?}", wait);
                }
                publish(&signal, probe.is_connected());
            }
        }
    }
}

fn publish(signal: &watch::Sender<bool>, connected: bool) -> bool {
    let changed = signal.send_if_modified(|current| {
        if *current == connected {
            return false;
        }
        *current = connected;
        true
    });
    if changed {
        info!("[Health] Connectivity changed: connected = {}", connected);
    }
    connected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProbe {
        connected: AtomicBool,
        refusing: AtomicBool,
        reconnect_calls: AtomicUsize,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl ConnectivityProbe for FakeProbe {
        fn is_connected(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.connected.load(Ordering::SeqCst)
        }

        async fn reconnect(&self) -> bool {
            self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
            if self.refusing.load(Ordering::SeqCst) {
                return false;
            }
            self.connected.store(true, Ordering::SeqCst);
            true
        }
    }

    fn probe(connected: bool) -> Arc<FakeProbe> {
        let probe = FakeProbe::default();
        probe.connected.store(connected, Ordering::SeqCst);
        Arc::new(probe)
    }

    fn every_five_secs() -> HealthOptions {
        HealthOptions::polling(Duration::from_secs(5))
    }

    #[test]
    fn test_options_from_settings() {
        let options = HealthOptions::from(&HealthSettings::default());
        assert_eq!(options.poll_interval, Duration::from_secs(5));
        assert!(options.auto_reconnect);
        assert_eq!(options.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(20));
        let now = Instant::now();
        assert!(backoff.is_ready(now));

        assert_eq!(backoff.failed(now), Duration::from_secs(5));
        assert!(!backoff.is_ready(now + Duration::from_secs(4)));
        assert!(backoff.is_ready(now + Duration::from_secs(5)));
        assert_eq!(backoff.failed(now), Duration::from_secs(10));
        assert_eq!(backoff.failed(now), Duration::from_secs(20));
        assert_eq!(backoff.failed(now), Duration::from_secs(20));

        backoff.reset();
        assert!(backoff.is_ready(now));
        assert_eq!(backoff.failed(now), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flips_within_one_interval() {
        let fake = probe(true);
        fake.refusing.store(true, Ordering::SeqCst);
        let monitor = HealthMonitor::start(fake.clone(), every_five_secs());
        let mut rx = monitor.subscribe();
        assert!(monitor.is_connected());

        fake.connected.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(6), rx.changed())
            .await
            .expect("signal within one interval")
            .unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edge_triggered() {
        let fake = probe(true);
        let monitor = HealthMonitor::start(fake.clone(), every_five_secs());
        let mut rx = monitor.subscribe();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!rx.has_changed().unwrap());
        assert!(fake.polls.load(Ordering::SeqCst) >= 6);
        assert_eq!(fake.reconnect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_automatically_after_drop() {
        let fake = probe(true);
        let monitor = HealthMonitor::start(fake.clone(), every_five_secs());
        tokio::time::sleep(Duration::from_secs(1)).await;

        fake.connected.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fake.reconnect_calls.load(Ordering::SeqCst), 1);
        assert!(monitor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnects_back_off() {
        let fake = probe(false);
        fake.refusing.store(true, Ordering::SeqCst);
        let options = HealthOptions {
            max_backoff: Duration::from_secs(20),
            ..every_five_secs()
        };
        let monitor = HealthMonitor::start(fake.clone(), options);

        // Attempts at 0s, 5s, 15s, 35s and 55s; twelve ticks in the same span
        tokio::time::sleep(Duration::from_secs(57)).await;
        let attempts = fake.reconnect_calls.load(Ordering::SeqCst);
        assert!((4..=6).contains(&attempts), "attempts = {attempts}");
        assert!(!monitor.is_connected());

        fake.refusing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(monitor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_can_be_disabled() {
        let fake = probe(false);
        let monitor =
            HealthMonitor::start(fake.clone(), every_five_secs().without_auto_reconnect());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.reconnect_calls.load(Ordering::SeqCst), 0);
        assert!(!monitor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_is_noop_when_connected() {
        let fake = probe(true);
        let monitor = HealthMonitor::start(fake.clone(), every_five_secs());

        assert!(!monitor.force_reconnect().await);
        assert_eq!(fake.reconnect_calls.load(Ordering::SeqCst), 0);

        fake.connected.store(false, Ordering::SeqCst);
        assert!(monitor.force_reconnect().await);
        assert_eq!(fake.reconnect_calls.load(Ordering::SeqCst), 1);
        assert!(monitor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_poller() {
        let fake = probe(true);
        let monitor = HealthMonitor::start(fake.clone(), every_five_secs());
        tokio::time::sleep(Duration::from_secs(1)).await;

        monitor.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let polls = fake.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.polls.load(Ordering::SeqCst), polls);
        assert!(!monitor.force_reconnect().await);
        // Only the monitor's own reference remains
        assert_eq!(Arc::strong_count(&fake), 2);
    }
}
