use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source of "run now" signals for a periodic job.
#[async_trait]
pub trait Ticker: Send {
    /// Resolves at the next tick. `false` means no more ticks will come.
    async fn tick(&mut self) -> bool;
}

pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// First tick fires immediately.
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticks only when its [`ManualTrigger`] fires.
pub struct ManualTicker {
    rx: mpsc::Receiver<()>,
}

#[derive(Clone)]
pub struct ManualTrigger {
    tx: mpsc::Sender<()>,
}

impl ManualTicker {
    pub fn new() -> (Self, ManualTrigger) {
        let (tx, rx) = mpsc::channel(16);
        (Self { rx }, ManualTrigger { tx })
    }
}

impl ManualTrigger {
    /// Returns false once the ticker is gone.
    pub async fn fire(&self) -> bool {
        self.tx.send(()).await.is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

/// Runs `job` on every tick until `cancel` fires or the ticker ends. A job
/// already running when cancellation arrives is allowed to finish.
pub fn spawn_periodic<T, F, Fut>(
    name: &'static str,
    mut ticker: T,
    cancel: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    T: Ticker + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        info!("⏱️ Periodic task '{}' started", name);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                alive = ticker.tick() => {
                    if !alive {
                        debug!("Ticker for '{}' closed", name);
                        break;
                    }
                    job().await;
                }
            }
        }
        info!("🛑 Periodic task '{}' stopped", name);
    })
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_manual_ticker_drives_job() {
        let (ticker, trigger) = ManualTicker::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = runs.clone();
        let handle = spawn_periodic("test", ticker, cancel.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(trigger.fire().await);
        assert!(trigger.fire().await);
        drop(trigger);
        handle.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let (ticker, trigger) = ManualTicker::new();
        let cancel = CancellationToken::new();
        let handle = spawn_periodic("test", ticker, cancel.clone(), || async {});

        cancel.cancel();
        handle.await.unwrap();
        assert!(!trigger.fire().await);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now() - start, chrono::Duration::minutes(5));
    }
}
