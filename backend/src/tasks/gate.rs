//! GPU admission gate.
//!
//! A counting semaphore whose counter and waiter queue are owned by a single
//! coordinator thread. Worker threads never touch the counter directly: they
//! send `Acquire`/`Release` commands over a channel and block on a oneshot
//! reply, so grants and wake-ups are serialized in one place.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::RunnerError;

/// Commands handled by the coordinator loop.
#[derive(Debug)]
enum GateCommand {
    Acquire { reply_tx: oneshot::Sender<()> },
    Release,
}

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub capacity: usize,
    pub in_use: usize,
    pub waiting: usize,
}

/// Counters published by the coordinator after every command.
#[derive(Debug, Default)]
struct Published {
    in_use: AtomicUsize,
    waiting: AtomicUsize,
}

/// Handle to the GPU admission gate. Cheap to clone; all clones share one
/// coordinator.
#[derive(Debug, Clone)]
pub struct GpuGate {
    tx: mpsc::UnboundedSender<GateCommand>,
    capacity: usize,
    published: Arc<Published>,
}

impl GpuGate {
    /// Start the coordinator thread for a gate admitting `capacity` jobs at once.
    pub fn start(capacity: usize) -> Result<Self, RunnerError> {
        if capacity == 0 {
            return Err(RunnerError::InvalidCapacity {
                what: "GPU slot count",
                value: capacity,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let published = Arc::new(Published::default());

        let coordinator = Coordinator {
            capacity,
            in_use: 0,
            waiters: VecDeque::new(),
            published: Arc::clone(&published),
        };
        std::thread::Builder::new()
            .name("gpu-gate".to_string())
            .spawn(move || coordinator.run(rx))
            .map_err(|e| RunnerError::Spawn("gpu-gate".to_string(), e.to_string()))?;

        tracing::info!("GPU gate started with {} slot(s)", capacity);

        Ok(Self {
            tx,
            capacity,
            published,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block the calling thread until a slot is free.
    ///
    /// Must not be called from inside an async runtime. Fails immediately with
    /// [`RunnerError::GateUnavailable`] if the coordinator is gone.
    pub fn acquire(&self) -> Result<GpuPermit, RunnerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(GateCommand::Acquire { reply_tx })
            .map_err(|_| RunnerError::GateUnavailable)?;
        reply_rx
            .blocking_recv()
            .map_err(|_| RunnerError::GateUnavailable)?;

        Ok(GpuPermit {
            tx: self.tx.clone(),
        })
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            in_use: self.published.in_use.load(Ordering::SeqCst),
            waiting: self.published.waiting.load(Ordering::SeqCst),
        }
    }

    /// A gate whose coordinator has already stopped.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self {
            tx,
            capacity: 1,
            published: Arc::new(Published::default()),
        }
    }
}

/// RAII guard for one GPU slot. Dropping it hands the slot back, including
/// when the holder is unwinding from a panic.
#[derive(Debug)]
pub struct GpuPermit {
    tx: mpsc::UnboundedSender<GateCommand>,
}

impl Drop for GpuPermit {
    fn drop(&mut self) {
        // Coordinator gone means nothing is left to hand the slot to.
        let _ = self.tx.send(GateCommand::Release);
    }
}

/// State owned exclusively by the coordinator thread.
struct Coordinator {
    capacity: usize,
    in_use: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
    published: Arc<Published>,
}

impl Coordinator {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<GateCommand>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                GateCommand::Acquire { reply_tx } => {
                    if self.in_use < self.capacity {
                        self.grant(reply_tx);
                    } else {
                        self.waiters.push_back(reply_tx);
                    }
                }
                GateCommand::Release => {
                    self.in_use = self.in_use.saturating_sub(1);
                    self.wake_waiters();
                }
            }
            self.publish();
        }
        tracing::debug!("GPU gate coordinator stopped");
    }

    fn grant(&mut self, reply_tx: oneshot::Sender<()>) -> bool {
        // A closed reply channel means the waiter went away; the slot stays free.
        if reply_tx.send(()).is_ok() {
            self.in_use += 1;
            true
        } else {
            false
        }
    }

    /// Hand free slots to waiters in arrival order.
    fn wake_waiters(&mut self) {
        while self.in_use < self.capacity {
            let Some(reply_tx) = self.waiters.pop_front() else {
                break;
            };
            self.grant(reply_tx);
        }
    }

    fn publish(&mut self) {
        self.waiters.retain(|w| !w.is_closed());
        self.published.in_use.store(self.in_use, Ordering::SeqCst);
        self.published
            .waiting
            .store(self.waiters.len(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met within 5s");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = GpuGate::start(0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_permits_up_to_capacity() {
        let gate = GpuGate::start(2).unwrap();
        let p1 = gate.acquire().unwrap();
        let _p2 = gate.acquire().unwrap();
        wait_until(|| gate.stats().in_use == 2);

        drop(p1);
        wait_until(|| gate.stats().in_use == 1);
        assert_eq!(gate.stats().capacity, 2);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let gate = GpuGate::start(1).unwrap();
        let held = gate.acquire().unwrap();

        let (acquired_tx, acquired_rx) = std::sync::mpsc::channel();
        let waiter_gate = gate.clone();
        let waiter = std::thread::spawn(move || {
            let permit = waiter_gate.acquire().unwrap();
            acquired_tx.send(()).unwrap();
            drop(permit);
        });

        wait_until(|| gate.stats().waiting == 1);
        assert!(acquired_rx
            .recv_timeout(Duration::from_millis(50))
            .is_err());

        drop(held);
        acquired_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        wait_until(|| gate.stats() == GateStats { capacity: 1, in_use: 0, waiting: 0 });
    }

    #[test]
    fn test_waiters_admitted_in_arrival_order() {
        let gate = GpuGate::start(1).unwrap();
        let held = gate.acquire().unwrap();

        let (order_tx, order_rx) = std::sync::mpsc::channel();
        let mut waiters = Vec::new();
        for i in 0..3 {
            let gate_clone = gate.clone();
            let order_tx = order_tx.clone();
            waiters.push(std::thread::spawn(move || {
                let _permit = gate_clone.acquire().unwrap();
                order_tx.send(i).unwrap();
            }));
            wait_until(|| gate.stats().waiting == i + 1);
        }

        drop(held);
        let order: Vec<_> = (0..3)
            .map(|_| order_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        for w in waiters {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_permit_released_when_holder_panics() {
        let gate = GpuGate::start(1).unwrap();
        let panicking_gate = gate.clone();
        let result = std::thread::spawn(move || {
            let _permit = panicking_gate.acquire().unwrap();
            panic!("render crashed");
        })
        .join();
        assert!(result.is_err());

        let _permit = gate.acquire().unwrap();
    }
}
