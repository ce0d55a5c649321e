use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::model::IngestionCommand;

/// 读卡线程与结果线程共享的有界 FIFO 队列。
#[derive(Clone)]
pub struct IngestionQueue {
    pub tx: Sender<IngestionCommand>,
    pub rx: Receiver<IngestionCommand>,
}

impl IngestionQueue {
    /// 创建有界队列。
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

/// 跨线程共享的布尔标志（停止信号 / 进程关闭信号）。
#[derive(Clone, Debug, Default)]
pub struct Signal(Arc<AtomicBool>);

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 工作线程观察的两个退出信号，以及与 start() 串行化的退出确认。
#[derive(Clone, Debug)]
pub struct WorkerSignals {
    pub stop: Signal,
    pub shutdown: Signal,
    gate: Arc<Mutex<()>>,
    exiting: Signal,
}

impl WorkerSignals {
    pub fn new(stop: Signal, shutdown: Signal) -> Self {
        Self {
            stop,
            shutdown,
            gate: Arc::new(Mutex::new(())),
            exiting: Signal::new(),
        }
    }

    /// 收到停止请求或宿主进程正在退出。
    pub fn should_exit(&self) -> bool {
        self.stop.is_set() || self.shutdown.is_set()
    }

    /// 为新线程派生一份信号：共享停止/关闭标志与生命周期锁，独立的退出标记。
    pub fn for_worker(&self) -> Self {
        Self {
            stop: self.stop.clone(),
            shutdown: self.shutdown.clone(),
            gate: self.gate.clone(),
            exiting: Signal::new(),
        }
    }

    /// 持锁复查退出信号并标记退出；start() 持同一把锁清除停止信号。
    pub fn confirm_exit(&self) -> bool {
        let _gate = self.gate.lock();
        if self.should_exit() {
            self.exiting.set();
            true
        } else {
            false
        }
    }

    /// 因故障退出时标记，之后的 start() 会替换该线程。
    pub fn mark_exiting(&self) {
        let _gate = self.gate.lock();
        self.exiting.set();
    }

    /// 线程已决定退出（可能仍在释放资源）。
    pub fn is_exiting(&self) -> bool {
        self.exiting.is_set()
    }

    /// 生命周期锁，持有期间工作线程无法确认退出。
    pub fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }
}

/// 管线计数器。
#[derive(Debug, Default)]
pub struct PipelineStats {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// 某一时刻的计数快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl PipelineStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
