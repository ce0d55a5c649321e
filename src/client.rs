use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::driver::ReaderConnector;
use crate::model::{IngestionResult, PipelineConfig};
use crate::pipeline::{IngestionQueue, PipelineStats, Signal, StatsSnapshot, WorkerSignals};
use crate::reader::{spawn_reader, ReaderContext};
use crate::results::{spawn_result_worker, CallbackSlot, ResultWorker};
use crate::settings::{get_setting, RaceModel, SYSTEM_PORT_KEY};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 一个工作线程及其私有的退出标记。
struct WorkerSlot {
    handle: JoinHandle<()>,
    signals: WorkerSignals,
}

impl WorkerSlot {
    /// 线程仍在运行且尚未确认退出。
    fn running(&self) -> bool {
        !self.handle.is_finished() && !self.signals.is_exiting()
    }

    /// 已确认退出的线程不再等待生命周期锁，可以安全 join。
    fn retire(self, name: &str) {
        if !self.handle.is_finished() {
            log::debug!("Waiting for exiting RFID {} thread", name);
        }
        if self.handle.join().is_err() {
            log::error!("RFID {} thread panicked", name);
        }
    }
}

#[derive(Default)]
struct Workers {
    reader: Option<WorkerSlot>,
    results: Option<WorkerSlot>,
    port: Option<String>,
}

fn running(slot: &Option<WorkerSlot>) -> bool {
    slot.as_ref().map_or(false, WorkerSlot::running)
}

fn finished(slot: &Option<WorkerSlot>) -> bool {
    slot.as_ref().map_or(true, |s| s.handle.is_finished())
}

/// RFID 采集生命周期：持有共享队列、停止信号与两个工作线程。
pub struct IngestionClient {
    connector: Arc<dyn ReaderConnector>,
    model: Arc<dyn RaceModel>,
    config: PipelineConfig,
    queue: IngestionQueue,
    signals: WorkerSignals,
    callback: CallbackSlot,
    stats: Arc<PipelineStats>,
    workers: Mutex<Workers>,
}

impl IngestionClient {
    /// `shutdown` 由应用持有，进程退出时置位。
    pub fn new(
        connector: Arc<dyn ReaderConnector>,
        model: Arc<dyn RaceModel>,
        config: PipelineConfig,
        shutdown: Signal,
    ) -> Self {
        let queue = IngestionQueue::new(config.queue_capacity());
        Self {
            connector,
            model,
            config,
            queue,
            signals: WorkerSignals::new(Signal::new(), shutdown),
            callback: CallbackSlot::new(),
            stats: Arc::new(PipelineStats::default()),
            workers: Mutex::new(Workers::default()),
        }
    }

    /// 注册成绩回调，只有第一次注册生效。
    pub fn register_callback<F>(&self, callback: F) -> &Self
    where
        F: Fn(IngestionResult) + Send + Sync + 'static,
    {
        if !self.callback.register(Box::new(callback)) {
            log::debug!("Result callback already registered, ignoring");
        }
        self
    }

    /// 确保两个工作线程都在运行；已结束或已确认退出的线程会被替换。
    pub fn start(&self) {
        let port = get_setting::<Option<String>>(self.model.as_ref(), SYSTEM_PORT_KEY, None);
        let mut workers = self.workers.lock();
        workers.port = port;
        // 持锁期间工作线程无法确认退出：要么看到清除后的停止信号继续运行，要么已标记退出并被替换
        let _gate = self.signals.lock_gate();
        self.signals.stop.clear();
        self.ensure_reader(&mut workers);
        self.ensure_results(&mut workers);
    }

    /// 置位停止信号后立即返回，线程在下一个轮询周期退出。
    pub fn stop(&self) {
        self.signals.stop.set();
    }

    pub fn is_alive(&self) -> bool {
        let workers = self.workers.lock();
        running(&workers.reader) && running(&workers.results)
    }

    pub fn toggle(&self) {
        if self.is_alive() {
            self.stop();
        } else {
            self.start();
        }
    }

    /// 等待两个线程结束，超时返回 false。
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let workers = self.workers.lock();
                if finished(&workers.reader) && finished(&workers.results) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// 最近一次 start() 解析到的串口。
    pub fn port(&self) -> Option<String> {
        self.workers.lock().port.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn ensure_reader(&self, workers: &mut Workers) {
        if running(&workers.reader) {
            return;
        }
        if let Some(old) = workers.reader.take() {
            log::debug!("Replacing finished RFID reader thread");
            old.retire("reader");
        }
        let signals = self.signals.for_worker();
        let ctx = ReaderContext {
            connector: self.connector.clone(),
            port: workers.port.clone(),
            config: self.config.clone(),
            queue: self.queue.tx.clone(),
            signals: signals.clone(),
            stats: self.stats.clone(),
        };
        match spawn_reader(ctx) {
            Ok(handle) => workers.reader = Some(WorkerSlot { handle, signals }),
            Err(err) => log::error!("Cannot spawn RFID reader thread: {}", err),
        }
    }

    fn ensure_results(&self, workers: &mut Workers) {
        if running(&workers.results) {
            return;
        }
        if let Some(old) = workers.results.take() {
            log::debug!("Replacing finished RFID result thread");
            old.retire("result");
        }
        let signals = self.signals.for_worker();
        let worker = ResultWorker::new(
            self.queue.rx.clone(),
            self.model.clone(),
            self.callback.clone(),
            signals.clone(),
            self.stats.clone(),
            self.config.clone(),
        );
        match spawn_result_worker(worker) {
            Ok(handle) => workers.results = Some(WorkerSlot { handle, signals }),
            Err(err) => log::error!("Cannot spawn RFID result thread: {}", err),
        }
    }
}

impl Drop for IngestionClient {
    fn drop(&mut self) {
        self.stop();
    }
}
