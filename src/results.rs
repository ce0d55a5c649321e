use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::error::{ConvertError, ResultError};
use crate::model::{CommandKind, IngestionCommand, IngestionResult, PipelineConfig, ResultKind};
use crate::pipeline::{PipelineStats, WorkerSignals};
use crate::settings::RaceModel;

/// 卡号保留的十进制位数上限（10^12）。
pub const CARD_NUMBER_MODULUS: u64 = 1_000_000_000_000;

pub type ResultCallback = Box<dyn Fn(IngestionResult) + Send + Sync>;

/// 成绩回调槽，只接受第一次注册。
#[derive(Clone, Default)]
pub struct CallbackSlot(Arc<OnceLock<ResultCallback>>);

impl CallbackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调，已注册时返回 false。
    pub fn register(&self, callback: ResultCallback) -> bool {
        self.0.set(callback).is_ok()
    }

    /// 投递成绩，未注册回调时返回 false。
    pub fn deliver(&self, result: IngestionResult) -> bool {
        match self.0.get() {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }
}

/// EPC 十六进制串 -> 卡号：去空白、按 16 进制折叠并对 10^12 取模。
pub fn card_number_from_epc(epc: &str) -> Result<u64, ConvertError> {
    let mut value: u64 = 0;
    let mut digits = 0usize;
    for c in epc.chars().filter(|c| !c.is_whitespace()) {
        let digit = c.to_digit(16).ok_or(ConvertError::InvalidHex(c))? as u64;
        value = (value * 16 + digit) % CARD_NUMBER_MODULUS;
        digits += 1;
    }
    if digits == 0 {
        return Err(ConvertError::EmptyTagId);
    }
    Ok(value)
}

/// 结果线程：消费队列并生成成绩。
pub struct ResultWorker {
    queue: Receiver<IngestionCommand>,
    model: Arc<dyn RaceModel>,
    callback: CallbackSlot,
    signals: WorkerSignals,
    stats: Arc<PipelineStats>,
    config: PipelineConfig,
}

impl ResultWorker {
    pub fn new(
        queue: Receiver<IngestionCommand>,
        model: Arc<dyn RaceModel>,
        callback: CallbackSlot,
        signals: WorkerSignals,
        stats: Arc<PipelineStats>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue,
            model,
            callback,
            signals,
            stats,
            config,
        }
    }

    /// 主循环：队列空闲超时才检查退出信号。
    pub fn run(self) {
        thread::sleep(self.config.startup_delay());
        loop {
            match self.queue.recv_timeout(self.config.dequeue_timeout()) {
                Ok(command) => self.process(command),
                Err(RecvTimeoutError::Timeout) => {
                    if self.signals.should_exit() && self.signals.confirm_exit() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.signals.mark_exiting();
                    break;
                }
            }
        }
        log::info!("Stop RFID result worker");
    }

    /// 单条命令的任何失败（含回调 panic）只记录，不终止线程。
    fn process(&self, command: IngestionCommand) {
        let tag_id = command.event.tag_id.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle(command)))
            .unwrap_or_else(|payload| Err(ResultError::Panicked(panic_message(payload.as_ref()))));
        match outcome {
            Ok(true) => self.stats.record_delivered(),
            Ok(false) => log::warn!("No result callback registered, result dropped"),
            Err(err) => {
                self.stats.record_failed();
                log::error!("Cannot handle tag {:?}: {}", tag_id, err);
            }
        }
    }

    fn handle(&self, command: IngestionCommand) -> Result<bool, ResultError> {
        match command.kind {
            CommandKind::CardData => {
                let result = self.to_result(&command)?;
                log::debug!("RFID result: card {}", result.card_number);
                Ok(self.callback.deliver(result))
            }
        }
    }

    fn to_result(&self, command: &IngestionCommand) -> Result<IngestionResult, ResultError> {
        let card_number = card_number_from_epc(&command.event.tag_id)?;
        let mut result = self.model.create_result(ResultKind::RfidImpinj)?;
        result.card_number = card_number;
        result.finish_time = Some(command.captured_at);
        Ok(result)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// 启动结果线程。
pub fn spawn_result_worker(worker: ResultWorker) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("rfid-results".to_string())
        .spawn(move || worker.run())
}
