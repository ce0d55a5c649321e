use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Local;
use crossbeam::channel::{SendTimeoutError, Sender};

use crate::debounce::Deduplicator;
use crate::driver::{Antenna, InventoryPlan, ReaderConnector, ReaderDriver};
use crate::error::{DriverError, ReaderError};
use crate::model::{AntennaPolicy, IngestionCommand, PipelineConfig, TagEvent, TagRead};
use crate::pipeline::{PipelineStats, WorkerSignals};

/// 天线轮换状态机。
#[derive(Clone, Debug)]
pub struct AntennaRotation {
    policy: AntennaPolicy,
    antennas: Vec<Antenna>,
    index: usize,
}

impl AntennaRotation {
    /// 初始工作天线为最后一根，第一次切换回到天线 1。
    pub fn new(policy: AntennaPolicy, count: u8) -> Self {
        let antennas = Antenna::first(count);
        let index = antennas.len() - 1;
        Self {
            policy,
            antennas,
            index,
        }
    }

    pub fn current(&self) -> Antenna {
        self.antennas[self.index]
    }

    pub fn antennas(&self) -> &[Antenna] {
        &self.antennas
    }

    /// 空闲（轮询超时）时下发的盘存指令。
    pub fn idle_plan(&self, repeat: u8) -> InventoryPlan {
        match self.policy {
            AntennaPolicy::FastSwitch => InventoryPlan::FastSwitch {
                antennas: self.antennas.clone(),
                repeat,
            },
            AntennaPolicy::Stepping => InventoryPlan::RealTime { repeat },
        }
    }

    /// 收到盘存结束标记：步进模式切到下一根天线。
    pub fn on_read_complete(&mut self) -> Option<Antenna> {
        match self.policy {
            AntennaPolicy::FastSwitch => None,
            AntennaPolicy::Stepping => {
                self.index = (self.index + 1) % self.antennas.len();
                Some(self.current())
            }
        }
    }
}

/// 读卡线程启动所需的上下文。
pub struct ReaderContext {
    pub connector: Arc<dyn ReaderConnector>,
    pub port: Option<String>,
    pub config: PipelineConfig,
    pub queue: Sender<IngestionCommand>,
    pub signals: WorkerSignals,
    pub stats: Arc<PipelineStats>,
}

/// 读卡线程：独占驱动，轮询标签、去重并入队。
pub struct ReaderWorker {
    driver: Box<dyn ReaderDriver>,
    rotation: AntennaRotation,
    dedup: Deduplicator,
    queue: Sender<IngestionCommand>,
    signals: WorkerSignals,
    stats: Arc<PipelineStats>,
    config: PipelineConfig,
}

impl ReaderWorker {
    /// 连接读写器并完成初始化；任一步失败则不进入主循环。
    pub fn connect(ctx: ReaderContext) -> Result<Self, ReaderError> {
        let port = ctx.port.as_deref().ok_or(ReaderError::NoPort)?;
        let driver = ctx
            .connector
            .connect(port, ctx.config.reader_address)
            .map_err(ReaderError::Setup)?;
        log::info!("Reader connected on {}", port);
        Self::with_driver(driver, ctx)
    }

    /// 用已连接的驱动完成初始化（上电功率、工作天线）。
    pub fn with_driver(
        mut driver: Box<dyn ReaderDriver>,
        ctx: ReaderContext,
    ) -> Result<Self, ReaderError> {
        let rotation = AntennaRotation::new(ctx.config.antenna_policy, ctx.config.antenna_count);
        log::debug!(
            "Antenna policy {:?} over {:?}",
            ctx.config.antenna_policy,
            rotation.antennas()
        );
        if let Err(err) = setup_driver(driver.as_mut(), &ctx.config, rotation.current()) {
            driver.close();
            return Err(ReaderError::Setup(err));
        }
        Ok(Self {
            driver,
            rotation,
            dedup: Deduplicator::new(ctx.config.dedup_window()),
            queue: ctx.queue,
            signals: ctx.signals,
            stats: ctx.stats,
            config: ctx.config,
        })
    }

    /// 主循环，直到停止信号或链路故障。
    pub fn run(mut self) -> Result<(), ReaderError> {
        loop {
            if self.signals.should_exit() && self.signals.confirm_exit() {
                self.driver.close();
                log::info!("Stop RFID reader");
                return Ok(());
            }

            let read = match self.driver.poll_tag(self.config.poll_interval()) {
                Ok(Some(read)) => read,
                Ok(None) => {
                    self.on_idle()?;
                    continue;
                }
                Err(err) if err.is_fatal() => {
                    log::error!("Reader read failed: {}", err);
                    return Err(ReaderError::Transport(err));
                }
                Err(err) => {
                    log::error!("Reader read error: {}", err);
                    continue;
                }
            };

            self.handle_read(read, Instant::now())?;
        }
    }

    /// 轮询超时：按天线策略重新下发盘存。
    fn on_idle(&mut self) -> Result<(), ReaderError> {
        let plan = self.rotation.idle_plan(self.config.inventory_repeat);
        check_command(self.driver.start_inventory(&plan))
    }

    /// 处理一条读数：天线切换、去重、入队。
    pub fn handle_read(&mut self, read: TagRead, now: Instant) -> Result<(), ReaderError> {
        let marker_only = read.is_marker_only();
        let event = TagEvent::from_read(read, now);
        if event.read_complete {
            if let Some(next) = self.rotation.on_read_complete() {
                log::debug!("Switch work antenna to {:?}", next);
                check_command(self.driver.set_work_antenna(next))?;
            }
        }
        if marker_only {
            return Ok(());
        }

        let key = normalize_tag_id(&event.tag_id);
        if !self.dedup.accept(&key, now) {
            self.stats.record_duplicate();
            log::debug!("Duplicate RFID tag {} suppressed", key);
            return Ok(());
        }

        self.stats.record_accepted();
        log::debug!("RFID tag data: {}", event.tag_id);
        let command = IngestionCommand::card_data(event, Local::now());
        match self.queue.send_timeout(command, self.config.enqueue_timeout()) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(dropped)) => {
                self.stats.record_dropped();
                log::warn!("Ingestion queue full, dropping tag {}", dropped.event.tag_id);
                Ok(())
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(ReaderError::QueueClosed),
        }
    }
}

/// 链路故障向上传播，其余驱动错误记录后继续。
fn check_command(result: Result<(), DriverError>) -> Result<(), ReaderError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => {
            log::error!("Reader command failed: {}", err);
            Err(ReaderError::Transport(err))
        }
        Err(err) => {
            log::error!("Reader command error: {}", err);
            Ok(())
        }
    }
}

fn setup_driver(
    driver: &mut dyn ReaderDriver,
    config: &PipelineConfig,
    work_antenna: Antenna,
) -> Result<(), DriverError> {
    driver.start_worker()?;
    driver.set_power(config.power_dbm)?;
    match driver.diagnostics() {
        Ok(info) if !info.is_empty() => log::debug!("Reader diagnostics: {}", info),
        Ok(_) => {}
        Err(err) => log::warn!("Reader diagnostics unavailable: {}", err),
    }
    driver.set_work_antenna(work_antenna)
}

/// 去重键：去掉空白并统一大写。
pub fn normalize_tag_id(epc: &str) -> String {
    epc.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// 启动读卡线程。
pub fn spawn_reader(ctx: ReaderContext) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("rfid-reader".to_string())
        .spawn(move || {
            let signals = ctx.signals.clone();
            let worker = match ReaderWorker::connect(ctx) {
                Ok(worker) => worker,
                Err(err) => {
                    signals.mark_exiting();
                    log::error!("RFID reader startup aborted: {}", err);
                    return;
                }
            };
            if let Err(err) = worker.run() {
                signals.mark_exiting();
                log::error!("RFID reader stopped: {}", err);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{IngestionQueue, Signal};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        StartWorker,
        SetPower(u8),
        SetAntenna(Antenna),
        Inventory(InventoryPlan),
        Close,
    }

    #[derive(Default)]
    struct Script {
        reads: VecDeque<Result<Option<TagRead>, DriverError>>,
        calls: Vec<Call>,
        fail_power: bool,
        fail_inventory: bool,
    }

    struct FakeDriver(Arc<Mutex<Script>>);

    impl ReaderDriver for FakeDriver {
        fn start_worker(&mut self) -> Result<(), DriverError> {
            self.0.lock().calls.push(Call::StartWorker);
            Ok(())
        }

        fn set_power(&mut self, dbm: u8) -> Result<(), DriverError> {
            let mut script = self.0.lock();
            script.calls.push(Call::SetPower(dbm));
            if script.fail_power {
                return Err(DriverError::Protocol("power rejected".into()));
            }
            Ok(())
        }

        fn set_work_antenna(&mut self, antenna: Antenna) -> Result<(), DriverError> {
            self.0.lock().calls.push(Call::SetAntenna(antenna));
            Ok(())
        }

        fn start_inventory(&mut self, plan: &InventoryPlan) -> Result<(), DriverError> {
            let mut script = self.0.lock();
            script.calls.push(Call::Inventory(plan.clone()));
            if script.fail_inventory {
                return Err(DriverError::Transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "serial write timed out",
                )));
            }
            Ok(())
        }

        fn poll_tag(&mut self, timeout: Duration) -> Result<Option<TagRead>, DriverError> {
            let next = self.0.lock().reads.pop_front();
            match next {
                Some(read) => read,
                None => {
                    thread::sleep(timeout);
                    Ok(None)
                }
            }
        }

        fn close(&mut self) {
            self.0.lock().calls.push(Call::Close);
        }
    }

    fn context(
        queue: &IngestionQueue,
        config: PipelineConfig,
        signals: WorkerSignals,
    ) -> ReaderContext {
        struct NoConnect;
        impl ReaderConnector for NoConnect {
            fn connect(
                &self,
                port: &str,
                _address: u8,
            ) -> Result<Box<dyn ReaderDriver>, DriverError> {
                Err(DriverError::Connect {
                    port: port.to_string(),
                    reason: "unused".into(),
                })
            }
        }
        ReaderContext {
            connector: Arc::new(NoConnect),
            port: Some("COM1".into()),
            config,
            queue: queue.tx.clone(),
            signals,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    fn signals() -> WorkerSignals {
        WorkerSignals::new(Signal::new(), Signal::new())
    }

    fn worker(
        script: &Arc<Mutex<Script>>,
        queue: &IngestionQueue,
        config: PipelineConfig,
        signals: WorkerSignals,
    ) -> ReaderWorker {
        let driver = Box::new(FakeDriver(script.clone()));
        ReaderWorker::with_driver(driver, context(queue, config, signals)).unwrap()
    }

    #[test]
    fn setup_configures_power_and_last_antenna() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(4);
        let _worker = worker(&script, &queue, PipelineConfig::default(), signals());
        assert_eq!(
            script.lock().calls,
            vec![Call::StartWorker, Call::SetPower(22), Call::SetAntenna(Antenna::Ant4)]
        );
    }

    #[test]
    fn setup_failure_closes_driver_and_aborts() {
        let script = Arc::new(Mutex::new(Script {
            fail_power: true,
            ..Script::default()
        }));
        let queue = IngestionQueue::new(4);
        let driver = Box::new(FakeDriver(script.clone()));
        let ctx = context(&queue, PipelineConfig::default(), signals());
        let result = ReaderWorker::with_driver(driver, ctx);
        assert!(matches!(result, Err(ReaderError::Setup(_))));
        assert_eq!(script.lock().calls.last(), Some(&Call::Close));
    }

    #[test]
    fn missing_port_aborts_startup() {
        let queue = IngestionQueue::new(4);
        let mut ctx = context(&queue, PipelineConfig::default(), signals());
        ctx.port = None;
        assert!(matches!(ReaderWorker::connect(ctx), Err(ReaderError::NoPort)));
    }

    #[test]
    fn repeats_inside_window_produce_one_command_each_window() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(8);
        let mut reader = worker(&script, &queue, PipelineConfig::default(), signals());

        let t0 = Instant::now();
        reader.handle_read(TagRead::tag("ABCD"), t0).unwrap();
        reader
            .handle_read(TagRead::tag("ABCD"), t0 + Duration::from_secs(5))
            .unwrap();
        reader
            .handle_read(TagRead::tag("ABCD"), t0 + Duration::from_secs(20))
            .unwrap();

        let received: Vec<_> = queue.rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].event.received_at, t0);
        assert_eq!(received[1].event.received_at, t0 + Duration::from_secs(20));
        assert_eq!(reader.stats.snapshot().duplicates, 1);
    }

    #[test]
    fn spacing_in_epc_does_not_defeat_dedup() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(8);
        let mut reader = worker(&script, &queue, PipelineConfig::default(), signals());
        let t0 = Instant::now();
        reader.handle_read(TagRead::tag("30 00 00 01"), t0).unwrap();
        reader.handle_read(TagRead::tag("30000001"), t0).unwrap();
        assert_eq!(queue.rx.try_iter().count(), 1);
    }

    #[test]
    fn full_queue_drops_event_without_failing() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(1);
        let config = PipelineConfig {
            enqueue_timeout_ms: 20,
            ..PipelineConfig::default()
        };
        let mut reader = worker(&script, &queue, config, signals());
        let now = Instant::now();

        reader.handle_read(TagRead::tag("01"), now).unwrap();
        reader.handle_read(TagRead::tag("02"), now).unwrap();

        assert_eq!(reader.stats.snapshot().dropped, 1);
        assert_eq!(queue.rx.try_recv().unwrap().event.tag_id, "01");
        assert!(queue.rx.try_recv().is_err());
    }

    #[test]
    fn marker_only_reads_are_not_enqueued() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(4);
        let mut reader = worker(&script, &queue, PipelineConfig::default(), signals());
        reader
            .handle_read(TagRead::cycle_complete(), Instant::now())
            .unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn stepping_policy_rotates_on_read_complete() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(4);
        let config = PipelineConfig {
            antenna_policy: AntennaPolicy::Stepping,
            ..PipelineConfig::default()
        };
        let mut reader = worker(&script, &queue, config, signals());
        script.lock().calls.clear();

        for _ in 0..5 {
            reader
                .handle_read(TagRead::cycle_complete(), Instant::now())
                .unwrap();
        }

        let antennas: Vec<_> = script
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::SetAntenna(antenna) => Some(*antenna),
                _ => None,
            })
            .collect();
        assert_eq!(
            antennas,
            vec![Antenna::Ant1, Antenna::Ant2, Antenna::Ant3, Antenna::Ant4, Antenna::Ant1]
        );
    }

    #[test]
    fn fast_switch_idle_tick_covers_all_antennas() {
        let rotation = AntennaRotation::new(AntennaPolicy::FastSwitch, 4);
        assert_eq!(
            rotation.idle_plan(10),
            InventoryPlan::FastSwitch {
                antennas: Antenna::ALL.to_vec(),
                repeat: 10
            }
        );
        let mut rotation = rotation;
        assert_eq!(rotation.on_read_complete(), None);
        assert_eq!(rotation.current(), Antenna::Ant4);
    }

    #[test]
    fn run_issues_inventory_on_idle_and_closes_on_stop() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(4);
        let signals = signals();
        let config = PipelineConfig {
            poll_interval_ms: 5,
            ..PipelineConfig::default()
        };
        let reader = worker(&script, &queue, config, signals.clone());
        script.lock().reads.push_back(Ok(Some(TagRead::tag("AA"))));

        let stop = signals.stop.clone();
        let handle = thread::spawn(move || reader.run());
        thread::sleep(Duration::from_millis(50));
        stop.set();
        assert!(handle.join().unwrap().is_ok());

        let calls = script.lock().calls.clone();
        assert!(calls
            .iter()
            .any(|call| matches!(call, Call::Inventory(InventoryPlan::FastSwitch { .. }))));
        assert_eq!(calls.last(), Some(&Call::Close));
        assert_eq!(queue.rx.try_recv().unwrap().event.tag_id, "AA");
    }

    #[test]
    fn transport_failure_ends_run() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(4);
        let reader = worker(&script, &queue, PipelineConfig::default(), signals());
        {
            let mut script = script.lock();
            script.reads.push_back(Err(DriverError::Protocol("bad frame".into())));
            script.reads.push_back(Ok(Some(TagRead::tag("BB"))));
            script.reads.push_back(Err(DriverError::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "unplugged",
            ))));
        }

        let result = reader.run();
        assert!(matches!(result, Err(ReaderError::Transport(_))));
        assert_eq!(queue.rx.try_recv().unwrap().event.tag_id, "BB");
        assert_ne!(script.lock().calls.last(), Some(&Call::Close));
    }

    #[test]
    fn transport_failure_on_idle_inventory_ends_run_without_close() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(4);
        let config = PipelineConfig {
            poll_interval_ms: 1,
            ..PipelineConfig::default()
        };
        let reader = worker(&script, &queue, config, signals());
        script.lock().fail_inventory = true;

        let result = reader.run();
        assert!(matches!(result, Err(ReaderError::Transport(_))));
        let calls = script.lock().calls.clone();
        assert!(matches!(calls.last(), Some(Call::Inventory(_))));
        assert!(!calls.contains(&Call::Close));
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_is_not_confirmed_while_start_holds_gate() {
        let script = Arc::new(Mutex::new(Script::default()));
        let queue = IngestionQueue::new(4);
        let config = PipelineConfig {
            poll_interval_ms: 1,
            ..PipelineConfig::default()
        };
        let signals = signals();
        let reader = worker(&script, &queue, config, signals.clone());

        signals.stop.set();
        let gate = signals.lock_gate();
        let handle = thread::spawn(move || reader.run());
        thread::sleep(Duration::from_millis(30));
        signals.stop.clear();
        drop(gate);

        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        assert!(!script.lock().calls.contains(&Call::Close));

        signals.stop.set();
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(script.lock().calls.last(), Some(&Call::Close));
    }
}
