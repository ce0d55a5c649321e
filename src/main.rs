use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rfid_ingest::replay::{ReplayConnector, ReplayEnd};
use rfid_ingest::{IngestionClient, JsonRaceModel, SettingsError, Signal};

const DEFAULT_SETTINGS_PATH: &str = "settings.json";

fn main() {
    // 日志：RUST_LOG 未设置时默认 info
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("RFID ingest booting...");
    if let Err(err) = run() {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), SettingsError> {
    let settings_path =
        env::var("RFID_SETTINGS").unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let model = JsonRaceModel::load(&settings_path)?;
    let config = model.pipeline_config();

    // 无硬件时，system_port 指向抓包文件，回放完即视为断线
    let port = model.required_port()?;
    let connector = ReplayConnector::load(&port, ReplayEnd::Disconnect)?;

    let shutdown = Signal::new();
    let drain_timeout = config.startup_delay() + config.dequeue_timeout() * 2;
    let client = IngestionClient::new(
        Arc::new(connector),
        Arc::new(model),
        config,
        shutdown.clone(),
    );
    client.register_callback(|result| println!("{}", result.to_json_string()));
    client.start();

    // 读卡线程结束（回放耗尽/链路故障）后停止整个管线
    while client.is_alive() {
        thread::sleep(Duration::from_millis(200));
    }
    client.stop();
    if !client.wait_stopped(drain_timeout) {
        log::warn!("RFID workers still running after {:?}", drain_timeout);
    }
    shutdown.set();

    let stats = client.stats();
    log::info!(
        "Done: accepted={} duplicates={} dropped={} delivered={} failed={}",
        stats.accepted,
        stats.duplicates,
        stats.dropped,
        stats.delivered,
        stats.failed
    );
    Ok(())
}
