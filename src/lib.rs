// 模块划分：数据模型、去重、驱动接口、读卡/结果线程与生命周期
pub mod client;
pub mod debounce;
pub mod driver;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod reader;
pub mod replay;
pub mod results;
pub mod settings;

pub use client::IngestionClient;
pub use debounce::Deduplicator;
pub use driver::{Antenna, InventoryPlan, ReaderConnector, ReaderDriver};
pub use error::{ConvertError, DriverError, ReaderError, ResultError, SettingsError};
pub use model::{
    AntennaPolicy, CommandKind, IngestionCommand, IngestionResult, PipelineConfig, ResultKind,
    TagEvent, TagRead,
};
pub use pipeline::{Signal, StatsSnapshot};
pub use results::card_number_from_epc;
pub use settings::{get_setting, JsonRaceModel, RaceModel};
