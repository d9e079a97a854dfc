pub mod aggregator;
pub mod config;
pub mod control;
pub mod duration;
pub mod error;
pub mod feed;
pub mod storage;

pub use aggregator::{Aggregator, AggregatorStatus};
pub use config::AppConfig;
pub use control::{ControlClient, ControlServer};
pub use error::{Error, Result};
