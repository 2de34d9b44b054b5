pub mod broker;

use envconfig::Envconfig;

pub use broker::*;

/// Settings for the dev pipeline binary.
#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "SPANBUS_DEV_TOPIC", default = "spanbus-dev")]
    pub topic: String,

    #[envconfig(from = "SPANBUS_DEV_PARTITIONS", default = "4")]
    pub partitions: i32,

    #[envconfig(from = "SPANBUS_DEV_POLL_TIMEOUT_MS", default = "250")]
    pub poll_timeout_ms: u64,

    #[envconfig(from = "SPANBUS_DEV_MESSAGES", default = "5")]
    pub messages: u32,
}
