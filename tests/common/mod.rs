#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

use boardsight::Config;

/// Default configuration with a frame timeout generous enough for
/// unoptimised test builds
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.session.frame_timeout_ms = 60_000;
    config.session.queue_capacity = 8;
    config
}
