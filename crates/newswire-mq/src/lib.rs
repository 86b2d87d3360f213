pub mod bus;
pub mod config;
pub mod queue;

pub use bus::RedisBus;
pub use config::RedisConfig;
pub use queue::RedisQueue;
