//! Job store backends shared by every gateway instance.

pub mod redis;

pub use self::redis::RedisJobStore;
