pub mod clock;
pub mod config;
pub mod config_store;
pub mod device;
pub mod http;
pub mod link;
pub mod metrics;
pub mod notifier;
pub mod platform;
pub mod presence;
pub mod reservation;
pub mod sessions;
pub mod supervisor;
pub mod tasking;
pub mod telemetry;
pub mod transport;
pub mod wanip;
pub mod watchdog;
