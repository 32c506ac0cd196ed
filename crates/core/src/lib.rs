pub mod audit;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod secrets;
pub mod types;
