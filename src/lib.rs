pub mod config;
pub mod counter;
pub mod driver;
pub mod export;
pub mod monitor;
pub mod pipeline;
pub mod report;
pub mod sampler;
