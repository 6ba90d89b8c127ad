pub mod batch;
pub mod cli;
pub mod config;
pub mod db;
pub mod decision;
pub mod extractor;
pub mod job;
pub mod matcher;
mod metrics;
pub mod pipeline;
pub mod queue;
pub mod results;
pub mod server;
pub mod store;
pub mod utils;
pub mod worker;

pub use config::Opts;
