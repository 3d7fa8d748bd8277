//! devpipe
//!
//! Captures what a browser tab does (requests, clicks, navigations) into compact JSONL logs
//! meant to be read by developers and language models.

pub mod cli;
pub mod config;
pub mod metrics;

pub use config::DevpipeConfig;
