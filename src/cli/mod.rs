pub mod app;
pub mod commands;
pub mod context;
pub mod control;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod monitor;
pub mod runtime;

pub use app::run;
