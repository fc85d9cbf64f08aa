pub mod commands;
pub mod config;
pub mod context;
pub mod data;
pub mod engine;
pub mod error;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod performance;
pub(crate) mod retry;
pub mod store;
pub mod sweep;
pub mod trading_rules;
