pub mod activity;
pub mod chat;
pub mod config;
pub mod host;
