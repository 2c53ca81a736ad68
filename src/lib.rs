pub mod agents;
pub mod app;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod logging;
pub mod providers;
