pub mod api;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod processor;
pub mod server;
pub mod sweeper;
pub mod worker;
