pub mod config;
pub mod error;
pub mod maven;
pub mod proxy;
pub mod server;
pub mod storage;
pub mod tasks;
pub mod util;
pub mod walker;
