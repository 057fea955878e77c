//! Download orchestration around an aria2 daemon: submits transfers, follows
//! them through daemon notifications and catalogs finished files into the
//! media library.

pub mod config;
pub mod daemon;
pub mod datasource;
pub mod errors;
pub mod files;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod request_cache;
pub mod sandbox;
pub mod state;
pub mod tasks;
