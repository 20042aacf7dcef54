pub mod archive;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod locale;
pub mod map_store;
pub mod network;
pub mod permalink;
pub mod rebuild;
pub mod security;
pub mod server;
pub mod settings;
pub mod store;
pub mod sync;
pub mod tags;
