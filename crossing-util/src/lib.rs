pub mod config;
pub mod crypto;
pub mod dirs;
pub mod fs;
pub mod http;
pub mod store;
