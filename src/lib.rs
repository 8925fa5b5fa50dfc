pub mod api;
pub mod config;
pub mod storage;
pub mod upload;
