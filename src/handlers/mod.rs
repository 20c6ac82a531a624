pub mod demo;
pub mod logs_api;
