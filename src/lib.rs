#![recursion_limit = "1024"]
pub mod config;
pub mod ir;
pub mod logging;
pub mod session;
