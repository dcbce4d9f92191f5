pub mod config;
pub mod fetch;
pub mod invoke;
pub mod serve;
