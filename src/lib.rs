pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod persistence;
pub mod retry;
