pub mod android;
pub mod build;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pages;
pub mod platform;
pub mod proxy;
pub mod runtime;
pub mod server;
pub mod toolchain;
pub mod workspace;
