pub(crate) mod builder;
pub(crate) mod classify;
pub(crate) mod engine;
pub(crate) mod hiera;
pub(crate) mod lifecycle;
pub(crate) mod process;
pub(crate) mod remote;
pub(crate) mod report;
pub(crate) mod sequencer;
pub(crate) mod shell;
pub(crate) mod template;
pub(crate) mod version;
pub(crate) mod workflow;

pub mod cli;
pub mod config;

pub(crate) type Result<T, E = Box<dyn std::error::Error + Send + Sync + 'static>> =
    std::result::Result<T, E>;
