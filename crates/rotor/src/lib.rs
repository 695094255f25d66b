//! The rotor worker: per-message orchestration on top of the config store,
//! the UDF registry, and the function chain, plus the operator HTTP surface
//! and the bus adapter contract.

pub mod bus;
pub mod config;
pub mod handler;
pub mod http;
mod metrics;
pub mod service;
#[cfg(test)]
mod tests;

pub use crate::{
    bus::MessageSink,
    config::RotorConfig,
    handler::{
        EventDisposition,
        MessageHandler,
    },
    service::{
        RotorService,
        ServiceDeps,
    },
};
