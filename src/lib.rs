//! # powercap-rs
//!
//! Task orchestration core: composable async task units, sequential
//! composites, dependency-graph workflows, and run-state tracking over a
//! durable key-value store.
//!
//! Runs reach workers through a broker (pgmq, or in-process for tests);
//! lifecycle hooks write each transition through the [`tracker`] so status
//! is visible to every producer and consumer.

pub mod beat;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod registry;
pub mod service;
pub mod store;
pub mod task;
pub mod tasks;
pub mod telemetry;
pub mod tracker;
pub mod worker;
