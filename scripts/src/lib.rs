//! Declarative, resumable deployments: a graph of deploy / invoke actions is planned into a
//! deterministic order and executed one action at a time, every confirmed result journaled so
//! an interrupted run picks up where it stopped.

pub mod cli;
pub mod commands;
pub mod config;
pub mod constants;
pub mod errors;
pub mod graph;
pub mod journal;
pub mod orchestrator;
pub mod tx;
