//! OptBot Library
//!
//! Automated short-dated options trading: chain scoring, budget-constrained
//! allocation and bracket-order execution

pub mod agent;
pub mod allocation;
pub mod broker;
pub mod candidates;
pub mod chain;
pub mod config;
pub mod lifecycle;
pub mod notify;
pub mod persistence;
pub mod schedule;
pub mod scoring;
pub mod types;
