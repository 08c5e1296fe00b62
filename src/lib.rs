//! digsinet - Digital Twin Network Orchestration
//!
//! Runs a real network topology alongside a set of sibling twins. Every
//! topology is owned by a controller in its own OS process; controllers
//! coordinate exclusively over an event broker, never by calling each
//! other.

pub mod bootstrap;
pub mod broker;
pub mod config;
pub mod controller;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_support;
