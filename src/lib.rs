//! Agro Broker marketplace library
//!
//! Commodity listings, buyer offers and the admin-confirmed contracts they
//! turn into, served over a JSON HTTP API.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod persistence;
pub mod rate_limit;
pub mod task_runner;
