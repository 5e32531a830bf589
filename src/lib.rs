pub mod config;
pub mod constants;
pub mod controller;
pub mod draw;
pub mod error;
pub mod identity;
pub mod motion;
pub mod reconcile;
pub mod rng;
pub mod scheduler;
pub mod server_protocol;
pub mod server_utils;
pub mod store;
pub mod types;
