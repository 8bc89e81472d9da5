//! Terminal client for the dropout-risk dashboard API.

pub mod charts;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod forms;
pub mod models;
pub mod poller;
pub mod report;
pub mod risk;
pub mod table;
pub mod toast;
pub mod view;

pub use error::{DashboardError, Result};
