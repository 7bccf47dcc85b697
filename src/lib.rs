//! Form Worker: lease-protected form-fill job execution.

pub mod blocker;
pub mod config;
pub mod error;
pub mod fill;
pub mod job;
pub mod locator;
pub mod page;
pub mod platform;
pub mod reasoning;
pub mod store;
pub mod worker;
