//! Client-facing API: configuration, builder and the session controller

pub mod builder;
pub mod config;
pub mod controller;

pub use builder::ClientBuilder;
pub use config::ClientConfig;
pub use controller::{SessionController, MISSING_JOIN_INPUT};
