pub mod application;
pub mod auth;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
