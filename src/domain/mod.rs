//! Entities, value objects and the ports the core talks through.

pub mod events;
pub mod identity;
pub mod page;
pub mod payment;
pub mod ports;
