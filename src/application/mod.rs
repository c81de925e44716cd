//! Application layer containing the business orchestration.
//!
//! `PaymentLedger` owns the payment lifecycle, `EventPublisher` announces changes, and
//! `PaymentService` ties both to request admission for the routing layer.

pub mod ledger;
pub mod publisher;
pub mod service;
