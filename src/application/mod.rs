//! Application layer orchestrating the payment lifecycle.
//!
//! `PaymentEngine` is the single entry point for mutating payments. It drives
//! the store and cache ports defined in `domain::ports` and keeps their
//! writes in commit-then-cache order.

pub mod engine;
