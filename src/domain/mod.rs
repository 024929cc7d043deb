//! Domain layer: payment records, the lifecycle state machine, and the
//! ports the engine drives.

pub mod event;
pub mod fraud;
pub mod lifecycle;
pub mod money;
pub mod payment;
pub mod ports;
pub mod refund;
