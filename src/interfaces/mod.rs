//! Batch CSV front end: command rows in, payment table out.

pub mod batch;
pub mod csv;
