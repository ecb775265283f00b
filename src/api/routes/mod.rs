//! API route handlers

pub mod control;
pub mod report;
