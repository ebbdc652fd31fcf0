//! Flash image formats.

pub mod parameter;
