//! Deterministic, pure logic shared by the workflow commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod path;
pub mod pr_number;
pub mod types;
