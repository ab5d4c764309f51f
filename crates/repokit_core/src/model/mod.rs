//! Value model shared by metadata, query planning and execution.
//!
//! # Responsibility
//! - Define engine-neutral values and call arguments.
//! - Define mapped records, association state and paging types.
//!
//! # Invariants
//! - Types here carry no store handles and perform no I/O.

pub mod page;
pub mod record;
pub mod value;
