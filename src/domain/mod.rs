//! Domain model: entities, their invariants, and the ports the application
//! layer talks to.
//!
//! Everything in here is free of I/O. Entity methods that mutate state are
//! the single source of truth for preconditions; store backends call them
//! inside their atomic single-document operations.

pub mod money;
pub mod order;
pub mod otc;
pub mod ports;
pub mod transaction;
pub mod user;
