//! Use cases of the order and ledger engine.
//!
//! Each service takes its store handles at construction and talks to the
//! backends only through the ports in `domain::ports`. `ShipwayEngine` wires
//! them together.

pub mod accounts;
pub mod engine;
pub mod orders;
pub mod otc;
pub mod pricing;
pub mod topup;
pub mod tracking;
pub mod wallet;
pub mod webhook;
