//! CSV adapters used by the command-line tool.

pub mod audit_writer;
pub mod notification_reader;
pub mod outcome_writer;
