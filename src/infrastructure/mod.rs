//! Adapters behind the domain ports: storage backends, clock, notification
//! delivery, blob storage and log setup.

pub mod blob;
pub mod clock;
pub mod in_memory;
pub mod logging;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
