use crate::domain::ports::SequenceStore;
use crate::error::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

pub const TRACKING_PREFIX: &str = "SW";

/// Hands out `SW<YYYYMMDD><seq>` codes from a per-day atomic counter.
///
/// Sequences are zero-padded to three digits and simply widen past 999.
#[derive(Clone)]
pub struct TrackingCodeAllocator {
    sequences: Arc<dyn SequenceStore>,
}

impl TrackingCodeAllocator {
    pub fn new(sequences: Arc<dyn SequenceStore>) -> Self {
        Self { sequences }
    }

    pub async fn allocate(&self, date: NaiveDate) -> Result<String> {
        let prefix = day_prefix(date);
        let seq = self.sequences.next(&format!("tracking:{}", prefix)).await?;
        let code = format!("{}{:03}", prefix, seq);
        debug!(tracking_code = %code, "Tracking code allocated");
        Ok(code)
    }
}

pub fn day_prefix(date: NaiveDate) -> String {
    format!("{}{}", TRACKING_PREFIX, date.format("%Y%m%d"))
}
