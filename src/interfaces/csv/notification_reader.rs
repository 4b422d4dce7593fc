use crate::application::webhook::PaymentNotification;
use crate::error::{EngineError, Result};
use std::io::Read;

/// Reads payment notifications from a settlement CSV with the header
/// `payment_id,status,transaction_code,payment_time,signature`.
///
/// Empty optional cells read as absent. Whitespace is trimmed and short rows
/// are accepted.
pub struct NotificationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> NotificationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Streams rows lazily; one bad row does not stop the rest.
    pub fn notifications(self) -> impl Iterator<Item = Result<PaymentNotification>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EngineError::from))
    }
}
