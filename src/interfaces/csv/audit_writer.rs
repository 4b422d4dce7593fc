use crate::application::wallet::LedgerAudit;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AuditRow<'a> {
    user_id: String,
    phone: &'a str,
    balance: Decimal,
    total_topup: Decimal,
    total_usage: Decimal,
    total_refund: Decimal,
    ledger_balance: Decimal,
    consistent: bool,
}

const HEADER: [&str; 8] = [
    "user_id",
    "phone",
    "balance",
    "total_topup",
    "total_usage",
    "total_refund",
    "ledger_balance",
    "consistent",
];

/// Writes one row per wallet with its ledger reconciliation.
///
/// The header is always written, so an empty store still yields a valid file.
pub struct AuditWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AuditWriter<W> {
    pub fn new(dest: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(dest),
        }
    }

    pub fn write_audits(&mut self, audits: &[LedgerAudit]) -> Result<()> {
        self.writer.write_record(HEADER)?;
        for audit in audits {
            self.writer.serialize(AuditRow {
                user_id: audit.user_id.to_string(),
                phone: &audit.phone,
                balance: audit.wallet.balance.value(),
                total_topup: audit.wallet.total_topup.value(),
                total_usage: audit.wallet.total_usage.value(),
                total_refund: audit.wallet.total_refund.value(),
                ledger_balance: audit.ledger_balance.value(),
                consistent: audit.consistent,
            })?;
        }
        self.writer.flush().map_err(EngineError::from)
    }
}
