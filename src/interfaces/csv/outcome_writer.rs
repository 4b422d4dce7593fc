use crate::application::webhook::PaymentOutcome;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One line of a reconciliation report.
#[derive(Debug, Serialize, PartialEq)]
pub struct OutcomeRow {
    pub payment_id: String,
    /// `completed`, `failed`, or the error kind that stopped the row.
    pub result: String,
    pub transaction_id: Option<String>,
    pub new_balance: Option<Decimal>,
    pub message: String,
}

impl OutcomeRow {
    pub fn from_result(payment_id: &str, result: &Result<PaymentOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                payment_id: payment_id.to_string(),
                result: if outcome.success { "completed" } else { "failed" }.to_string(),
                transaction_id: outcome.transaction_id.map(|id| id.to_string()),
                new_balance: outcome.new_balance.map(|b| b.value()),
                message: outcome.message.clone(),
            },
            Err(e) => Self {
                payment_id: payment_id.to_string(),
                result: e.kind().to_string(),
                transaction_id: None,
                new_balance: None,
                message: e.to_string(),
            },
        }
    }
}

pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(dest: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(dest),
        }
    }

    pub fn write(&mut self, row: &OutcomeRow) -> Result<()> {
        self.writer.serialize(row)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rows_for_success_and_error() {
        let ok: Result<PaymentOutcome> = Ok(PaymentOutcome {
            success: true,
            message: "Payment confirmed".to_string(),
            transaction_id: None,
            new_balance: Some(Balance::new(dec!(150000))),
        });
        let replay: Result<PaymentOutcome> = Err(EngineError::AlreadyProcessed("P1".into()));

        let mut out = Vec::new();
        {
            let mut writer = OutcomeWriter::new(&mut out);
            writer.write(&OutcomeRow::from_result("P1", &ok)).unwrap();
            writer.write(&OutcomeRow::from_result("P1", &replay)).unwrap();
            writer.finish().unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "payment_id,result,transaction_id,new_balance,message");
        assert_eq!(lines[1], "P1,completed,,150000,Payment confirmed");
        assert!(lines[2].starts_with("P1,already_processed,,,"));
    }
}
