use crate::domain::payment::Payment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct PaymentRecord<'a> {
    subject: &'a str,
    booking: &'a str,
    amount: String,
    currency: &'a str,
    status: &'a str,
    transaction_ref: Option<&'a str>,
    payment_id: String,
}

/// Writes payments as CSV, one row per payment, labelled with the owner's subject.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments<'a>(
        &mut self,
        rows: impl IntoIterator<Item = (&'a str, &'a Payment)>,
    ) -> Result<()> {
        for (subject, payment) in rows {
            self.writer.serialize(PaymentRecord {
                subject,
                booking: &payment.booking_ref,
                amount: payment.amount.to_string(),
                currency: payment.currency.as_str(),
                status: payment.status.as_str(),
                transaction_ref: payment.transaction_ref.as_deref(),
                payment_id: payment.payment_id.to_string(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
