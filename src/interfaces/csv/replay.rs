use super::command_reader::{Command, CommandType};
use crate::application::service::PaymentService;
use crate::auth::pipeline::Caller;
use crate::auth::token::{TokenClaims, issue_token};
use crate::clock::ClockRef;
use crate::domain::payment::{NewPayment, Payment};
use crate::error::{PaymentError, Result};
use jsonwebtoken::Algorithm;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

const TOKEN_LIFETIME_HOURS: i64 = 1;
const SNAPSHOT_PAGE_SIZE: u32 = 100;

/// Drives `PaymentService` from replayed commands.
///
/// Every command is sent through the full admission pipeline with a freshly minted token
/// for its subject, so the replay exercises the same path as a real request.
pub struct Replayer {
    service: PaymentService,
    secret: String,
    algorithm: Algorithm,
    clock: ClockRef,
    callers: BTreeMap<String, Caller>,
}

impl Replayer {
    pub fn new(service: PaymentService, secret: impl Into<String>, algorithm: Algorithm, clock: ClockRef) -> Self {
        Self {
            service,
            secret: secret.into(),
            algorithm,
            clock,
            callers: BTreeMap::new(),
        }
    }

    pub fn service(&self) -> &PaymentService {
        &self.service
    }

    pub async fn apply(&mut self, command: Command) -> Result<Payment> {
        let caller = self.admit(&command).await?;
        self.callers.insert(command.subject.clone(), caller.clone());

        match command.op {
            CommandType::Create => {
                let request = NewPayment {
                    booking_ref: required(command.booking, "booking")?,
                    amount: parse_amount(command.amount)?,
                    currency: command.currency,
                    payment_method: command.method,
                };
                self.service.create_payment(&caller, request).await
            }
            CommandType::Process => {
                let target = self.latest_for_booking(&caller, command.booking).await?;
                self.service.process_payment(&caller, target.payment_id).await
            }
            CommandType::Refund => {
                let target = self.latest_for_booking(&caller, command.booking).await?;
                self.service.refund_payment(&caller, target.payment_id).await
            }
            CommandType::Status => {
                let status = required(command.status, "status")?;
                let target = self.latest_for_booking(&caller, command.booking).await?;
                self.service
                    .update_status(&caller, target.payment_id, &status, None)
                    .await
            }
        }
    }

    /// Every payment of every subject seen so far, oldest first within a subject.
    pub async fn snapshot(&self) -> Result<Vec<(String, Payment)>> {
        let mut rows = Vec::new();
        for (subject, caller) in &self.callers {
            let mut owned = Vec::new();
            let mut page = 1;
            loop {
                let batch = self
                    .service
                    .list_payments(caller, page, Some(SNAPSHOT_PAGE_SIZE))
                    .await?;
                let more = batch.has_next();
                owned.extend(batch.items);
                if !more {
                    break;
                }
                page += 1;
            }
            owned.reverse();
            rows.extend(owned.into_iter().map(|p| (subject.clone(), p)));
        }
        Ok(rows)
    }

    async fn admit(&self, command: &Command) -> Result<Caller> {
        let claims = TokenClaims {
            sub: command.subject.clone(),
            email: command.email.clone(),
            is_verified: Some(true),
            exp: (self.clock.now() + chrono::Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
        };
        let token = issue_token(&claims, &self.secret, self.algorithm)?;
        debug!(subject = %command.subject, op = ?command.op, "Replaying command");
        self.service
            .authenticate(Some(&format!("Bearer {token}")))
            .await
    }

    async fn latest_for_booking(&self, caller: &Caller, booking: Option<String>) -> Result<Payment> {
        let booking = required(booking, "booking")?;
        self.service
            .booking_payments(caller, &booking)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PaymentError::not_found("payment", booking))
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::validation(field, format!("{field} is required")))
}

fn parse_amount(raw: Option<String>) -> Result<Decimal> {
    let raw = required(raw, "amount")?;
    Decimal::from_str(raw.trim()).map_err(|_| PaymentError::validation("amount", "Invalid amount"))
}
