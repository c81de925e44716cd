#![allow(dead_code)]

use chrono::{Duration, Utc};
use jsonwebtoken::Algorithm;
use payledger::application::service::PaymentService;
use payledger::auth::pipeline::Caller;
use payledger::auth::token::{TokenClaims, issue_token};
use payledger::clock::{ClockRef, ManualClock};
use payledger::config::AppConfig;
use payledger::domain::payment::NewPayment;
use payledger::infrastructure::broker::InMemoryBroker;
use payledger::infrastructure::in_memory::{InMemoryIdentityStore, InMemoryPaymentStore};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const SECRET: &str = "jwt-secret-key";

/// Mints a token the way the identity service does, expiring `ttl` after `clock`'s now.
pub fn token_at(clock: &ManualClock, subject: &str, email: Option<&str>, verified: bool, ttl: Duration) -> String {
    use payledger::clock::Clock;
    let claims = TokenClaims {
        sub: subject.to_string(),
        email: email.map(str::to_string),
        is_verified: Some(verified),
        exp: (clock.now() + ttl).timestamp(),
    };
    issue_token(&claims, SECRET, Algorithm::HS256).unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn new_payment(booking: &str, amount: Decimal) -> NewPayment {
    NewPayment {
        booking_ref: booking.to_string(),
        amount,
        currency: Some("USD".to_string()),
        payment_method: Some("credit_card".to_string()),
    }
}

/// A service wired to in-memory stores, an in-memory broker and a manual clock.
pub struct Harness {
    pub service: PaymentService,
    pub broker: InMemoryBroker,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(config: AppConfig) -> Self {
        let broker = InMemoryBroker::new();
        let clock = ManualClock::new(Utc::now());
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let service = PaymentService::from_config(
            &config,
            Box::new(InMemoryIdentityStore::new()),
            Box::new(InMemoryPaymentStore::new()),
            Box::new(broker.clone()),
            clock_ref,
        );
        Self {
            service,
            broker,
            clock,
        }
    }

    pub fn with_events() -> Self {
        let mut config = AppConfig::default();
        config.publisher.enabled = true;
        Self::new(config)
    }

    pub fn token(&self, subject: &str, email: Option<&str>, verified: bool) -> String {
        token_at(&self.clock, subject, email, verified, Duration::hours(1))
    }

    pub async fn caller(&self, subject: &str) -> Caller {
        let token = self.token(subject, Some(&format!("{subject}@example.com")), true);
        self.service
            .authenticate(Some(&bearer(&token)))
            .await
            .unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

/// Writes a replay file with `rows` create commands spread over `subjects` callers.
pub fn generate_commands_csv(path: &Path, rows: usize, subjects: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "subject", "email", "booking", "amount", "currency", "method", "status"])?;

    for i in 1..=rows {
        let subject = format!("user_{}", i % subjects.max(1));
        let booking = format!("BOOK-{i:04}");
        wtr.write_record([
            "create",
            subject.as_str(),
            "",
            booking.as_str(),
            "1.0",
            "USD",
            "card",
            "",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
