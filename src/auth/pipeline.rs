//! Ordered request-admission stages.
//!
//! Each stage receives the context built so far and either forwards an enriched
//! context or stops the request with an error. Stages run strictly in order.

use super::resolver::IdentityResolver;
use super::token::TokenVerifier;
use crate::domain::identity::{LocalIdentity, Principal};
use crate::error::{AuthError, PaymentError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// State accumulated while admitting a request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Raw `Authorization` header value, if any.
    pub authorization: Option<String>,
    pub principal: Option<Principal>,
    pub identity: Option<LocalIdentity>,
}

impl RequestContext {
    pub fn new(authorization: Option<&str>) -> Self {
        Self {
            authorization: authorization.map(str::to_string),
            ..Self::default()
        }
    }

    /// The admitted caller. Fails if identity resolution never ran.
    pub fn into_caller(self) -> Result<Caller> {
        match (self.principal, self.identity) {
            (Some(principal), Some(identity)) => Ok(Caller { principal, identity }),
            _ => Err(AuthError::Missing.into()),
        }
    }
}

/// An authenticated caller with its local identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub principal: Principal,
    pub identity: LocalIdentity,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, ctx: RequestContext) -> Result<RequestContext>;
}

pub struct VerifyToken {
    verifier: Arc<TokenVerifier>,
}

impl VerifyToken {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl Stage for VerifyToken {
    fn name(&self) -> &'static str {
        "verify-token"
    }

    async fn apply(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        let principal = self.verifier.verify(ctx.authorization.as_deref())?;
        ctx.principal = Some(principal);
        Ok(ctx)
    }
}

pub struct ResolveIdentity {
    resolver: Arc<IdentityResolver>,
}

impl ResolveIdentity {
    pub fn new(resolver: Arc<IdentityResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Stage for ResolveIdentity {
    fn name(&self) -> &'static str {
        "resolve-identity"
    }

    async fn apply(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        let principal = ctx.principal.as_ref().ok_or(AuthError::Missing)?;
        ctx.identity = Some(self.resolver.resolve(principal).await?);
        Ok(ctx)
    }
}

/// Admits only identities whose email the issuer has verified.
pub struct RequireVerified;

#[async_trait]
impl Stage for RequireVerified {
    fn name(&self) -> &'static str {
        "require-verified"
    }

    async fn apply(&self, ctx: RequestContext) -> Result<RequestContext> {
        match &ctx.identity {
            Some(identity) if identity.verified => Ok(ctx),
            Some(_) => Err(PaymentError::Unauthorized {
                reason: "user not verified".to_string(),
            }),
            None => Err(AuthError::Missing.into()),
        }
    }
}

#[derive(Default)]
pub struct RequestPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl RequestPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        for stage in &self.stages {
            ctx = stage.apply(ctx).await.inspect_err(|e| {
                tracing::debug!(stage = stage.name(), error = %e, "Request stopped");
            })?;
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{TokenClaims, issue_token};
    use crate::clock::{Clock, ManualClock};
    use crate::infrastructure::in_memory::InMemoryIdentityStore;
    use chrono::Duration;
    use jsonwebtoken::Algorithm;

    fn pipeline(clock: &ManualClock, require_verified: bool) -> RequestPipeline {
        let clock: crate::clock::ClockRef = Arc::new(clock.clone());
        let verifier = Arc::new(TokenVerifier::new("s3cret", vec![Algorithm::HS256], clock.clone()));
        let resolver = Arc::new(IdentityResolver::new(
            Box::new(InMemoryIdentityStore::new()),
            clock,
        ));
        let mut pipeline = RequestPipeline::new()
            .with_stage(VerifyToken::new(verifier))
            .with_stage(ResolveIdentity::new(resolver));
        if require_verified {
            pipeline = pipeline.with_stage(RequireVerified);
        }
        pipeline
    }

    fn bearer(clock: &ManualClock, verified: bool) -> String {
        let claims = TokenClaims {
            sub: "user_456".to_string(),
            email: Some("jane@example.com".to_string()),
            is_verified: Some(verified),
            exp: (clock.now() + Duration::hours(1)).timestamp(),
        };
        format!("Bearer {}", issue_token(&claims, "s3cret", Algorithm::HS256).unwrap())
    }

    #[tokio::test]
    async fn test_pipeline_admits_valid_caller() {
        let clock = ManualClock::default();
        let header = bearer(&clock, true);
        let caller = pipeline(&clock, true)
            .run(RequestContext::new(Some(&header)))
            .await
            .unwrap()
            .into_caller()
            .unwrap();
        assert_eq!(caller.identity.subject, "user_456");
        assert_eq!(caller.principal.email.as_deref(), Some("jane@example.com"));
    }

    #[tokio::test]
    async fn test_pipeline_stops_at_first_failing_stage() {
        let clock = ManualClock::default();
        let result = pipeline(&clock, true).run(RequestContext::new(None)).await;
        assert!(matches!(result, Err(PaymentError::Auth(AuthError::Missing))));

        let header = bearer(&clock, false);
        let result = pipeline(&clock, true).run(RequestContext::new(Some(&header))).await;
        assert!(matches!(result, Err(PaymentError::Unauthorized { .. })));
    }

    #[test]
    fn test_stage_order() {
        let clock = ManualClock::default();
        assert_eq!(
            pipeline(&clock, true).stage_names(),
            ["verify-token", "resolve-identity", "require-verified"]
        );
    }
}
