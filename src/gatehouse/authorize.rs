use tracing::{debug, instrument};

use super::Gatehouse;
use crate::decision::{Decision, DenyReason};
use crate::error::Result;
use crate::password::PasswordExpirationStatus;
use crate::permissions::{Actor, Resource};
use crate::rate_limit::{RateLimitOutcome, RateLimitRule, RequestContext};
use crate::token::{TokenIdentity, ValidationOptions};
use crate::users::Identity;

/// What a protected request needs checked.
#[derive(Clone, Debug, Default)]
pub struct AccessRequest {
    pub context: RequestContext,
    pub token: Option<String>,
    pub rate_limit: Option<RateLimitRule>,
    pub permission: Option<(String, String)>,
    pub resource: Option<Resource>,
    pub require_verified_email: bool,
    pub enforce_password_freshness: bool,
}

impl AccessRequest {
    #[must_use]
    pub fn new(context: RequestContext, token: Option<String>) -> Self {
        Self {
            context,
            token,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn rate_limited(mut self, rule: RateLimitRule) -> Self {
        self.rate_limit = Some(rule);
        self
    }

    #[must_use]
    pub fn permission(mut self, action: impl Into<String>, subject: impl Into<String>) -> Self {
        self.permission = Some((action.into(), subject.into()));
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    #[must_use]
    pub fn verified_email(mut self) -> Self {
        self.require_verified_email = true;
        self
    }

    #[must_use]
    pub fn fresh_password(mut self) -> Self {
        self.enforce_password_freshness = true;
        self
    }
}

/// Everything the pipeline learned on the way to allowing a request.
#[derive(Clone, Debug)]
pub struct Authorized {
    pub token: TokenIdentity,
    pub identity: Identity,
    pub rate_limit: Option<RateLimitOutcome>,
    pub password: Option<PasswordExpirationStatus>,
}

impl Authorized {
    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor::from(&self.identity)
    }
}

impl Gatehouse {
    /// Request pipeline: rate limit, token, identity, permission, password.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store, the permission store or the audit
    /// log (grace logins) fails.
    #[instrument(skip_all, fields(path = %request.context.path))]
    pub async fn authorize(&self, request: &AccessRequest) -> Result<Decision<Authorized>> {
        let client = &request.context.client;

        let rate_limit = match &request.rate_limit {
            Some(rule) => match self.rate_limiter.check_request(&request.context, rule).await {
                Decision::Allow(outcome) => Some(outcome),
                Decision::Deny(denial) => return Ok(Decision::Deny(denial)),
            },
            None => None,
        };

        let token = request.token.as_deref().unwrap_or_default();
        let token = match self
            .tokens
            .validate(token, &ValidationOptions::default(), client)
            .await
        {
            Decision::Allow(identity) => identity,
            Decision::Deny(denial) => return Ok(Decision::Deny(denial)),
        };

        let Some(identity) = self.users.find_by_id(token.subject_id).await? else {
            debug!(subject = %token.subject_id, "token subject not found");
            return Ok(Decision::deny(DenyReason::UnknownSubject));
        };

        if request.require_verified_email && !identity.email_verified {
            return Ok(Decision::deny(DenyReason::EmailVerificationRequired));
        }

        if let Some((action, subject)) = &request.permission {
            let decision = self
                .permissions
                .has_permission(
                    &Actor::from(&identity),
                    action,
                    subject,
                    request.resource.as_ref(),
                    client,
                )
                .await?;
            if let Decision::Deny(denial) = decision {
                return Ok(Decision::Deny(denial));
            }
        }

        let password = if request.enforce_password_freshness {
            match self
                .passwords
                .enforce_freshness(identity.user_id, client)
                .await?
            {
                Decision::Allow(status) => Some(status),
                Decision::Deny(denial) => return Ok(Decision::Deny(denial)),
            }
        } else {
            None
        };

        Ok(Decision::Allow(Authorized {
            token,
            identity,
            rate_limit,
            password,
        }))
    }
}
