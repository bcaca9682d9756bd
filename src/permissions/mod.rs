//! Role and per-user permission evaluation.
//!
//! ## Flow Overview
//! 1) Elevated roles are granted without looking anything up.
//! 2) The most specific user override covering the pair decides alone when
//!    it is a revoke or names the exact pair.
//! 3) Otherwise wildcard user grants are tried alongside role permissions,
//!    most specific first; the first whose conditions pass grants.
//! 4) Conditions run predicate, then organization scope, then ownership
//!    scope.
//!
//! Every check is written to the audit log, granted or not. Permission rows
//! come from the user store, so lookup errors fail the check closed and are
//! audited as `store_unavailable`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::audit::{self, AuditEvent, AuditEventType, AuditLog, ClientInfo};
use crate::clock::Clock;
use crate::decision::{Decision, DenyReason};
use crate::error::Result;
use crate::users::UserStoreError;

mod memory;
mod model;

pub use memory::MemoryPermissionStore;
pub use model::{
    ACTION_MANAGE, Actor, Condition, Permission, Predicate, Resource, Role, SUBJECT_ALL,
    UserPermission,
};

const DEFAULT_ELEVATED_ROLE: &str = "admin";
const STORE_UNAVAILABLE: &str = "store_unavailable";

/// Why a permission check failed. Logged and audited, never shown to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionDenial {
    PredicateFailed,
    OrganizationMismatch,
    OwnershipMismatch,
    ResourceRequired,
    NoMatchingPermission,
    PermissionRevoked,
}

impl PermissionDenial {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::PredicateFailed => "predicate_failed",
            Self::OrganizationMismatch => "organization_mismatch",
            Self::OwnershipMismatch => "ownership_mismatch",
            Self::ResourceRequired => "resource_required",
            Self::NoMatchingPermission => "no_matching_permission",
            Self::PermissionRevoked => "permission_revoked",
        }
    }
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn role_permissions(&self, role: &str) -> Result<Vec<Permission>, UserStoreError>;

    async fn user_permissions(&self, user_id: Uuid) -> Result<Vec<UserPermission>, UserStoreError>;
}

#[derive(Clone, Debug)]
pub struct PermissionConfig {
    elevated_roles: Vec<String>,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            elevated_roles: vec![DEFAULT_ELEVATED_ROLE.to_string()],
        }
    }
}

impl PermissionConfig {
    #[must_use]
    pub fn with_elevated_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elevated_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn is_elevated(&self, role: &str) -> bool {
        self.elevated_roles.iter().any(|elevated| elevated == role)
    }
}

pub struct PermissionEvaluator {
    config: PermissionConfig,
    store: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl PermissionEvaluator {
    #[must_use]
    pub fn new(
        config: PermissionConfig,
        store: Arc<dyn PermissionStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    /// # Errors
    ///
    /// Returns an error if permission rows cannot be loaded.
    #[instrument(skip(self, actor, resource, client), fields(user_id = %actor.user_id))]
    pub async fn has_permission(
        &self,
        actor: &Actor,
        action: &str,
        subject: &str,
        resource: Option<&Resource>,
        client: &ClientInfo,
    ) -> Result<Decision> {
        let outcome = if self.config.is_elevated(&actor.role) {
            Ok(())
        } else {
            match self.evaluate(actor, action, subject, resource).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.write_event(
                        actor,
                        action,
                        subject,
                        resource,
                        client,
                        Some(STORE_UNAVAILABLE),
                    )
                    .await;
                    return Err(err);
                }
            }
        };
        self.record(actor, action, subject, resource, client, outcome)
            .await;
        Ok(into_decision(outcome))
    }

    /// Granted only if every pair is; the first failing pair is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if permission rows cannot be loaded.
    pub async fn has_all_permissions(
        &self,
        actor: &Actor,
        pairs: &[(&str, &str)],
        resource: Option<&Resource>,
        client: &ClientInfo,
    ) -> Result<Decision> {
        if self.config.is_elevated(&actor.role) {
            for (action, subject) in pairs {
                self.record(actor, action, subject, resource, client, Ok(()))
                    .await;
            }
            return Ok(Decision::allow());
        }
        for (action, subject) in pairs {
            let decision = self
                .has_permission(actor, action, subject, resource, client)
                .await?;
            if decision.is_denied() {
                return Ok(decision);
            }
        }
        Ok(Decision::allow())
    }

    /// Granted on the first pair that is; otherwise the first denial.
    ///
    /// # Errors
    ///
    /// Returns an error if permission rows cannot be loaded.
    pub async fn has_any_permission(
        &self,
        actor: &Actor,
        pairs: &[(&str, &str)],
        resource: Option<&Resource>,
        client: &ClientInfo,
    ) -> Result<Decision> {
        if self.config.is_elevated(&actor.role)
            && let Some((action, subject)) = pairs.first()
        {
            self.record(actor, action, subject, resource, client, Ok(()))
                .await;
            return Ok(Decision::allow());
        }
        let mut first_denial = None;
        for (action, subject) in pairs {
            let decision = self
                .has_permission(actor, action, subject, resource, client)
                .await?;
            if decision.is_allowed() {
                return Ok(decision);
            }
            if first_denial.is_none() {
                first_denial = Some(decision);
            }
        }
        Ok(first_denial.unwrap_or_else(|| {
            Decision::deny(DenyReason::Permission(
                PermissionDenial::NoMatchingPermission,
            ))
        }))
    }

    /// Owners always reach their own resources; anyone else needs a
    /// permission whose conditions accept the owner.
    ///
    /// # Errors
    ///
    /// Returns an error if permission rows cannot be loaded.
    pub async fn can_access_own_resource(
        &self,
        actor: &Actor,
        action: &str,
        subject: &str,
        owner_id: Uuid,
        client: &ClientInfo,
    ) -> Result<Decision> {
        let resource = Resource::owned_by(owner_id);
        if actor.user_id == owner_id {
            self.record(actor, action, subject, Some(&resource), client, Ok(()))
                .await;
            return Ok(Decision::allow());
        }
        self.has_permission(actor, action, subject, Some(&resource), client)
            .await
    }

    async fn evaluate(
        &self,
        actor: &Actor,
        action: &str,
        subject: &str,
        resource: Option<&Resource>,
    ) -> Result<Result<(), PermissionDenial>> {
        let now = self.clock.now();
        let overrides = self.store.user_permissions(actor.user_id).await?;
        let direct = overrides
            .iter()
            .filter(|entry| entry.is_active_at(now))
            .filter(|entry| model::covers(&entry.action, &entry.subject, action, subject))
            .min_by_key(|entry| model::specificity(&entry.action, &entry.subject));

        if let Some(entry) = direct {
            if !entry.granted {
                return Ok(Err(PermissionDenial::PermissionRevoked));
            }
            if entry.action == action && entry.subject == subject {
                return Ok(model::evaluate_conditions(&entry.conditions, actor, resource));
            }
        }

        let wildcard_grants = overrides
            .iter()
            .filter(|entry| entry.granted && entry.is_active_at(now))
            .filter(|entry| model::covers(&entry.action, &entry.subject, action, subject))
            .map(|entry| {
                (
                    model::specificity(&entry.action, &entry.subject),
                    entry.conditions.clone(),
                )
            });
        let role_grants = self
            .store
            .role_permissions(&actor.role)
            .await?
            .into_iter()
            .filter(|permission| {
                model::covers(&permission.action, &permission.subject, action, subject)
            })
            .map(|permission| {
                (
                    model::specificity(&permission.action, &permission.subject),
                    permission.conditions,
                )
            });
        // Stable sort keeps user grants ahead of role grants at equal specificity.
        let mut candidates: Vec<(u8, Vec<Condition>)> =
            wildcard_grants.chain(role_grants).collect();
        candidates.sort_by_key(|(specificity, _)| *specificity);

        let mut first_failure = None;
        for (_, conditions) in &candidates {
            match model::evaluate_conditions(conditions, actor, resource) {
                Ok(()) => return Ok(Ok(())),
                Err(denial) if first_failure.is_none() => first_failure = Some(denial),
                Err(_) => {}
            }
        }
        Ok(Err(
            first_failure.unwrap_or(PermissionDenial::NoMatchingPermission)
        ))
    }

    async fn record(
        &self,
        actor: &Actor,
        action: &str,
        subject: &str,
        resource: Option<&Resource>,
        client: &ClientInfo,
        outcome: Result<(), PermissionDenial>,
    ) {
        let reason = outcome.err().map(PermissionDenial::code);
        self.write_event(actor, action, subject, resource, client, reason)
            .await;
    }

    async fn write_event(
        &self,
        actor: &Actor,
        action: &str,
        subject: &str,
        resource: Option<&Resource>,
        client: &ClientInfo,
        reason: Option<&'static str>,
    ) {
        let granted = reason.is_none();
        let event_type = if granted {
            AuditEventType::PermissionGranted
        } else {
            AuditEventType::PermissionDenied
        };
        let mut event = AuditEvent::new(event_type, self.clock.now())
            .user(actor.user_id)
            .client(client)
            .detail("role", actor.role.clone())
            .detail("action", action)
            .detail("subject", subject)
            .detail("resource_id", resource.and_then(|r| r.id.clone()))
            .detail("granted", granted);
        if let Some(reason) = reason {
            debug!(action, subject, reason, "permission denied");
            event = event.detail("reason", reason);
        }
        audit::emit(self.audit.as_ref(), event).await;
    }
}

fn into_decision(outcome: Result<(), PermissionDenial>) -> Decision {
    match outcome {
        Ok(()) => Decision::allow(),
        Err(denial) => Decision::deny(DenyReason::Permission(denial)),
    }
}
