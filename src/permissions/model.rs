use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::PermissionDenial;
use crate::users::Identity;

/// Action that matches every action.
pub const ACTION_MANAGE: &str = "manage";
/// Subject that matches every subject.
pub const SUBJECT_ALL: &str = "all";

/// The user a permission check is made for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: String,
    pub organization_id: Option<Uuid>,
}

impl Actor {
    #[must_use]
    pub fn new(user_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
            organization_id: None,
        }
    }

    #[must_use]
    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }
}

impl From<&Identity> for Actor {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id,
            role: identity.role.clone(),
            organization_id: identity.organization_id,
        }
    }
}

/// The object being acted on, when there is one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    pub id: Option<String>,
    pub organization_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

impl Resource {
    #[must_use]
    pub fn owned_by(owner_id: Uuid) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }
}

type PredicateFn = dyn Fn(&Actor, Option<&Resource>) -> bool + Send + Sync;

/// Named dynamic check attached to a permission.
#[derive(Clone)]
pub struct Predicate {
    name: String,
    check: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Actor, Option<&Resource>) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish()
    }
}

#[derive(Clone, Debug)]
pub enum Condition {
    Predicate(Predicate),
    /// The resource must belong to this organization.
    OrganizationScope(Uuid),
    /// The resource must be owned by this user, or by the actor when `None`
    /// or when the actor is the owner.
    OwnershipScope(Option<Uuid>),
}

impl Condition {
    fn rank(&self) -> u8 {
        match self {
            Self::Predicate(_) => 0,
            Self::OrganizationScope(_) => 1,
            Self::OwnershipScope(_) => 2,
        }
    }

    fn check(&self, actor: &Actor, resource: Option<&Resource>) -> Result<(), PermissionDenial> {
        match self {
            Self::Predicate(predicate) => {
                if (predicate.check)(actor, resource) {
                    Ok(())
                } else {
                    Err(PermissionDenial::PredicateFailed)
                }
            }
            Self::OrganizationScope(organization_id) => {
                let resource = resource.ok_or(PermissionDenial::ResourceRequired)?;
                if resource.organization_id == Some(*organization_id) {
                    Ok(())
                } else {
                    Err(PermissionDenial::OrganizationMismatch)
                }
            }
            Self::OwnershipScope(bound_user) => {
                let resource = resource.ok_or(PermissionDenial::ResourceRequired)?;
                let owner = resource.owner_id;
                let bound_match = bound_user.is_some() && owner == *bound_user;
                if bound_match || owner == Some(actor.user_id) {
                    Ok(())
                } else {
                    Err(PermissionDenial::OwnershipMismatch)
                }
            }
        }
    }
}

/// Evaluate conditions predicate first, then organization, then ownership,
/// whatever order they were attached in.
pub(super) fn evaluate_conditions(
    conditions: &[Condition],
    actor: &Actor,
    resource: Option<&Resource>,
) -> Result<(), PermissionDenial> {
    let mut ordered: Vec<&Condition> = conditions.iter().collect();
    ordered.sort_by_key(|condition| condition.rank());
    ordered
        .into_iter()
        .try_for_each(|condition| condition.check(actor, resource))
}

/// `(action, subject)` coverage with the `manage`/`all` wildcards.
pub(super) fn covers(action: &str, subject: &str, wanted_action: &str, wanted_subject: &str) -> bool {
    (action == wanted_action || action == ACTION_MANAGE)
        && (subject == wanted_subject || subject == SUBJECT_ALL)
}

/// Lower is more specific.
pub(super) fn specificity(action: &str, subject: &str) -> u8 {
    u8::from(action == ACTION_MANAGE) + u8::from(subject == SUBJECT_ALL)
}

#[derive(Clone, Debug)]
pub struct Permission {
    pub id: Uuid,
    pub action: String,
    pub subject: String,
    pub conditions: Vec<Condition>,
}

impl Permission {
    #[must_use]
    pub fn new(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            action: action.into(),
            subject: subject.into(),
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[derive(Clone, Debug)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<Permission>,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }
}

/// Direct per-user grant or revoke. Replaces role permissions for the exact
/// pair; wildcard grants are tried alongside them.
#[derive(Clone, Debug)]
pub struct UserPermission {
    pub action: String,
    pub subject: String,
    pub granted: bool,
    pub conditions: Vec<Condition>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserPermission {
    #[must_use]
    pub fn grant(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: subject.into(),
            granted: true,
            conditions: Vec::new(),
            expires_at: None,
        }
    }

    #[must_use]
    pub fn revoke(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            granted: false,
            ..Self::grant(action, subject)
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}
