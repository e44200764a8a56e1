//! # Actors and Roles
//!
//! The party requesting a transition. Roles are a closed enum so a typo can
//! never silently grant or deny access; every permission decision goes
//! through [`Actor::has_authority`].
//!
//! The scheduler-driven scanner acts as [`Actor::System`]. It carries the
//! authority of a partner, but only for auto-transitions
//! ([`TransitionMode::Auto`]).

use auditflow_core::ActorId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of a human actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Engagement partner. Signs off finalization and close-out.
    Partner,
    /// Engagement manager.
    Manager,
    /// Audit team member.
    Clerk,
    /// Client-side administrator.
    ClientAdmin,
    /// Client-side user.
    ClientUser,
}

impl Role {
    /// Stored identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partner => "partner",
            Self::Manager => "manager",
            Self::Clerk => "clerk",
            Self::ClientAdmin => "client_admin",
            Self::ClientUser => "client_user",
        }
    }

    /// Firm-side seniority. Client roles rank below every firm role.
    fn rank(&self) -> u8 {
        match self {
            Self::Partner => 3,
            Self::Manager => 2,
            Self::Clerk => 1,
            Self::ClientAdmin | Self::ClientUser => 0,
        }
    }

    /// Whether this role meets a required role.
    ///
    /// Firm roles satisfy any requirement at or below their seniority; a
    /// client role satisfies only itself.
    pub fn satisfies(&self, required: Role) -> bool {
        if required.rank() == 0 {
            return *self == required;
        }
        self.rank() >= required.rank()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a role identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role: {0:?}")]
pub struct RoleParseError(pub String);

impl std::str::FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Partner,
            Self::Manager,
            Self::Clerk,
            Self::ClientAdmin,
            Self::ClientUser,
        ]
        .into_iter()
        .find(|role| role.as_str() == s)
        .ok_or_else(|| RoleParseError(s.to_string()))
    }
}

/// How a transition was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    /// Requested by a user.
    Manual,
    /// Driven by the auto-transition scanner.
    Auto,
}

impl std::fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Auto => f.write_str("auto"),
        }
    }
}

/// The party requesting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// A signed-in user.
    User {
        /// User identifier.
        id: ActorId,
        /// Role on the engagement.
        role: Role,
    },
    /// The scheduler.
    System,
}

impl Actor {
    /// A user actor.
    pub fn user(id: ActorId, role: Role) -> Self {
        Self::User { id, role }
    }

    /// The role of a user actor; `None` for the system.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::User { role, .. } => Some(*role),
            Self::System => None,
        }
    }

    /// Identifier of a user actor; `None` for the system.
    pub fn id(&self) -> Option<ActorId> {
        match self {
            Self::User { id, .. } => Some(*id),
            Self::System => None,
        }
    }

    /// Whether this is the scheduler.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// The mode a request from this actor runs in.
    pub fn mode(&self) -> TransitionMode {
        match self {
            Self::User { .. } => TransitionMode::Manual,
            Self::System => TransitionMode::Auto,
        }
    }

    /// Capability check.
    ///
    /// The system actor counts as a partner in `Auto` mode and has no
    /// authority otherwise.
    pub fn has_authority(&self, required: Role, mode: TransitionMode) -> bool {
        match self {
            Self::User { role, .. } => role.satisfies(required),
            Self::System => mode == TransitionMode::Auto && Role::Partner.satisfies(required),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User { id, role } => write!(f, "{id} ({role})"),
            Self::System => f.write_str("system"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> Actor {
        Actor::user(ActorId::new(), role)
    }

    #[test]
    fn test_only_partner_has_partner_authority() {
        assert!(user(Role::Partner).has_authority(Role::Partner, TransitionMode::Manual));
        for role in [Role::Manager, Role::Clerk, Role::ClientAdmin, Role::ClientUser] {
            assert!(
                !user(role).has_authority(Role::Partner, TransitionMode::Manual),
                "{role} must not act as partner"
            );
        }
    }

    #[test]
    fn test_firm_seniority() {
        assert!(Role::Partner.satisfies(Role::Clerk));
        assert!(Role::Manager.satisfies(Role::Manager));
        assert!(!Role::Clerk.satisfies(Role::Manager));
    }

    #[test]
    fn test_client_roles_only_satisfy_themselves() {
        assert!(Role::ClientAdmin.satisfies(Role::ClientAdmin));
        assert!(!Role::ClientUser.satisfies(Role::ClientAdmin));
        assert!(!Role::ClientAdmin.satisfies(Role::Clerk));
    }

    #[test]
    fn test_system_authority_is_scoped_to_auto() {
        assert!(Actor::System.has_authority(Role::Partner, TransitionMode::Auto));
        assert!(!Actor::System.has_authority(Role::Partner, TransitionMode::Manual));
        assert_eq!(Actor::System.mode(), TransitionMode::Auto);
        assert_eq!(user(Role::Partner).mode(), TransitionMode::Manual);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("client_admin".parse::<Role>().unwrap(), Role::ClientAdmin);
        assert!("Partner".parse::<Role>().is_err());
    }

    #[test]
    fn test_actor_serialization_is_tagged() {
        let json = serde_json::to_value(Actor::System).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "system" }));
        let actor = user(Role::Manager);
        let back: Actor = serde_json::from_value(serde_json::to_value(actor).unwrap()).unwrap();
        assert_eq!(back, actor);
    }
}
