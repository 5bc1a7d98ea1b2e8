//! Registered actors and the authorization guard every request passes
use crate::error::EngineError;
use crate::ledger::{Ledger, Table};
use crate::types::{Role, TimeStamp, UserId};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: UserId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub kyc_verified: bool,
    #[n(4)]
    pub active: bool,
    #[n(5)]
    pub home_state: String,
    #[n(6)]
    pub created_at: TimeStamp,
}

impl User {
    pub fn new(id: UserId, name: String, role: Role, home_state: String) -> Self {
        Self {
            id,
            name,
            role,
            kyc_verified: false,
            active: true,
            home_state,
            created_at: TimeStamp::now(),
        }
    }
}

/// Identity and role vouched for by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Actor::new(user.id.clone(), user.role)
    }
}

/// Resolves `actor` against the stored user and checks it may act in one of
/// `allowed` roles. The stored role wins over whatever the caller claims.
pub(crate) fn authorize(
    ledger: &Ledger,
    actor: &Actor,
    allowed: &[Role],
) -> Result<User, EngineError> {
    let Some(user) = ledger.get::<User>(Table::Users, actor.user_id.as_bytes())? else {
        return Err(EngineError::forbidden(format!("unknown actor {}", actor.user_id)));
    };
    if !user.active {
        return Err(EngineError::forbidden(format!("account {} is deactivated", user.id)));
    }
    if user.role != actor.role {
        return Err(EngineError::forbidden(format!(
            "actor claims role {} but is registered as {}",
            actor.role, user.role
        )));
    }
    if !allowed.contains(&user.role) {
        return Err(EngineError::forbidden(format!(
            "role {} may not perform this action",
            user.role
        )));
    }
    Ok(user)
}

/// Inspectors working in `region`, or every active inspector when none do.
pub fn match_inspectors(inspectors: Vec<User>, region: Option<&str>) -> Vec<User> {
    let active: Vec<User> = inspectors
        .into_iter()
        .filter(|u| u.role == Role::Inspector && u.active)
        .collect();

    let Some(region) = region else {
        return active;
    };
    let local: Vec<User> = active
        .iter()
        .filter(|u| u.home_state.eq_ignore_ascii_case(region))
        .cloned()
        .collect();

    if local.is_empty() { active } else { local }
}
