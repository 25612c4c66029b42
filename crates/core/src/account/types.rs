use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{AccountId, OrderId};

/// Account role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Privileged roles do not spend quota.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The single free-text prompt an account may have outstanding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingAction {
    /// Next free-text input is the domain for this order.
    AwaitDomain { order_id: OrderId },
    /// Next free-text input is a domain whose status should be shown.
    AwaitStatusDomain,
}

impl PendingAction {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PendingAction::AwaitDomain { .. } => "await_domain",
            PendingAction::AwaitStatusDomain => "await_status_domain",
        }
    }

    pub(crate) fn order_id(&self) -> Option<OrderId> {
        match self {
            PendingAction::AwaitDomain { order_id } => Some(*order_id),
            PendingAction::AwaitStatusDomain => None,
        }
    }

    pub(crate) fn from_columns(kind: Option<&str>, order_id: Option<OrderId>) -> Option<Self> {
        match (kind?, order_id) {
            ("await_domain", Some(order_id)) => Some(PendingAction::AwaitDomain { order_id }),
            ("await_status_domain", _) => Some(PendingAction::AwaitStatusDomain),
            _ => None,
        }
    }
}

/// An account that can own certificate orders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: AccountId,
    /// Identifier on the chat side (user id, handle, ...).
    pub external_id: String,
    pub username: Option<String>,
    pub role: Role,
    /// Remaining issuance quota (ignored for privileged roles).
    pub quota: u32,
    pub banned: bool,
    pub pending_action: Option<PendingAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Returns true if creating an order needs one unit of quota.
    pub fn pays_quota(&self) -> bool {
        !self.role.is_privileged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_privileges() {
        assert!(Role::Owner.is_privileged());
        assert!(Role::Admin.is_privileged());
        assert!(!Role::User.is_privileged());
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_pending_action_columns() {
        let action = PendingAction::AwaitDomain { order_id: 9 };
        assert_eq!(
            PendingAction::from_columns(Some(action.kind()), action.order_id()),
            Some(action)
        );
        assert_eq!(
            PendingAction::from_columns(Some("await_status_domain"), None),
            Some(PendingAction::AwaitStatusDomain)
        );
        // An await_domain row without its order id is treated as empty.
        assert_eq!(PendingAction::from_columns(Some("await_domain"), None), None);
        assert_eq!(PendingAction::from_columns(None, Some(3)), None);
    }
}
