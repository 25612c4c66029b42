//! Compact action tokens carried by chat buttons, decoded once at the boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{CertType, OrderId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("Empty action token")]
    Empty,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Action '{action}' expects {expected}")]
    BadArguments {
        action: String,
        expected: &'static str,
    },

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("{0}")]
    InvalidCertType(String),
}

/// An operation requested on an order (or on the order list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrderAction {
    SetType {
        order_id: OrderId,
        cert_type: CertType,
    },
    Verify { order_id: OrderId },
    RetryChallenge { order_id: OrderId },
    Status { order_id: OrderId },
    Cancel { order_id: OrderId },
    Reinstall { order_id: OrderId },
    Download { order_id: OrderId },
    ListOrders { page: u32 },
}

impl OrderAction {
    pub fn order_id(&self) -> Option<OrderId> {
        match *self {
            OrderAction::SetType { order_id, .. }
            | OrderAction::Verify { order_id }
            | OrderAction::RetryChallenge { order_id }
            | OrderAction::Status { order_id }
            | OrderAction::Cancel { order_id }
            | OrderAction::Reinstall { order_id }
            | OrderAction::Download { order_id } => Some(order_id),
            OrderAction::ListOrders { .. } => None,
        }
    }
}

fn parse_number<T: FromStr>(value: &str) -> Result<T, ActionParseError> {
    value
        .parse()
        .map_err(|_| ActionParseError::InvalidNumber(value.to_string()))
}

impl FromStr for OrderAction {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.is_empty() {
            return Err(ActionParseError::Empty);
        }

        let parts: Vec<&str> = token.split(':').collect();
        let bad = |expected| ActionParseError::BadArguments {
            action: parts[0].to_string(),
            expected,
        };

        match parts.as_slice() {
            ["type", cert_type, id] => Ok(OrderAction::SetType {
                order_id: parse_number(id)?,
                cert_type: cert_type
                    .parse()
                    .map_err(ActionParseError::InvalidCertType)?,
            }),
            ["type", ..] => Err(bad("type:<single|wildcard>:<order id>")),
            ["orders", page] => Ok(OrderAction::ListOrders {
                page: parse_number(page)?,
            }),
            ["orders"] => Ok(OrderAction::ListOrders { page: 1 }),
            [action, id] => {
                let order_id = parse_number(id)?;
                match *action {
                    "verify" => Ok(OrderAction::Verify { order_id }),
                    "retry" => Ok(OrderAction::RetryChallenge { order_id }),
                    "status" => Ok(OrderAction::Status { order_id }),
                    "cancel" => Ok(OrderAction::Cancel { order_id }),
                    "reinstall" => Ok(OrderAction::Reinstall { order_id }),
                    "download" => Ok(OrderAction::Download { order_id }),
                    other => Err(ActionParseError::UnknownAction(other.to_string())),
                }
            }
            ["verify" | "retry" | "status" | "cancel" | "reinstall" | "download", ..] => {
                Err(bad("<action>:<order id>"))
            }
            [other, ..] => Err(ActionParseError::UnknownAction(other.to_string())),
            [] => Err(ActionParseError::Empty),
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::SetType {
                order_id,
                cert_type,
            } => write!(f, "type:{}:{}", cert_type, order_id),
            OrderAction::Verify { order_id } => write!(f, "verify:{}", order_id),
            OrderAction::RetryChallenge { order_id } => write!(f, "retry:{}", order_id),
            OrderAction::Status { order_id } => write!(f, "status:{}", order_id),
            OrderAction::Cancel { order_id } => write!(f, "cancel:{}", order_id),
            OrderAction::Reinstall { order_id } => write!(f, "reinstall:{}", order_id),
            OrderAction::Download { order_id } => write!(f, "download:{}", order_id),
            OrderAction::ListOrders { page } => write!(f, "orders:{}", page),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        assert_eq!(
            "type:wildcard:12".parse::<OrderAction>().unwrap(),
            OrderAction::SetType {
                order_id: 12,
                cert_type: CertType::Wildcard
            }
        );
        assert_eq!(
            "type:root:3".parse::<OrderAction>().unwrap(),
            OrderAction::SetType {
                order_id: 3,
                cert_type: CertType::Single
            }
        );
        assert_eq!(
            " retry:7 ".parse::<OrderAction>().unwrap(),
            OrderAction::RetryChallenge { order_id: 7 }
        );
        assert_eq!(
            "orders".parse::<OrderAction>().unwrap(),
            OrderAction::ListOrders { page: 1 }
        );
    }

    #[test]
    fn test_display_is_parseable() {
        let actions = [
            OrderAction::SetType {
                order_id: 1,
                cert_type: CertType::Single,
            },
            OrderAction::Cancel { order_id: 2 },
            OrderAction::Download { order_id: 3 },
            OrderAction::ListOrders { page: 4 },
        ];
        for action in actions {
            assert_eq!(action.to_string().parse::<OrderAction>().unwrap(), action);
        }
        assert_eq!(OrderAction::Verify { order_id: 9 }.to_string(), "verify:9");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<OrderAction>(), Err(ActionParseError::Empty));
        assert_eq!(
            "launch:1".parse::<OrderAction>(),
            Err(ActionParseError::UnknownAction("launch".to_string()))
        );
        assert_eq!(
            "verify:abc".parse::<OrderAction>(),
            Err(ActionParseError::InvalidNumber("abc".to_string()))
        );
        assert!(matches!(
            "verify".parse::<OrderAction>(),
            Err(ActionParseError::BadArguments { .. })
        ));
        assert!(matches!(
            "type:ecdsa:1".parse::<OrderAction>(),
            Err(ActionParseError::InvalidCertType(_))
        ));
        assert!(matches!(
            "type:single".parse::<OrderAction>(),
            Err(ActionParseError::BadArguments { .. })
        ));
    }
}
