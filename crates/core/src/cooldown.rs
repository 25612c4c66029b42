//! Per-order and per-domain mutual exclusion for tool interactions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::LifecycleConfig;
use crate::order::{CertOrder, OrderError, OrderStore};

/// Time-boxed locks shared by interactive calls and the batch sweep.
///
/// A lease covers one full tool invocation. Both the order row and the
/// order's domain are locked, so two orders for the same domain never
/// drive the ACME client at once.
pub struct CooldownGuard {
    orders: Arc<dyn OrderStore>,
    cooldown: Duration,
    settle: Duration,
}

impl CooldownGuard {
    pub fn new(orders: Arc<dyn OrderStore>, config: &LifecycleConfig) -> Self {
        Self {
            orders,
            cooldown: Duration::seconds(config.cooldown_secs as i64),
            settle: Duration::seconds(config.settle_secs as i64),
        }
    }

    /// Takes the lease if nobody holds it. Returns false without side
    /// effects when the order or its domain is cooling down.
    pub fn try_acquire(&self, order: &CertOrder) -> Result<bool, OrderError> {
        let now = Utc::now();
        let until = now + self.cooldown;

        if !self.orders.try_lock(order.id, now, until)? {
            tracing::debug!(order_id = order.id, "Order is cooling down");
            return Ok(false);
        }

        if let Some(ref domain) = order.domain {
            if !self.orders.try_lock_domain(domain, order.id, now, until)? {
                // Give the order lock back; another order owns the domain.
                self.orders.set_lock(order.id, now)?;
                tracing::debug!(
                    order_id = order.id,
                    domain = %domain,
                    "Domain is locked by another order"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Read-only check on the order as last loaded.
    pub fn is_cooling_down(&self, order: &CertOrder) -> bool {
        order.is_locked_at(Utc::now())
    }

    /// Time left on the order's lock, if any.
    pub fn remaining(&self, order: &CertOrder) -> Option<std::time::Duration> {
        Self::remaining_at(order, Utc::now())
    }

    fn remaining_at(order: &CertOrder, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let until = order.locked_until?;
        (until - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Ends the lease: the order stays damped for the settle window, the
    /// domain is freed immediately.
    pub fn release(&self, order: &CertOrder) -> Result<(), OrderError> {
        let now = Utc::now();
        self.orders.set_lock(order.id, now + self.settle)?;
        if let Some(ref domain) = order.domain {
            self.orders.set_domain_lock(domain, order.id, now)?;
        }
        Ok(())
    }
}
