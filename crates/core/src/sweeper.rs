//! Periodic pass that advances orders nobody is driving interactively.
//!
//! Three stages run one after another (dns, issue, install). Within a stage
//! orders are handled concurrently up to `max_concurrency`, each through the
//! same engine entry points (and therefore the same cooldown lease) an
//! interactive caller would use.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::config::SweepConfig;
use crate::lifecycle::{LifecycleEngine, LifecycleError, Outcome};
use crate::order::{CertOrder, OrderError, OrderFilter, OrderStatus};

/// Counters for one stage of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCount {
    /// Orders the stage advanced (or checked) without a failure.
    pub processed: u32,
    /// Orders whose tool call or bookkeeping failed.
    pub failed: u32,
    /// Orders left alone: cooling down or out of retries.
    pub skipped: u32,
}

impl StageCount {
    fn record(&mut self, result: &Result<Outcome, LifecycleError>) {
        match result {
            Ok(Outcome::CoolingDown { .. } | Outcome::RetryLimitReached { .. }) => {
                self.skipped += 1
            }
            Ok(outcome) if outcome.is_failure() => self.failed += 1,
            Ok(_) => self.processed += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Result of one full sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dns: StageCount,
    pub issue: StageCount,
    pub install: StageCount,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Dns,
    Issue,
    Install,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Dns => "dns",
            Stage::Issue => "issue",
            Stage::Install => "install",
        }
    }
}

pub struct BatchSweeper {
    engine: Arc<LifecycleEngine>,
    config: SweepConfig,
    audit: Option<AuditHandle>,
}

impl BatchSweeper {
    pub fn new(engine: Arc<LifecycleEngine>, config: SweepConfig, audit: Option<AuditHandle>) -> Self {
        Self {
            engine,
            config,
            audit,
        }
    }

    /// Run the three stages once.
    ///
    /// Per-order failures are recorded on the order and counted; only a
    /// failure to list a stage's orders aborts the sweep.
    pub async fn run_once(&self) -> Result<SweepReport, OrderError> {
        let started = Instant::now();

        let dns = self
            .run_stage(Stage::Dns, self.dns_filter(), |order| async move {
                self.engine.drive_challenge(&order).await
            })
            .await?;
        let issue = self
            .run_stage(Stage::Issue, self.issue_filter(), |order| async move {
                self.engine.drive_verification(&order).await
            })
            .await?;
        let install = self
            .run_stage(Stage::Install, self.install_filter(), |order| async move {
                self.engine.drive_install(&order).await
            })
            .await?;

        let report = SweepReport { dns, issue, install };
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            dns = report.dns.processed,
            issue = report.issue.processed,
            install = report.install.processed,
            failed = report.dns.failed + report.issue.failed + report.install.failed,
            duration_ms,
            "Sweep completed"
        );

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::SweepCompleted {
                    dns_processed: report.dns.processed,
                    dns_failed: report.dns.failed,
                    issue_processed: report.issue.processed,
                    issue_failed: report.issue.failed,
                    install_processed: report.install.processed,
                    install_failed: report.install.failed,
                    duration_ms,
                })
                .await;
        }

        Ok(report)
    }

    /// Sweep every `interval_secs` until `shutdown` fires.
    pub async fn run_until(&self, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(interval_secs = self.config.interval_secs, "Sweep loop started");
        loop {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Sweep aborted");
            }
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Sweep loop received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Sweep loop stopped");
    }

    fn base_filter(&self) -> OrderFilter {
        OrderFilter::new()
            .unlocked_at(Utc::now())
            .with_attempts_below(self.engine.config().retry_limit)
            .with_limit(self.config.batch_limit)
    }

    fn dns_filter(&self) -> OrderFilter {
        self.base_filter()
            .with_status(OrderStatus::Created)
            .with_status(OrderStatus::Failed)
            .with_needs_challenge(true)
            .ready_for_tool()
    }

    fn issue_filter(&self) -> OrderFilter {
        self.base_filter()
            .with_status(OrderStatus::DnsWait)
            .with_status(OrderStatus::DnsVerified)
            .with_install_pending(false)
    }

    fn install_filter(&self) -> OrderFilter {
        self.base_filter()
            .with_status(OrderStatus::DnsVerified)
            .with_install_pending(true)
    }

    async fn run_stage<'a, F, Fut>(
        &'a self,
        stage: Stage,
        filter: OrderFilter,
        drive: F,
    ) -> Result<StageCount, OrderError>
    where
        F: Fn(CertOrder) -> Fut + 'a,
        Fut: Future<Output = Result<Outcome, LifecycleError>> + 'a,
    {
        let orders = self.engine.orders().list(&filter)?;
        debug!(stage = stage.as_str(), candidates = orders.len(), "Sweep stage");

        let results: Vec<(CertOrder, Result<Outcome, LifecycleError>)> = stream::iter(orders)
            .map(|order| {
                let fut = drive(order.clone());
                async move { (order, fut.await) }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut count = StageCount::default();
        for (order, result) in &results {
            match result {
                Ok(outcome) => debug!(
                    stage = stage.as_str(),
                    order_id = order.id,
                    outcome = outcome.kind(),
                    "Swept order"
                ),
                Err(e) => warn!(
                    stage = stage.as_str(),
                    order_id = order.id,
                    error = %e,
                    "Sweep failed for order"
                ),
            }
            count.record(result);
        }
        Ok(count)
    }
}
