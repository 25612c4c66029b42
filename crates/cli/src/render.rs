//! Human-readable output for command results.

use std::fmt::Write;

use certdesk_core::audit::AuditRecord;
use certdesk_core::{
    Account, ActionResponse, ArtifactSet, CertOrder, DownloadLink, OrderPage, Outcome, SweepReport,
};

pub fn sweep(report: &SweepReport) -> String {
    format!(
        "sweep done. dns={} issue={} install={}",
        report.dns.processed, report.issue.processed, report.install.processed
    )
}

pub fn account(account: &Account) -> String {
    let mut out = format!(
        "account #{} {} role={} quota={}",
        account.id, account.external_id, account.role, account.quota
    );
    if let Some(ref name) = account.username {
        let _ = write!(out, " username={}", name);
    }
    if account.banned {
        out.push_str(" BANNED");
    }
    out
}

pub fn order(order: &CertOrder) -> String {
    let mut out = format!(
        "order #{} [{}] {} {}",
        order.id,
        order.status,
        order.cert_type.map(|t| t.as_str()).unwrap_or("-"),
        order.domain.as_deref().unwrap_or("-"),
    );
    if order.attempts > 0 {
        let _ = write!(out, " attempts={}", order.attempts);
    }
    if order.install_pending {
        out.push_str(" install-pending");
    }
    if let Some(ref error) = order.last_error {
        let _ = write!(out, "\n  last error: {}", error);
    }
    out
}

pub fn outcome(outcome: &Outcome) -> String {
    let mut out = order(outcome.order());
    match outcome {
        Outcome::Updated { .. } | Outcome::Cancelled { .. } => {}
        Outcome::ChallengeReady { challenge, .. } => {
            let _ = write!(out, "\nPublish these TXT records at {}:", challenge.host);
            for value in &challenge.values {
                let _ = write!(out, "\n  {}", value);
            }
            out.push_str("\nthen verify once they are visible.");
        }
        Outcome::NotPropagated { .. } => {
            out.push_str("\nTXT records are not visible yet; try again shortly.");
        }
        Outcome::Issued { artifacts, .. } => {
            out.push('\n');
            out.push_str(&artifact_set(artifacts));
        }
        Outcome::InstallPending { error, .. } => {
            let _ = write!(out, "\nIssued but not exported ({}); install will be retried.", error);
        }
        Outcome::Failed { error, .. } => {
            let _ = write!(out, "\nFailed: {}", error);
        }
        Outcome::CoolingDown { retry_after, .. } => {
            let _ = write!(
                out,
                "\nAnother operation is running; retry in {}s.",
                retry_after.as_secs().max(1)
            );
        }
        Outcome::RetryLimitReached { .. } => {
            out.push_str("\nRetry limit reached; open a new order.");
        }
    }
    out
}

pub fn artifact_set(set: &ArtifactSet) -> String {
    let mut out = format!("Exported to {}", set.dir.display());
    for file in &set.files {
        let _ = write!(
            out,
            "\n  {:<14} {:>6} bytes  sha256:{}",
            file.name, file.size_bytes, file.sha256
        );
    }
    out
}

pub fn downloads(links: &[DownloadLink]) -> String {
    links
        .iter()
        .map(|l| format!("{:<14} {}", l.name, l.url))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn page(page: &OrderPage) -> String {
    if page.orders.is_empty() {
        return "No orders.".to_string();
    }
    let mut out = page
        .orders
        .iter()
        .map(order)
        .collect::<Vec<_>>()
        .join("\n");
    let _ = write!(
        out,
        "\npage {}/{} ({} orders)",
        page.page, page.total_pages, page.total
    );
    out
}

pub fn response(response: &ActionResponse) -> String {
    match response {
        ActionResponse::Order(o) => outcome(o),
        ActionResponse::Downloads { order: o, links } => {
            format!("{}\n{}", order(o), downloads(links))
        }
        ActionResponse::Orders(p) => page(p),
    }
}

pub fn audit(records: &[AuditRecord]) -> String {
    if records.is_empty() {
        return "No audit events.".to_string();
    }
    records
        .iter()
        .map(|r| {
            let data = serde_json::to_string(&r.data).unwrap_or_default();
            format!(
                "{} {:<20} order={} {}",
                r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                r.event_type,
                r.order_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                data
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use certdesk_core::{DnsChallenge, OrderStatus, StageCount};
    use chrono::Utc;

    fn sample() -> CertOrder {
        CertOrder {
            id: 3,
            owner_id: 1,
            cert_type: Some(certdesk_core::CertType::Wildcard),
            domain: Some("example.com".to_string()),
            status: OrderStatus::DnsWait,
            needs_challenge: false,
            challenge_host: Some("_acme-challenge.example.com".to_string()),
            challenge_values: vec!["a".to_string(), "b".to_string()],
            last_error: None,
            attempts: 0,
            install_pending: false,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sweep_line() {
        let report = SweepReport {
            dns: StageCount {
                processed: 2,
                ..Default::default()
            },
            issue: StageCount::default(),
            install: StageCount {
                processed: 1,
                failed: 1,
                skipped: 0,
            },
        };
        assert_eq!(sweep(&report), "sweep done. dns=2 issue=0 install=1");
    }

    #[test]
    fn test_challenge_lists_values() {
        let text = outcome(&Outcome::ChallengeReady {
            order: sample(),
            challenge: DnsChallenge {
                host: "_acme-challenge.example.com".to_string(),
                values: vec!["a".to_string(), "b".to_string()],
            },
        });
        assert!(text.starts_with("order #3 [dns_wait] wildcard example.com"));
        assert!(text.contains("_acme-challenge.example.com"));
        assert!(text.contains("\n  a\n  b\n"));
    }

    #[test]
    fn test_empty_page() {
        let text = page(&OrderPage {
            orders: Vec::new(),
            page: 1,
            total_pages: 1,
            total: 0,
        });
        assert_eq!(text, "No orders.");
    }
}
