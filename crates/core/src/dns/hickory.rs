use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{ResolveError, Resolver, TokioResolver};

use super::{DnsError, TxtResolver};
use crate::config::DnsConfig;

/// TXT resolver backed by hickory.
pub struct HickoryTxtResolver {
    resolver: TokioResolver,
    timeout: Duration,
}

impl HickoryTxtResolver {
    pub fn new(config: &DnsConfig) -> Self {
        let resolver_config = if config.nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut resolver_config = ResolverConfig::new();
            for ip in &config.nameservers {
                resolver_config
                    .add_name_server(NameServerConfig::new(SocketAddr::new(*ip, 53), Protocol::Udp));
            }
            resolver_config
        };

        let timeout = Duration::from_secs(config.timeout_secs);
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;
        // Every verification must see a fresh answer.
        opts.cache_size = 0;

        let resolver =
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Self { resolver, timeout }
    }

    /// Lookup errors that just mean "nothing published yet".
    fn is_absent(error: &ResolveError) -> bool {
        error.is_no_records_found() || error.is_nx_domain()
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, DnsError> {
        // Outer bound covers every attempt against every nameserver.
        let budget = self.timeout * 3;
        let lookup = tokio::time::timeout(budget, self.resolver.txt_lookup(host))
            .await
            .map_err(|_| DnsError::Timeout {
                host: host.to_string(),
            })?;

        match lookup {
            Ok(records) => {
                let values: Vec<String> = records
                    .iter()
                    .map(|record| {
                        // A TXT record may be split into several strings.
                        record
                            .txt_data()
                            .iter()
                            .map(|data| String::from_utf8_lossy(data))
                            .collect::<String>()
                    })
                    .collect();
                tracing::debug!(host, records = values.len(), "TXT lookup answered");
                Ok(values)
            }
            Err(e) if Self::is_absent(&e) => {
                tracing::debug!(host, "TXT record not published yet");
                Ok(Vec::new())
            }
            Err(e) => Err(DnsError::Lookup {
                host: host.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
