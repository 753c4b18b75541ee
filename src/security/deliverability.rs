use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::Name;
use hickory_resolver::TokioAsyncResolver;
use std::time::Duration;
use tracing::{debug, warn};

use super::EmailError;

/// Checks that an address's domain can receive mail: an MX record that is
/// not a null MX, or failing that an A/AAAA record.
///
/// Lookups that time out or fail for reasons other than a missing record do
/// not reject the address.
pub struct DeliverabilityChecker {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

enum Lookup<T> {
    Found(T),
    Missing { nxdomain: bool },
    Unknown,
}

impl DeliverabilityChecker {
    pub fn from_system_conf(timeout: Duration) -> Result<Self, ResolveError> {
        Ok(Self {
            resolver: TokioAsyncResolver::tokio_from_system_conf()?,
            timeout,
        })
    }

    pub async fn check(&self, domain: &str) -> Result<(), EmailError> {
        let fqdn = format!("{domain}.");

        let mx = self
            .lookup(domain, "MX", self.resolver.mx_lookup(fqdn.as_str()))
            .await;
        match mx {
            Lookup::Found(records) => {
                let exchanges: Vec<Name> = records.iter().map(|mx| mx.exchange().clone()).collect();
                return if accepts_mail(&exchanges) {
                    Ok(())
                } else {
                    Err(EmailError::Undeliverable(domain.to_string()))
                };
            }
            Lookup::Missing { nxdomain: true } => {
                return Err(EmailError::DomainNotFound(domain.to_string()))
            }
            Lookup::Missing { nxdomain: false } => {}
            Lookup::Unknown => return Ok(()),
        }

        // No MX: the address records act as an implicit MX.
        let ips = self
            .lookup(domain, "A/AAAA", self.resolver.lookup_ip(fqdn.as_str()))
            .await;
        match ips {
            Lookup::Found(ips) if ips.iter().next().is_some() => Ok(()),
            Lookup::Unknown => Ok(()),
            _ => Err(EmailError::Undeliverable(domain.to_string())),
        }
    }

    async fn lookup<T>(
        &self,
        domain: &str,
        record: &'static str,
        query: impl std::future::Future<Output = Result<T, ResolveError>>,
    ) -> Lookup<T> {
        match tokio::time::timeout(self.timeout, query).await {
            Ok(Ok(found)) => Lookup::Found(found),
            Ok(Err(e)) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                    debug!(domain, record, %response_code, "No records found");
                    Lookup::Missing {
                        nxdomain: *response_code == ResponseCode::NXDomain,
                    }
                }
                _ => {
                    warn!(domain, record, error = %e, "Deliverability lookup failed");
                    Lookup::Unknown
                }
            },
            Err(_) => {
                warn!(domain, record, "Deliverability lookup timed out");
                Lookup::Unknown
            }
        }
    }
}

/// False for a null MX (RFC 7505), a single exchange of `.`.
fn accepts_mail(exchanges: &[Name]) -> bool {
    exchanges.iter().any(|exchange| !exchange.is_root())
}
