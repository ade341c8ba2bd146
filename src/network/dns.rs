//! Forward DNS lookups: A/AAAA through the system resolver, with dig
//! answers (TTLs, CNAME chains) taking over each record type it covers

use crate::config::EngineConfig;
use crate::external::Dig;
use crate::utils::target_parser::is_valid_hostname;
use crate::ScanError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Record types asked for on every lookup
pub const RECORD_TYPES: [&str; 2] = ["A", "AAAA"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Resolver,
    Dig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: String,
    pub value: String,
    /// Only known when the answer came from dig
    pub ttl: Option<u32>,
    pub source: RecordSource,
}

impl DnsRecord {
    fn from_address(hostname: &str, address: IpAddr) -> Self {
        Self {
            name: hostname.to_string(),
            record_type: if address.is_ipv4() { "A" } else { "AAAA" }.to_string(),
            value: address.to_string(),
            ttl: None,
            source: RecordSource::Resolver,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsReport {
    pub hostname: String,
    pub records: Vec<DnsRecord>,
}

impl DnsReport {
    /// Addresses named by A/AAAA records, deduplicated
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.records
            .iter()
            .filter(|r| r.record_type == "A" || r.record_type == "AAAA")
            .filter_map(|r| r.value.parse().ok())
            .collect::<BTreeSet<IpAddr>>()
            .into_iter()
            .collect()
    }
}

pub struct DnsLookup {
    timeout: Duration,
    dig: Option<Dig>,
}

impl DnsLookup {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            timeout: config.dns_timeout_duration(),
            dig: Some(Dig::from_config(config)),
        }
    }

    /// Resolver answers only
    pub fn without_dig(mut self) -> Self {
        self.dig = None;
        self
    }

    /// Look up A and AAAA records for `hostname`.
    ///
    /// A name with no records is an empty report, not an error; only an
    /// invalid name is rejected.
    pub async fn lookup(&self, hostname: &str, cancel: &CancellationToken) -> crate::Result<DnsReport> {
        let hostname = hostname.trim().trim_end_matches('.');
        if !is_valid_hostname(hostname) {
            return Err(ScanError::TargetInvalid(format!("'{}' is not a valid hostname", hostname)));
        }

        let mut records = self.resolver_records(hostname).await;

        if let Some(dig) = self.dig.as_ref().filter(|dig| dig.is_available()) {
            for record_type in RECORD_TYPES {
                match dig.query(hostname, record_type, cancel).await {
                    Ok(Some(answers)) => merge_answers(&mut records, record_type, answers),
                    Ok(None) => break,
                    Err(e) => log::debug!("dig {} lookup skipped: {}", record_type, e),
                }
            }
        }

        log::debug!("{} has {} DNS records", hostname, records.len());
        Ok(DnsReport {
            hostname: hostname.to_string(),
            records,
        })
    }

    async fn resolver_records(&self, hostname: &str) -> Vec<DnsRecord> {
        let addresses: BTreeSet<IpAddr> =
            match tokio::time::timeout(self.timeout, tokio::net::lookup_host((hostname, 0))).await {
                Ok(Ok(found)) => found.map(|sa| sa.ip()).collect(),
                Ok(Err(e)) => {
                    log::debug!("Resolver found nothing for {}: {}", hostname, e);
                    BTreeSet::new()
                }
                Err(_) => {
                    log::warn!("Resolving {} timed out", hostname);
                    BTreeSet::new()
                }
            };

        addresses
            .into_iter()
            .map(|address| DnsRecord::from_address(hostname, address))
            .collect()
    }
}

/// Replace the resolver's records of `record_type` with dig's answers,
/// skipping answers already present (a CNAME shows up under both queries).
fn merge_answers(records: &mut Vec<DnsRecord>, record_type: &str, answers: Vec<DnsRecord>) {
    if answers.is_empty() {
        return;
    }
    records.retain(|r| !(r.source == RecordSource::Resolver && r.record_type == record_type));
    for answer in answers {
        let seen = records
            .iter()
            .any(|r| r.name == answer.name && r.record_type == answer.record_type && r.value == answer.value);
        if !seen {
            records.push(answer);
        }
    }
}
