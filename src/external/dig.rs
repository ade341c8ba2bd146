//! dig delegation for DNS answers with TTLs

use super::run_tool;
use crate::config::EngineConfig;
use crate::network::dns::{DnsRecord, RecordSource};
use crate::utils::find_executable;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Dig {
    program: String,
    deadline: Duration,
}

impl Dig {
    pub fn new(program: impl Into<String>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            deadline,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.dig_path.clone(), config.dns_timeout_duration())
    }

    pub fn is_available(&self) -> bool {
        find_executable(&self.program).is_some()
    }

    /// Answer section for one record type; `Ok(None)` if cancelled
    pub async fn query(
        &self,
        hostname: &str,
        record_type: &str,
        cancel: &CancellationToken,
    ) -> crate::Result<Option<Vec<DnsRecord>>> {
        let args = vec![
            "+noall".to_string(),
            "+answer".to_string(),
            hostname.to_string(),
            record_type.to_string(),
        ];

        let Some(output) = run_tool(&self.program, &args, self.deadline, cancel).await? else {
            return Ok(None);
        };
        if !output.success {
            log::warn!("dig {} {} failed: {}", hostname, record_type, output.stderr.trim());
        }
        Ok(Some(parse_dig_answer(&output.stdout)))
    }
}

/// Parse `dig +noall +answer` lines: `name ttl class type value...`
pub fn parse_dig_answer(output: &str) -> Vec<DnsRecord> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 {
                return None;
            }
            Some(DnsRecord {
                name: parts[0].trim_end_matches('.').to_string(),
                record_type: parts[3].to_string(),
                value: parts[4..].join(" "),
                ttl: parts[1].parse().ok(),
                source: RecordSource::Dig,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScanError;

    #[test]
    fn test_parse_answer_with_cname_chain() {
        let out = "\
; <<>> DiG 9.18.18 <<>> +noall +answer www.example.org A
www.example.org.\t300\tIN\tCNAME\tedge.example.net.
edge.example.net.\t60\tIN\tA\t203.0.113.10
edge.example.net.\t60\tIN\tA\t203.0.113.11
";
        let records = parse_dig_answer(out);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].name, "www.example.org");
        assert_eq!(records[0].record_type, "CNAME");
        assert_eq!(records[0].value, "edge.example.net.");
        assert_eq!(records[0].ttl, Some(300));

        assert_eq!(records[2].record_type, "A");
        assert_eq!(records[2].value, "203.0.113.11");
        assert_eq!(records[2].source, RecordSource::Dig);
    }

    #[test]
    fn test_parse_skips_short_and_blank_lines() {
        let out = "\n;; connection timed out; no servers could be reached\nbroken line\n";
        assert!(parse_dig_answer(out).is_empty());
    }

    #[tokio::test]
    async fn test_missing_dig_is_unavailable() {
        let dig = Dig::new("/nonexistent/dig", Duration::from_secs(1));
        assert!(!dig.is_available());
        let result = dig.query("localhost", "A", &CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::ToolUnavailable(_))));
    }
}
