//! Port lists and port specification parsing

use crate::error::ScanError;
use std::collections::HashSet;

/// Ports probed when no explicit specification is given
pub const COMMON_PORTS: [u16; 19] = [
    21, 22, 23, 25, 53, 80, 110, 123, 143, 443, 465, 587, 993, 995, 3306, 3389, 5432, 8080, 8443,
];

/// Well-known port -> service name table
pub const WELL_KNOWN_SERVICES: [(u16, &str); 19] = [
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (123, "NTP"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (465, "SMTP/SSL"),
    (587, "SMTP/TLS"),
    (993, "IMAP/SSL"),
    (995, "POP3/SSL"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (8080, "HTTP-ALT"),
    (8443, "HTTPS-ALT"),
];

/// Parse a port specification into a validated, de-duplicated port list.
///
/// Accepts `common` (or an empty string), `start-end`, `a,b,c` and mixtures
/// such as `22,80,8000-8010`. Order of first occurrence is preserved.
pub fn parse_port_spec(spec: &str, common: &[u16]) -> crate::Result<Vec<u16>> {
    let spec = spec.trim();
    if spec.is_empty() || spec.eq_ignore_ascii_case("common") {
        return Ok(common.to_vec());
    }

    let mut ports = Vec::new();
    let mut seen = HashSet::new();

    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(ScanError::PortRangeError(format!("empty entry in '{}'", spec)));
        }

        let (start, end) = match token.split_once('-') {
            Some((start, end)) => (parse_port(start)?, parse_port(end)?),
            None => {
                let port = parse_port(token)?;
                (port, port)
            }
        };

        if start > end {
            return Err(ScanError::PortRangeError(format!(
                "range start {} is greater than end {}",
                start, end
            )));
        }

        for port in start..=end {
            if seen.insert(port) {
                ports.push(port);
            }
        }
    }

    Ok(ports)
}

fn parse_port(s: &str) -> crate::Result<u16> {
    let value: u32 = s
        .trim()
        .parse()
        .map_err(|_| ScanError::PortRangeError(format!("'{}' is not a port number", s.trim())))?;

    if !(1..=65535).contains(&value) {
        return Err(ScanError::PortRangeError(format!("port {} outside 1-65535", value)));
    }

    Ok(value as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_default() {
        assert_eq!(parse_port_spec("", &COMMON_PORTS).unwrap(), COMMON_PORTS.to_vec());
        assert_eq!(parse_port_spec("common", &COMMON_PORTS).unwrap().len(), 19);
    }

    #[test]
    fn test_range_and_list() {
        assert_eq!(parse_port_spec("20-23", &COMMON_PORTS).unwrap(), vec![20, 21, 22, 23]);
        assert_eq!(parse_port_spec("443, 80,22", &COMMON_PORTS).unwrap(), vec![443, 80, 22]);
        assert_eq!(
            parse_port_spec("22,80,79-81", &COMMON_PORTS).unwrap(),
            vec![22, 80, 79, 81]
        );
    }

    #[test]
    fn test_invalid_specs() {
        for spec in ["0", "65536", "80-20", "http", "22,,80", "1-70000", "-5"] {
            assert!(
                matches!(parse_port_spec(spec, &COMMON_PORTS), Err(ScanError::PortRangeError(_))),
                "spec {:?} should be rejected",
                spec
            );
        }
    }

    #[test]
    fn test_table_covers_common_ports() {
        for port in COMMON_PORTS {
            assert!(WELL_KNOWN_SERVICES.iter().any(|(p, _)| *p == port));
        }
    }
}
