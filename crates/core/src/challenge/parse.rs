//! Extraction of DNS-01 challenge material from ACME client output.

use regex_lite::Regex;

use crate::order::DnsChallenge;

const CHALLENGE_PREFIX: &str = "_acme-challenge.";

/// Record name for a host that may or may not already carry the challenge label.
pub fn challenge_host(name: &str) -> String {
    let name = name.trim().trim_end_matches('.').trim_start_matches("*.");
    if name.starts_with(CHALLENGE_PREFIX) {
        name.to_string()
    } else {
        format!("{}{}", CHALLENGE_PREFIX, name)
    }
}

fn push_value(value: &str, values: &mut Vec<String>) {
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"');
    if !value.is_empty() && !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Parses manual-mode output such as
///
/// ```text
/// [..] Domain: '_acme-challenge.example.com'
/// [..] TXT value: 'gfj9Xq...Rg85nM'
/// ```
///
/// The first domain marker names the host; every TXT value after it is
/// collected, de-duplicated in order of appearance. Returns `None` when no
/// host or no value could be recovered.
pub fn parse_challenge_output(output: &str) -> Option<DnsChallenge> {
    let domain_re = Regex::new(r"(?i)Domain:\s*'([^']+)'").ok()?;
    let value_re = Regex::new(r"(?i)TXT\s+value:\s*'([^']+)'").ok()?;
    let inline_re = Regex::new(r"(_acme-challenge\.\S+)\s+TXT\s+value:\s+(.+)").ok()?;

    let mut host: Option<String> = None;
    let mut values: Vec<String> = Vec::new();
    for line in output.lines() {
        if let Some(caps) = domain_re.captures(line) {
            if host.is_none() {
                host = Some(caps[1].trim().to_string());
            }
            continue;
        }

        if let Some(caps) = value_re.captures(line) {
            push_value(&caps[1], &mut values);
            continue;
        }

        if line.contains(CHALLENGE_PREFIX) {
            if let Some(caps) = inline_re.captures(line) {
                if host.is_none() {
                    host = Some(caps[1].trim().to_string());
                }
                push_value(&caps[2], &mut values);
            }
        }
    }

    let host = host.filter(|h| !h.is_empty())?;
    if values.is_empty() {
        return None;
    }

    Some(DnsChallenge {
        host: challenge_host(&host),
        values,
    })
}
