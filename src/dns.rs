//! Peer hostname filter (C10)
//!
//! Before a freshly-accepted relay connection is handed to the handshake,
//! reverse-resolve its address and reject it outright if the hostname ends
//! in a blocked suffix (spec.md §6; the default list targets uptime-monitor
//! probers such as `.uptimerobot.com`, which otherwise open and immediately
//! close connections and add nothing but roster churn).
//!
//! Resolution is best-effort: a lookup failure (no PTR record, resolver
//! timeout) means the filter has nothing to match against, so the
//! connection proceeds rather than being rejected on a DNS hiccup.

use std::net::IpAddr;

use dns_lookup::lookup_addr;
use tracing::debug;

/// `true` if `addr`'s reverse-DNS hostname ends with one of `blocked_suffixes`.
pub fn is_blocked(addr: IpAddr, blocked_suffixes: &[String]) -> bool {
    let hostname = match lookup_addr(&addr) {
        Ok(hostname) => hostname,
        Err(err) => {
            debug!(%addr, error = %err, "reverse DNS lookup failed, allowing connection");
            return false;
        }
    };

    blocked_suffixes
        .iter()
        .any(|suffix| hostname.ends_with(suffix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_match_is_case_sensitive_and_exact_tail() {
        let suffixes = vec![".uptimerobot.com".to_string()];
        assert!("probe-7.uptimerobot.com".ends_with(suffixes[0].as_str()));
        assert!(!"uptimerobot.com.example.net".ends_with(suffixes[0].as_str()));
    }

    #[test]
    fn unresolvable_address_is_not_blocked() {
        // 192.0.2.0/24 is TEST-NET-1, reserved and never expected to resolve.
        let addr: IpAddr = "192.0.2.123".parse().unwrap();
        assert!(!is_blocked(addr, &[".uptimerobot.com".to_string()]));
    }
}
