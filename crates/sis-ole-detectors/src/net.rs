use std::net::Ipv4Addr;

/// Syntactic domain-name check: dotted labels of letters, digits and
/// interior hyphens, with an alphabetic TLD of at least two characters.
pub fn is_valid_domain(hostname: &str) -> bool {
    if hostname.len() > 253 || !hostname.contains('.') {
        return false;
    }
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// Strict dotted-quad parse. `Ipv4Addr::from_str` already rejects the short
/// forms (`127.1`) that `inet_aton` would accept, which is what we want for
/// indicator reporting.
pub fn parse_ipv4(host: &str) -> Option<Ipv4Addr> {
    if host.split('.').count() != 4 {
        return None;
    }
    host.parse().ok()
}

/// Reserved or otherwise non-routable addresses are not reportable
/// indicators. Documentation ranges (192.0.2/24 and friends) stay routable
/// here so test-net samples still report.
pub fn is_reserved_ipv4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_multicast()
        || addr.is_broadcast()
        || octets[0] == 0
        // CGNAT 100.64.0.0/10
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // Benchmarking 198.18.0.0/15
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // Class E 240.0.0.0/4
        || octets[0] >= 240
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_domains() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("sub-domain.example.co.uk"));
    }

    #[test]
    fn rejects_non_domains() {
        assert!(!is_valid_domain("localhost"));
        assert!(!is_valid_domain("example."));
        assert!(!is_valid_domain(".example.com"));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("example.c"));
        assert!(!is_valid_domain("192.0.2.1"));
        assert!(!is_valid_domain("exa mple.com"));
    }

    #[test]
    fn reserved_ranges() {
        for reserved in ["127.0.0.1", "10.1.2.3", "172.16.0.1", "192.168.1.1", "169.254.0.9",
            "0.1.2.3", "100.64.0.1", "198.18.0.1", "224.0.0.1", "255.255.255.255"]
        {
            assert!(is_reserved_ipv4(reserved.parse().unwrap()), "{reserved} should be reserved");
        }
        for routable in ["192.0.2.1", "203.0.113.9", "8.8.8.8", "198.51.100.4"] {
            assert!(!is_reserved_ipv4(routable.parse().unwrap()), "{routable} should report");
        }
    }

    #[test]
    fn ipv4_parse_requires_dotted_quad() {
        assert!(parse_ipv4("192.0.2.1").is_some());
        assert!(parse_ipv4("127.1").is_none());
        assert!(parse_ipv4("example.com").is_none());
    }
}
