//! Admission control for untrusted URLs.
//!
//! Every URL handed to the extraction engine passes through [`UrlGate::normalize`]
//! first. The gate only looks at the URL text: it never resolves hostnames, so a
//! public name pointing at a private address is not caught here.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, ParseError, Url};

use crate::config::SecurityConfig;
use crate::error::{Result, ServiceError};

const LOCALHOST_ALIASES: [&str; 4] = ["localhost", "127.0.0.1", "0.0.0.0", "::1"];

#[derive(Debug, Clone)]
pub struct UrlGate {
    allowed_schemes: Vec<String>,
    block_private_networks: bool,
}

impl UrlGate {
    pub fn new(allowed_schemes: &[String], block_private_networks: bool) -> Self {
        Self {
            allowed_schemes: allowed_schemes
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            block_private_networks,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(&config.allowed_schemes, config.block_private_networks)
    }

    /// Validate `raw` and return it trimmed but otherwise untouched.
    pub fn normalize(&self, raw: &str) -> Result<String> {
        let trimmed = raw.trim();

        let parsed = match Url::parse(trimmed) {
            Ok(parsed) => parsed,
            Err(ParseError::RelativeUrlWithoutBase) => return Err(self.scheme_rejected()),
            Err(ParseError::EmptyHost) => return Err(missing_host()),
            Err(_) => return Err(ServiceError::InvalidUrl("Invalid URL format".to_string())),
        };

        if !self.allowed_schemes.iter().any(|s| s == parsed.scheme()) {
            return Err(self.scheme_rejected());
        }

        let host = match parsed.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => HostKind::Name(domain.to_ascii_lowercase()),
            Some(Host::Ipv4(addr)) => HostKind::Ip(IpAddr::V4(addr)),
            Some(Host::Ipv6(addr)) => HostKind::Ip(IpAddr::V6(addr)),
            _ => return Err(missing_host()),
        };

        if self.block_private_networks {
            if let HostKind::Ip(ip) = &host {
                if is_private_address(ip) {
                    return Err(ServiceError::InvalidUrl(
                        "Private network URLs are not allowed".to_string(),
                    ));
                }
            }
            if host.is_localhost_alias() {
                return Err(ServiceError::InvalidUrl(
                    "Localhost URLs are not allowed".to_string(),
                ));
            }
        }

        Ok(trimmed.to_string())
    }

    fn scheme_rejected(&self) -> ServiceError {
        ServiceError::InvalidUrl(format!(
            "URL scheme not allowed. Allowed schemes: {}",
            self.allowed_schemes.join(", ")
        ))
    }
}

fn missing_host() -> ServiceError {
    ServiceError::InvalidUrl("URL must have a valid hostname".to_string())
}

enum HostKind {
    Name(String),
    Ip(IpAddr),
}

impl HostKind {
    fn is_localhost_alias(&self) -> bool {
        match self {
            HostKind::Name(name) => LOCALHOST_ALIASES.contains(&name.as_str()),
            HostKind::Ip(ip) => LOCALHOST_ALIASES.contains(&ip.to_string().as_str()),
        }
    }
}

/// Private, loopback and link-local ranges, plus the other non-routable
/// blocks an attacker could use to reach infrastructure.
pub fn is_private_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(&v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Loggable rendition of a URL: scheme, host and path, with the query
/// replaced by a short content hash so two requests can still be correlated.
pub fn log_safe(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return "invalid-url".to_string();
    };
    let Some(host) = parsed.host_str() else {
        return "invalid-url".to_string();
    };
    let digest = blake3::hash(raw.as_bytes()).to_hex();
    format!(
        "{}://{}{} (hash:{})",
        parsed.scheme(),
        host,
        parsed.path(),
        &digest.as_str()[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(block: bool) -> UrlGate {
        UrlGate::new(&["http".to_string(), "https".to_string()], block)
    }

    #[test]
    fn test_accepts_public_https() {
        let url = "  https://www.youtube.com/watch?v=abc  ";
        assert_eq!(
            gate(true).normalize(url).unwrap(),
            "https://www.youtube.com/watch?v=abc"
        );
    }

    #[test]
    fn test_rejects_disallowed_scheme() {
        let err = gate(true).normalize("ftp://example.com/file").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidUrl(ref m) if m.starts_with("URL scheme not allowed")));
        assert!(gate(true).normalize("file:///etc/passwd").is_err());
        assert!(gate(true).normalize("not a url").is_err());
    }

    #[test]
    fn test_rejects_missing_host() {
        let err = gate(true).normalize("http://").unwrap_err();
        assert_eq!(err.message(), "URL must have a valid hostname");
    }

    #[test]
    fn test_blocks_private_literals() {
        let g = gate(true);
        for url in [
            "http://10.0.0.5/admin",
            "http://192.168.1.1/",
            "http://172.16.0.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:10.0.0.1]/",
        ] {
            let err = g.normalize(url).unwrap_err();
            assert_eq!(err.message(), "Private network URLs are not allowed", "{url}");
        }
    }

    #[test]
    fn test_blocks_localhost() {
        let g = gate(true);
        assert!(g.normalize("http://localhost:8080/").is_err());
        assert!(g.normalize("http://LOCALHOST/").is_err());
        assert!(g.normalize("http://127.0.0.1/").is_err());
        assert!(g.normalize("http://[::1]/").is_err());
    }

    #[test]
    fn test_blocking_disabled_allows_private() {
        let g = gate(false);
        assert!(g.normalize("http://localhost/").is_ok());
        assert!(g.normalize("http://10.1.2.3/video").is_ok());
    }

    #[test]
    fn test_log_safe_hides_query() {
        let safe = log_safe("https://example.com/watch?v=secret");
        assert!(safe.starts_with("https://example.com/watch (hash:"));
        assert!(!safe.contains("secret"));
        assert_eq!(log_safe("::nonsense::"), "invalid-url");
    }

    #[test]
    fn test_log_safe_is_deterministic() {
        let a = log_safe("https://example.com/a?x=1");
        let b = log_safe("https://example.com/a?x=2");
        assert_eq!(a, log_safe("https://example.com/a?x=1"));
        assert_ne!(a, b);
    }
}
