//! Outbound URL policy for webhook targets.
//!
//! The check is purely syntactic: it looks at the scheme and the literal
//! host in the URL and never resolves DNS. A hostname that resolves to a
//! private address is not caught.

use std::net::{Ipv4Addr, Ipv6Addr};

use {
    switchboard_config::EgressConfig,
    url::{Host, Url},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EgressViolation {
    #[error("malformed url: {0}")]
    Malformed(String),
    #[error("scheme {0:?} is not allowed, use https")]
    Scheme(String),
    #[error("url has no host")]
    MissingHost,
    #[error("target {0} is a loopback, unspecified or private address")]
    PrivateTarget(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EgressPolicy {
    pub allow_http: bool,
    pub allow_private_targets: bool,
}

impl From<&EgressConfig> for EgressPolicy {
    fn from(config: &EgressConfig) -> Self {
        Self {
            allow_http: config.allow_http,
            allow_private_targets: config.allow_private_targets,
        }
    }
}

impl EgressPolicy {
    /// Allows plain http and private targets. Local development and tests.
    pub fn permissive() -> Self {
        Self {
            allow_http: true,
            allow_private_targets: true,
        }
    }

    pub fn check(&self, raw: &str) -> Result<Url, EgressViolation> {
        let url = Url::parse(raw).map_err(|e| EgressViolation::Malformed(e.to_string()))?;
        match url.scheme() {
            "https" => {},
            "http" if self.allow_http => {},
            other => return Err(EgressViolation::Scheme(other.to_string())),
        }
        let host = url.host().ok_or(EgressViolation::MissingHost)?;
        if !self.allow_private_targets && is_private_host(&host) {
            return Err(EgressViolation::PrivateTarget(host.to_string()));
        }
        Ok(url)
    }
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            name == "localhost" || name.ends_with(".localhost")
        },
        Host::Ipv4(addr) => is_private_v4(*addr),
        Host::Ipv6(addr) => is_private_v6(*addr),
    }
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    addr.is_loopback()
        || addr.is_unspecified()
        || a == 10
        // The whole 172/8 block, not just 172.16/12.
        || a == 172
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
}

fn is_private_v6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    addr.to_ipv4_mapped().is_some_and(is_private_v4)
}
