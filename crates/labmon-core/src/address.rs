use std::fmt;

use reqwest::Url;

use labmon_common::{FetchError, METRICS_PATH};

/// Build the telemetry URL for a configured node address.
///
/// - `host` → `http://host:<default_port>/metrics`
/// - `host:port` → `http://host:port/metrics`
/// - `scheme://...` → used verbatim, `/metrics` appended unless already there
pub fn metrics_url(address: &str, default_port: u16) -> Result<Url, FetchError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(FetchError::validation("address is empty"));
    }
    if address.chars().any(char::is_whitespace) {
        return Err(FetchError::validation(format!(
            "address '{address}' contains whitespace"
        )));
    }

    if address.contains("://") {
        let mut url = Url::parse(address)
            .map_err(|e| FetchError::validation(format!("invalid address '{address}': {e}")))?;
        check_http_url(&url, address)?;
        let path = url.path().trim_end_matches('/').to_string();
        if !path.ends_with(METRICS_PATH) {
            url.set_path(&format!("{path}{METRICS_PATH}"));
        }
        return Ok(url);
    }

    if address.contains(['/', '?', '#', '@']) {
        return Err(FetchError::validation(format!(
            "address '{address}' must be host[:port] or a full URL"
        )));
    }

    let mut url = Url::parse(&format!("http://{address}"))
        .map_err(|e| FetchError::validation(format!("invalid address '{address}': {e}")))?;
    check_http_url(&url, address)?;
    if !has_explicit_port(address) {
        url.set_port(Some(default_port))
            .map_err(|_| FetchError::validation(format!("cannot set port on '{address}'")))?;
    }
    url.set_path(METRICS_PATH);
    Ok(url)
}

fn check_http_url(url: &Url, raw: &str) -> Result<(), FetchError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::validation(format!(
            "unsupported scheme '{}' in '{raw}'",
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(h) if !h.is_empty() => Ok(()),
        _ => Err(FetchError::validation(format!("address '{raw}' has no host"))),
    }
}

// `Url` hides a port equal to the scheme default, so look at the raw text.
fn has_explicit_port(host_port: &str) -> bool {
    match host_port.rfind(']') {
        Some(i) => host_port[i..].contains(':'),
        None => host_port.contains(':'),
    }
}

/// Host part of a node address, without brackets or port.
pub fn host_of(address: &str, default_port: u16) -> Result<String, FetchError> {
    let url = metrics_url(address, default_port)?;
    let host = url
        .host_str()
        .ok_or_else(|| FetchError::validation(format!("address '{address}' has no host")))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// Allow-list for hosts handed to the system `ping` utility.
pub fn is_safe_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('-')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// The first three octets of an IPv4 /24, e.g. `192.168.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetPrefix([u8; 3]);

impl SubnetPrefix {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let invalid = || FetchError::validation(format!("'{raw}' is not a prefix like 192.168.1"));

        let mut octets = [0u8; 3];
        let mut parts = raw.split('.');
        for slot in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }

    pub fn host(&self, suffix: u8) -> String {
        format!("{self}.{suffix}")
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}
