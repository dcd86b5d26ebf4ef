//! IPv6 network prefix value type and extraction from router output.
//!
//! A [`NetworkPrefix`] is the single dynamic attribute this tool manages. It
//! is created once per pass from raw discovery output, compared byte-for-byte
//! against values read back from targets, and never persisted.

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DiscoveryError;

/// A validated IPv6 network prefix with a fixed expected length.
///
/// Host bits are truncated on construction, so `2001:db8:1234::1/64`
/// normalizes to `2001:db8:1234::/64`. Equality is exact CIDR equality
/// after that normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkPrefix(Ipv6Net);

impl NetworkPrefix {
    /// Parse a prefix-shaped token and validate its length.
    ///
    /// # Examples
    /// ```
    /// use prefixsync::prefix::NetworkPrefix;
    /// let p = NetworkPrefix::parse("2001:db8:1234::1/64", 64).unwrap();
    /// assert_eq!(p.to_string(), "2001:db8:1234::/64");
    /// assert!(NetworkPrefix::parse("2001:db8::/56", 64).is_err());
    /// ```
    pub fn parse(token: &str, expected_len: u8) -> Result<Self, DiscoveryError> {
        let net: Ipv6Net = token.parse().map_err(|_| DiscoveryError::Unparseable)?;
        if net.prefix_len() != expected_len {
            return Err(DiscoveryError::WrongLength {
                expected: expected_len,
                actual: net.prefix_len(),
            });
        }
        Ok(Self(net.trunc()))
    }

    /// The underlying network.
    pub fn network(&self) -> Ipv6Net {
        self.0
    }

    /// Whether a value read back from a target denotes the same prefix.
    ///
    /// Targets may report the prefix in a non-canonical spelling
    /// (uncompressed hextets, host bits set); anything that does not parse
    /// as an IPv6 network is simply not a match.
    pub fn matches_str(&self, candidate: &str) -> bool {
        match candidate.trim().parse::<Ipv6Net>() {
            Ok(net) => net.trunc() == self.0,
            Err(_) => false,
        }
    }
}

impl fmt::Display for NetworkPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Extract the advertised prefix from free-form router output.
///
/// Two passes: first only lines containing `keyword` are scanned for a
/// CIDR-shaped token, then (if that yields nothing) the whole output.
/// The first candidate found is the discovered value; a length mismatch on
/// it is a hard validation failure, never silently skipped.
pub fn extract_prefix(
    output: &str,
    keyword: &str,
    expected_len: u8,
) -> Result<NetworkPrefix, DiscoveryError> {
    let keyword_lines = output.lines().filter(|l| l.contains(keyword));
    if let Some(token) = first_candidate(keyword_lines) {
        return NetworkPrefix::parse(&token, expected_len);
    }
    if let Some(token) = first_candidate(output.lines()) {
        return NetworkPrefix::parse(&token, expected_len);
    }
    Err(DiscoveryError::Unparseable)
}

/// First token across the given lines that parses as an IPv6 network.
///
/// Link-local networks are skipped: SLAAC puts an fe80:: address on every
/// interface and it would otherwise shadow the delegated prefix.
fn first_candidate<'a>(lines: impl Iterator<Item = &'a str>) -> Option<String> {
    for line in lines {
        for raw in line.split_whitespace() {
            let token = raw.trim_matches(|c: char| ",;()[]{}'\"".contains(c));
            if !token.contains(':') || !token.contains('/') {
                continue;
            }
            if let Ok(net) = token.parse::<Ipv6Net>() {
                if is_link_local(&net) {
                    continue;
                }
                return Some(token.to_string());
            }
        }
    }
    None
}

fn is_link_local(net: &Ipv6Net) -> bool {
    net.addr().segments()[0] & 0xffc0 == 0xfe80
}
