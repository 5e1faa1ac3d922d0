// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Works out how this machine is publicly addressable through the tunnel.
//!
//! The first field after the address in `status --self` is either a full
//! MagicDNS name (`myhost.tailnet-abc.ts.net.`) or a bare machine name. A full
//! name is split at the first dot. For a bare name the domain comes from, in
//! order: the configured `tunnel.domain`, the `MagicDNSSuffix` reported by
//! `status --json`, and finally the configured placeholder. Only the
//! `status --self` query can fail discovery.

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::TunnelConfig;
use crate::error::ShareError;
use crate::tunnel::Tunnel;

/// A single DNS label followed by at least one more.
const DOMAIN_PATTERN: &str =
    r"^(?i)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)+$";

/// This machine's public name under the tunnel provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    /// Machine name (first DNS label).
    pub name: String,
    /// Tailnet domain suffix (everything after the first label).
    pub domain: String,
}

impl MachineIdentity {
    /// The URL a funnel on this machine is reachable at.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Discovery`] if the name and domain do not form
    /// a valid host.
    pub fn public_url(&self) -> Result<Url, ShareError> {
        let raw = format!("https://{}.{}/", self.name, self.domain);
        Url::parse(&raw).map_err(|e| {
            ShareError::Discovery(format!("Tailscale reported an unusable host name '{raw}': {e}"))
        })
    }
}

/// Where to look for a domain when the tool reports a bare machine name.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Explicitly configured domain, tried first.
    pub domain: Option<String>,
    /// Used when nothing else yields a domain.
    pub fallback_domain: String,
}

impl DiscoverySettings {
    /// Builds settings from the `[tunnel]` config section.
    #[must_use]
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            fallback_domain: config.fallback_domain.clone(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self::from_config(&TunnelConfig::default())
    }
}

/// Queries the tunneling tool for this machine's identity.
///
/// # Errors
///
/// Returns [`ShareError::Discovery`] if `status --self` cannot be run, fails,
/// or produces output without a self identifier. The domain fallback never
/// fails.
pub async fn discover<T: Tunnel + ?Sized>(
    tunnel: &T,
    settings: &DiscoverySettings,
) -> Result<MachineIdentity, ShareError> {
    let output = tunnel.self_status().await.map_err(|e| {
        ShareError::Discovery(format!(
            "Failed to get Tailscale status. Is Tailscale running? ({e})"
        ))
    })?;

    let identifier = parse_self_identifier(&output)?;
    let (name, domain) = split_identifier(identifier);
    if name.is_empty() {
        return Err(ShareError::Discovery(format!(
            "Unexpected Tailscale machine name '{identifier}'"
        )));
    }

    let domain = match domain {
        Some(domain) => domain.to_string(),
        None => fallback_domain(tunnel, settings).await,
    };

    debug!("Discovered machine {name} in {domain}");
    Ok(MachineIdentity {
        name: name.to_string(),
        domain,
    })
}

/// Extracts the self identifier: the second field of the first line.
///
/// # Errors
///
/// Returns [`ShareError::Discovery`] for empty output or a first line with
/// fewer than two fields.
pub fn parse_self_identifier(output: &str) -> Result<&str, ShareError> {
    let first = output
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ShareError::Discovery("Could not get Tailscale status".to_string()))?;

    first.split_whitespace().nth(1).ok_or_else(|| {
        ShareError::Discovery("Unexpected Tailscale status output format".to_string())
    })
}

/// Splits `name.domain` at the first dot. A trailing root dot is ignored.
fn split_identifier(identifier: &str) -> (&str, Option<&str>) {
    let identifier = identifier.trim_end_matches('.');
    match identifier.split_once('.') {
        Some((name, domain)) if !domain.is_empty() => (name, Some(domain)),
        _ => (identifier, None),
    }
}

async fn fallback_domain<T: Tunnel + ?Sized>(tunnel: &T, settings: &DiscoverySettings) -> String {
    if let Some(domain) = settings.domain.as_deref().map(str::trim)
        && !domain.is_empty()
    {
        return domain.trim_matches('.').to_string();
    }

    match tunnel.status().await {
        Ok(json) => {
            if let Some(domain) = domain_from_status(&json) {
                return domain;
            }
            debug!("No tailnet domain in status output");
        }
        Err(e) => warn!("Tailscale status query failed, using placeholder domain: {e}"),
    }

    settings.fallback_domain.clone()
}

#[derive(Debug, Default, Deserialize)]
struct StatusJson {
    #[serde(default, rename = "MagicDNSSuffix")]
    magic_dns_suffix: Option<String>,
    #[serde(default, rename = "CurrentTailnet")]
    current_tailnet: Option<TailnetJson>,
    #[serde(default, rename = "Self")]
    self_node: Option<NodeJson>,
}

#[derive(Debug, Default, Deserialize)]
struct TailnetJson {
    #[serde(default, rename = "MagicDNSSuffix")]
    magic_dns_suffix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeJson {
    #[serde(default, rename = "DNSName")]
    dns_name: Option<String>,
}

/// Reads the tailnet domain from `status --json` output.
///
/// Returns `None` for unparseable output or when no candidate looks like a
/// domain name.
#[must_use]
pub fn domain_from_status(json: &str) -> Option<String> {
    let status: StatusJson = match serde_json::from_str(json) {
        Ok(status) => status,
        Err(e) => {
            debug!("Unparseable status JSON: {e}");
            return None;
        }
    };

    let from_self = status
        .self_node
        .and_then(|node| node.dns_name)
        .and_then(|dns| split_identifier(&dns).1.map(str::to_string));

    [
        status.magic_dns_suffix,
        status.current_tailnet.and_then(|t| t.magic_dns_suffix),
        from_self,
    ]
    .into_iter()
    .flatten()
    .map(|candidate| candidate.trim().trim_matches('.').to_string())
    .find(|candidate| looks_like_domain(candidate))
}

fn looks_like_domain(candidate: &str) -> bool {
    Regex::new(DOMAIN_PATTERN).is_ok_and(|re| re.is_match(candidate))
}
