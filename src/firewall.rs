//! Packet-filter transaction compilers
//!
//! Every function here is pure: it turns declarative state into one `nft`
//! script that the platform filter driver applies atomically. Each script
//! creates its table and chain if missing and flushes the chain before
//! re-adding rules, so applying it is a full recompilation and the resulting
//! filter state depends only on the input.
//!
//! Three independent tables are managed:
//!
//! - `inet wg_filter`: the administrator's firewall rule set
//! - `ip armor_nat` / `inet armor_filter`: system NAT, DNS redirect and blackout policy
//! - `inet armor_revoked`: drop rules for revoked peer addresses

use crate::error::{ArmorError, Result};
use crate::models::{FirewallRule, RuleAction, SystemConfig};
use ipnet::IpNet;
use std::net::IpAddr;

/// Compile the full firewall rule set into one flush-then-reapply transaction
pub fn compile_rules(rules: &[FirewallRule]) -> Result<String> {
    let mut script = String::new();
    script.push_str("add table inet wg_filter\n");
    script.push_str(
        "add chain inet wg_filter forward { type filter hook forward priority 0; policy accept; }\n",
    );
    script.push_str("flush chain inet wg_filter forward\n");

    for rule in rules {
        script.push_str(&format!("add rule inet wg_filter forward {}\n", rule_statement(rule)?));
    }

    Ok(script)
}

/// Compile the NAT, DNS-redirect and outbound-blocking policy into one transaction
pub fn compile_system_policy(config: &SystemConfig) -> Result<String> {
    let wan = config.wan_interface.trim();
    if !wan.is_empty() {
        validate_interface(wan)?;
    }

    let mut script = String::new();

    script.push_str("add table ip armor_nat\n");
    script.push_str(
        "add chain ip armor_nat postrouting { type nat hook postrouting priority 100; policy accept; }\n",
    );
    script.push_str("flush chain ip armor_nat postrouting\n");
    if !wan.is_empty() && !config.internet_access_limited {
        script.push_str(&format!(
            "add rule ip armor_nat postrouting oifname \"{}\" masquerade\n",
            wan
        ));
    }

    script.push_str(
        "add chain ip armor_nat prerouting { type nat hook prerouting priority -100; policy accept; }\n",
    );
    script.push_str("flush chain ip armor_nat prerouting\n");
    let dns_target = config.pihole_address.trim();
    if config.dns_filtering_active && !dns_target.is_empty() {
        let target: IpAddr = dns_target.parse().map_err(|e| {
            ArmorError::Validation(format!("Invalid DNS filter address '{}': {}", dns_target, e))
        })?;
        if !target.is_ipv4() {
            return Err(ArmorError::Validation(format!(
                "DNS filter address must be IPv4, got {}",
                target
            )));
        }
        for proto in ["udp", "tcp"] {
            script.push_str(&format!(
                "add rule ip armor_nat prerouting {} dport 53 dnat to {}\n",
                proto, target
            ));
        }
    }

    script.push_str("add table inet armor_filter\n");
    script.push_str(
        "add chain inet armor_filter forward { type filter hook forward priority 0; policy accept; }\n",
    );
    script.push_str("flush chain inet armor_filter forward\n");
    if config.internet_access_limited && !wan.is_empty() {
        script.push_str(&format!("add rule inet armor_filter forward oifname \"{}\" drop\n", wan));
    }

    Ok(script)
}

/// Compile the drop rules for every revoked peer address as one transaction
pub fn compile_revocations<'a>(addrs: impl IntoIterator<Item = &'a IpAddr>) -> String {
    let mut script = String::new();
    script.push_str("add table inet armor_revoked\n");
    script.push_str(
        "add chain inet armor_revoked forward { type filter hook forward priority -10; policy accept; }\n",
    );
    script.push_str("flush chain inet armor_revoked forward\n");

    for addr in addrs {
        script.push_str(&format!(
            "add rule inet armor_revoked forward {} saddr {} drop\n",
            family_keyword(*addr),
            addr
        ));
    }
    script
}

fn rule_statement(rule: &FirewallRule) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();

    if let Some(src) = address_match(&rule.source_ip)? {
        parts.push(format!("{} saddr {}", src.0, src.1));
    }
    if let Some(dst) = address_match(&rule.destination)? {
        parts.push(format!("{} daddr {}", dst.0, dst.1));
    }

    let protocol = rule.protocol.trim().to_ascii_lowercase();
    let port = port_match(&rule.port)?;
    match protocol.as_str() {
        "" | "any" => {
            if let Some(port) = port {
                parts.push(format!("meta l4proto {{ tcp, udp }} th dport {}", port));
            }
        }
        "tcp" | "udp" => match port {
            Some(port) => parts.push(format!("{} dport {}", protocol, port)),
            None => parts.push(format!("meta l4proto {}", protocol)),
        },
        "icmp" => parts.push("meta l4proto icmp".to_string()),
        other => {
            return Err(ArmorError::Validation(format!(
                "Unsupported protocol '{}' (expected tcp, udp, icmp or any)",
                other
            )))
        }
    }

    parts.push(
        match rule.action {
            RuleAction::Deny => "drop",
            RuleAction::Allow => "accept",
        }
        .to_string(),
    );

    Ok(parts.join(" "))
}

/// `None` for wildcard; otherwise the family keyword and the normalized address/prefix.
fn address_match(value: &str) -> Result<Option<(&'static str, String)>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("any") {
        return Ok(None);
    }

    if let Ok(addr) = value.parse::<IpAddr>() {
        return Ok(Some((family_keyword(addr), addr.to_string())));
    }

    let net: IpNet = value
        .parse()
        .map_err(|_| ArmorError::Validation(format!("Invalid address or CIDR '{}'", value)))?;
    Ok(Some((family_keyword(net.addr()), net.trunc().to_string())))
}

fn port_match(value: &str) -> Result<Option<String>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("any") {
        return Ok(None);
    }

    let parse = |p: &str| {
        p.trim()
            .parse::<u16>()
            .map_err(|_| ArmorError::Validation(format!("Invalid port '{}'", value)))
    };

    match value.split_once('-') {
        Some((lo, hi)) => {
            let (lo, hi) = (parse(lo)?, parse(hi)?);
            if lo > hi {
                return Err(ArmorError::Validation(format!("Invalid port range '{}'", value)));
            }
            Ok(Some(format!("{}-{}", lo, hi)))
        }
        None => Ok(Some(parse(value)?.to_string())),
    }
}

fn family_keyword(addr: IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "ip",
        IpAddr::V6(_) => "ip6",
    }
}

/// Interface names end up quoted inside the script, so restrict them to the kernel's charset.
pub(crate) fn validate_interface(name: &str) -> Result<()> {
    let valid = name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ArmorError::Validation(format!("Invalid interface name '{}'", name)))
    }
}
