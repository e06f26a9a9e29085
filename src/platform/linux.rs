//! Kernel drivers backed by the `wg` and `nft` command-line tools

use crate::error::{ArmorError, Result};
use crate::platform::{DeviceDriver, PacketFilter};
use crate::wireguard::{peer::parse_dump, DevicePeer};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Execute a system command, optionally feeding `stdin`, and return stdout
fn run_command(program: &str, args: &[&str], stdin: Option<&str>) -> std::result::Result<String, String> {
    debug!("Executing command: {} {:?}", program, args);

    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to execute {} {}: {}", program, args.join(" "), e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .map_err(|e| format!("Failed to write to {}: {}", program, e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("{} failed: {}", program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "Command failed: {} {}: {}",
            program,
            args.join(" "),
            stderr.trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Tunnel device driver using `wg set` / `wg show`
#[derive(Debug, Default)]
pub struct WgCli;

impl WgCli {
    /// Create a new driver
    pub fn new() -> Self {
        Self
    }

    fn wg(&self, args: &[&str]) -> Result<String> {
        run_command("wg", args, None).map_err(ArmorError::DeviceConfig)
    }
}

impl DeviceDriver for WgCli {
    fn configure_peer(&self, interface: &str, public_key: &str, allowed_ips: &[String]) -> Result<()> {
        let allowed = allowed_ips.join(",");
        // `allowed-ips` replaces the peer's whole list, which keeps this idempotent
        self.wg(&["set", interface, "peer", public_key, "allowed-ips", &allowed])?;
        info!(interface, peer = %public_key, allowed_ips = %allowed, "Peer configured");
        Ok(())
    }

    fn remove_peer(&self, interface: &str, public_key: &str) -> Result<()> {
        self.wg(&["set", interface, "peer", public_key, "remove"])?;
        info!(interface, peer = %public_key, "Peer removed from device");
        Ok(())
    }

    fn peer_stats(&self, interface: &str) -> Result<Vec<DevicePeer>> {
        let dump = self.wg(&["show", interface, "dump"])?;
        parse_dump(&dump)
    }

    fn public_key(&self, interface: &str) -> Result<String> {
        Ok(self.wg(&["show", interface, "public-key"])?.trim().to_string())
    }
}

/// Packet filter driver piping scripts into `nft -f -`
#[derive(Debug, Default)]
pub struct NftCli;

impl NftCli {
    /// Create a new driver
    pub fn new() -> Self {
        Self
    }
}

impl PacketFilter for NftCli {
    fn apply(&self, script: &str) -> Result<()> {
        run_command("nft", &["-f", "-"], Some(script)).map_err(ArmorError::FirewallSync)?;
        debug!(lines = script.lines().count(), "Filter transaction applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_captures_stdout() {
        let out = run_command("echo", &["hello"], None).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_command_feeds_stdin() {
        let out = run_command("cat", &[], Some("add table inet wg_filter\n")).unwrap();
        assert_eq!(out, "add table inet wg_filter\n");
    }

    #[test]
    fn test_run_command_reports_failure() {
        let err = run_command("false", &[], None).unwrap_err();
        assert!(err.starts_with("Command failed: false"));

        let err = run_command("definitely-not-a-real-tool", &[], None).unwrap_err();
        assert!(err.contains("Failed to execute"));
    }
}
