//! Host environment probing
//!
//! Detects the container environment, privilege level and whether the
//! tunnel and packet-filter tooling needed by the kernel drivers is present.

use std::fs;
use std::path::Path;
use std::process::Command;

/// Container environment detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEnvironment {
    /// Not running in a container
    None,
    /// Running in Docker
    Docker,
    /// Running in Kubernetes
    Kubernetes,
    /// Running in Podman
    Podman,
    /// Unknown container environment
    Unknown,
}

/// What the host offers to the drivers
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    /// Operating system name
    pub os: String,
    /// Container environment
    pub container: ContainerEnvironment,
    /// Whether running with elevated privileges
    pub is_privileged: bool,
    /// Kernel version (Linux only)
    pub kernel_version: Option<String>,
    /// `wg` found on PATH
    pub has_wg_tool: bool,
    /// `nft` found on PATH
    pub has_nft_tool: bool,
}

impl PlatformInfo {
    /// Create a new PlatformInfo with defaults
    pub fn new() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            container: ContainerEnvironment::None,
            is_privileged: false,
            kernel_version: None,
            has_wg_tool: false,
            has_nft_tool: false,
        }
    }

    /// Whether the kernel tunnel device can be driven
    pub fn tunnel_available(&self) -> bool {
        self.os == "linux" && self.is_privileged && self.has_wg_tool
    }

    /// Whether the packet filter can be driven
    pub fn filter_available(&self) -> bool {
        self.os == "linux" && self.is_privileged && self.has_nft_tool
    }

    /// Get a human-readable platform description
    pub fn description(&self) -> String {
        let container_str = match self.container {
            ContainerEnvironment::None => "",
            ContainerEnvironment::Docker => " (Docker)",
            ContainerEnvironment::Kubernetes => " (Kubernetes)",
            ContainerEnvironment::Podman => " (Podman)",
            ContainerEnvironment::Unknown => " (Container)",
        };

        format!(
            "{} {}{}",
            self.os,
            self.kernel_version.as_deref().unwrap_or("unknown"),
            container_str
        )
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Detect the current platform environment
pub fn detect_environment() -> PlatformInfo {
    let mut info = PlatformInfo::new();

    info.container = detect_container();
    info.is_privileged = is_privileged();
    info.has_wg_tool = tool_on_path("wg");
    info.has_nft_tool = tool_on_path("nft");

    #[cfg(target_os = "linux")]
    {
        info.kernel_version = detect_kernel_version();
    }

    info
}

/// Detect container environment
fn detect_container() -> ContainerEnvironment {
    if Path::new("/.dockerenv").exists() {
        return ContainerEnvironment::Docker;
    }

    if std::env::var("KUBERNETES_SERVICE_HOST").is_ok() {
        return ContainerEnvironment::Kubernetes;
    }

    if std::env::var("container").as_deref() == Ok("podman") {
        return ContainerEnvironment::Podman;
    }

    if let Ok(cgroup) = fs::read_to_string("/proc/1/cgroup") {
        if cgroup.contains("docker") {
            return ContainerEnvironment::Docker;
        }
        if cgroup.contains("kubepods") {
            return ContainerEnvironment::Kubernetes;
        }
        if cgroup.contains("/lxc/") {
            return ContainerEnvironment::Unknown;
        }
    }

    ContainerEnvironment::None
}

/// Check if running with elevated privileges
fn is_privileged() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

fn tool_on_path(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
fn detect_kernel_version() -> Option<String> {
    fs::read_to_string("/proc/version")
        .ok()
        .and_then(|v| v.split_whitespace().nth(2).map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_info_new() {
        let info = PlatformInfo::new();
        assert!(!info.os.is_empty());
        assert_eq!(info.container, ContainerEnvironment::None);
        assert!(!info.tunnel_available());
    }

    #[test]
    fn test_platform_info_description() {
        let mut info = PlatformInfo::new();
        info.os = "linux".to_string();
        info.kernel_version = Some("6.1.0".to_string());
        info.container = ContainerEnvironment::Docker;
        assert_eq!(info.description(), "linux 6.1.0 (Docker)");
    }

    #[test]
    fn test_detect_environment() {
        let info = detect_environment();
        assert_eq!(info.os, std::env::consts::OS);
    }
}
