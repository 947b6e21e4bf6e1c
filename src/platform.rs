// src/platform.rs

//! Platform descriptor and bottle tags
//!
//! A [`PlatformDescriptor`] is computed once per run and passed by value to
//! the resolver (predicate evaluation) and the artifact selector (bottle tag
//! matching). Nothing else in the crate inspects the host directly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OsFamily {
    Macos,
    Linux,
}

/// CPU architecture, named the way bottle tags name it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Arch {
    Arm64,
    #[strum(serialize = "x86_64")]
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Arch {
    pub fn is_arm(self) -> bool {
        matches!(self, Arch::Arm64)
    }
}

/// Known macOS releases, oldest first
///
/// The declaration order is the release order; `Ord` is derived from it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MacosRelease {
    Catalina,
    BigSur,
    Monterey,
    Ventura,
    Sonoma,
    Sequoia,
    Tahoe,
}

impl MacosRelease {
    pub const ALL: [MacosRelease; 7] = [
        MacosRelease::Catalina,
        MacosRelease::BigSur,
        MacosRelease::Monterey,
        MacosRelease::Ventura,
        MacosRelease::Sonoma,
        MacosRelease::Sequoia,
        MacosRelease::Tahoe,
    ];

    /// Map a `sw_vers -productVersion` string to a release
    pub fn from_product_version(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor: u32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
        match (major, minor) {
            (10, 15) => Some(MacosRelease::Catalina),
            (11, _) => Some(MacosRelease::BigSur),
            (12, _) => Some(MacosRelease::Monterey),
            (13, _) => Some(MacosRelease::Ventura),
            (14, _) => Some(MacosRelease::Sonoma),
            (15, _) => Some(MacosRelease::Sequoia),
            (26, _) => Some(MacosRelease::Tahoe),
            _ => None,
        }
    }

    /// This release followed by every older known release, newest first
    pub fn fallback_chain(self) -> impl Iterator<Item = MacosRelease> {
        Self::ALL.into_iter().rev().filter(move |r| *r <= self)
    }
}

/// OS version tag: a macOS release, or the generic Linux tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsVersion {
    Macos(MacosRelease),
    Linux,
}

/// Compiler family used for ABI tags and `fails_with` checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompilerFamily {
    Clang,
    Gcc,
}

/// Compiler ABI tag, e.g. `clang-14` or `gcc-11`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilerAbi {
    pub family: CompilerFamily,
    pub major: u32,
}

impl fmt::Display for CompilerAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.family, self.major)
    }
}

impl FromStr for CompilerAbi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (family, major) = s
            .split_once('-')
            .ok_or_else(|| Error::ParseError(format!("Invalid compiler tag: {}", s)))?;
        Ok(Self {
            family: CompilerFamily::from_str(family)
                .map_err(|_| Error::ParseError(format!("Unknown compiler family: {}", family)))?,
            major: major
                .parse()
                .map_err(|_| Error::ParseError(format!("Invalid compiler version: {}", major)))?,
        })
    }
}

/// Everything the resolver and selector need to know about the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub os: OsFamily,
    pub os_version: OsVersion,
    pub arch: Arch,
    pub compiler: CompilerAbi,
}

impl PlatformDescriptor {
    pub fn macos(release: MacosRelease, arch: Arch) -> Self {
        Self {
            os: OsFamily::Macos,
            os_version: OsVersion::Macos(release),
            arch,
            compiler: CompilerAbi {
                family: CompilerFamily::Clang,
                major: 15,
            },
        }
    }

    pub fn linux(arch: Arch) -> Self {
        Self {
            os: OsFamily::Linux,
            os_version: OsVersion::Linux,
            arch,
            compiler: CompilerAbi {
                family: CompilerFamily::Gcc,
                major: 11,
            },
        }
    }

    pub fn with_compiler(mut self, compiler: CompilerAbi) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn is_linux(&self) -> bool {
        self.os == OsFamily::Linux
    }

    pub fn is_macos(&self) -> bool {
        self.os == OsFamily::Macos
    }

    pub fn macos_release(&self) -> Option<MacosRelease> {
        match self.os_version {
            OsVersion::Macos(r) => Some(r),
            OsVersion::Linux => None,
        }
    }

    /// The most specific bottle tag for this platform
    pub fn bottle_tag(&self) -> String {
        match self.os_version {
            OsVersion::Macos(release) => macos_tag(self.arch, release),
            OsVersion::Linux => format!("{}_linux", self.arch),
        }
    }

    /// Bottle tags acceptable on this platform, most specific first
    ///
    /// On macOS this walks from the current release down to the oldest known
    /// one; a bottle for a newer release is never acceptable. Every chain ends
    /// with the architecture-independent `all` tag.
    pub fn bottle_tag_chain(&self) -> Vec<String> {
        let mut tags: Vec<String> = match self.os_version {
            OsVersion::Macos(release) => release
                .fallback_chain()
                .map(|r| macos_tag(self.arch, r))
                .collect(),
            OsVersion::Linux => vec![self.bottle_tag()],
        };
        tags.push("all".to_string());
        tags
    }

    /// Detect the host platform
    pub fn detect() -> Result<Self> {
        let arch = match std::env::consts::ARCH {
            "aarch64" => Arch::Arm64,
            "x86_64" => Arch::X86_64,
            other => {
                return Err(Error::ConfigError(format!(
                    "Unsupported architecture: {}",
                    other
                )))
            }
        };

        let platform = match std::env::consts::OS {
            "linux" => Self::linux(arch),
            "macos" => {
                let output = Command::new("sw_vers")
                    .arg("-productVersion")
                    .output()
                    .map_err(|e| Error::IoError(format!("Failed to run sw_vers: {}", e)))?;
                let product = String::from_utf8_lossy(&output.stdout).to_string();
                let release = MacosRelease::from_product_version(&product).ok_or_else(|| {
                    Error::ConfigError(format!("Unsupported macOS version: {}", product.trim()))
                })?;
                Self::macos(release, arch)
            }
            other => {
                return Err(Error::ConfigError(format!(
                    "Unsupported operating system: {}",
                    other
                )))
            }
        };

        let platform = match detect_compiler() {
            Some(compiler) => platform.with_compiler(compiler),
            None => platform,
        };

        debug!("Detected platform: {}", platform);
        Ok(platform)
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.bottle_tag(), self.compiler)
    }
}

fn macos_tag(arch: Arch, release: MacosRelease) -> String {
    match arch {
        Arch::Arm64 => format!("arm64_{}", release),
        Arch::X86_64 => release.to_string(),
    }
}

/// Ask `cc --version` which compiler is installed
fn detect_compiler() -> Option<CompilerAbi> {
    let output = Command::new("cc").arg("--version").output().ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?;
    let family = if first.contains("clang") {
        CompilerFamily::Clang
    } else {
        CompilerFamily::Gcc
    };
    let major = first
        .split_whitespace()
        .find_map(|word| {
            let head = word.split('.').next()?;
            if word.contains('.') && !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) {
                head.parse().ok()
            } else {
                None
            }
        })?;
    Some(CompilerAbi { family, major })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macos_tag_names() {
        let arm = PlatformDescriptor::macos(MacosRelease::BigSur, Arch::Arm64);
        assert_eq!(arm.bottle_tag(), "arm64_big_sur");
        let intel = PlatformDescriptor::macos(MacosRelease::Monterey, Arch::X86_64);
        assert_eq!(intel.bottle_tag(), "monterey");
        let linux = PlatformDescriptor::linux(Arch::X86_64);
        assert_eq!(linux.bottle_tag(), "x86_64_linux");
    }

    #[test]
    fn test_fallback_chain_never_newer() {
        let p = PlatformDescriptor::macos(MacosRelease::Ventura, Arch::X86_64);
        assert_eq!(
            p.bottle_tag_chain(),
            vec!["ventura", "monterey", "big_sur", "catalina", "all"]
        );
        let oldest = PlatformDescriptor::macos(MacosRelease::Catalina, Arch::Arm64);
        assert_eq!(oldest.bottle_tag_chain(), vec!["arm64_catalina", "all"]);
    }

    #[test]
    fn test_linux_chain() {
        let p = PlatformDescriptor::linux(Arch::Arm64);
        assert_eq!(p.bottle_tag_chain(), vec!["arm64_linux", "all"]);
    }

    #[test]
    fn test_product_version_mapping() {
        assert_eq!(
            MacosRelease::from_product_version("13.4.1"),
            Some(MacosRelease::Ventura)
        );
        assert_eq!(
            MacosRelease::from_product_version("10.15.7"),
            Some(MacosRelease::Catalina)
        );
        assert_eq!(MacosRelease::from_product_version("10.14"), None);
    }

    #[test]
    fn test_compiler_tag_round_trip() {
        let abi: CompilerAbi = "gcc-5".parse().unwrap();
        assert_eq!(abi.family, CompilerFamily::Gcc);
        assert_eq!(abi.major, 5);
        assert_eq!(abi.to_string(), "gcc-5");
        assert!("msvc-19".parse::<CompilerAbi>().is_err());
    }

    #[test]
    fn test_release_parse_from_string() {
        assert_eq!(MacosRelease::from_str("big_sur").unwrap(), MacosRelease::BigSur);
        assert_eq!(MacosRelease::Sonoma.to_string(), "sonoma");
    }
}
