//! Target platforms and their selector flags.
//!
//! Platforms are named by conda subdirectory (`linux-64`, `osx-arm64`, ...).
//! Each one switches on a fixed set of boolean selector flags; every other
//! known flag is present and `false`, so a selector mentioning `win` on a
//! linux build evaluates instead of failing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::selector::{SelectorEnv, SelectorValue};

/// Subdirectory name to the selector flags it enables.
const SUBDIR_FLAGS: &[(&str, &[&str])] = &[
    ("emscripten-wasm32", &["unix", "emscripten", "wasm32"]),
    ("wasi-wasm32", &["wasi", "wasm32"]),
    ("freebsd-64", &["freebsd", "x86", "x86_64"]),
    ("linux-32", &["unix", "linux", "linux32", "x86"]),
    ("linux-64", &["unix", "linux", "linux64", "x86", "x86_64"]),
    ("linux-aarch64", &["unix", "linux", "aarch64"]),
    ("linux-armv6l", &["unix", "linux", "arm", "armv6l"]),
    ("linux-armv7l", &["unix", "linux", "arm", "armv7l"]),
    ("linux-ppc64", &["unix", "linux", "ppc64"]),
    ("linux-ppc64le", &["unix", "linux", "ppc64le"]),
    ("linux-riscv64", &["unix", "linux", "riscv64"]),
    ("linux-s390x", &["unix", "linux", "s390x"]),
    ("osx-64", &["unix", "osx", "x86", "x86_64"]),
    ("osx-arm64", &["unix", "osx", "arm64"]),
    ("win-32", &["win", "win32", "x86"]),
    ("win-64", &["win", "win64", "x86", "x86_64"]),
    ("win-arm64", &["win", "arm64"]),
    ("zos-z", &["zos", "z"]),
];

/// A build target, identified by its conda subdirectory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    subdir: &'static str,
    flags: &'static [&'static str],
}

impl Platform {
    pub fn from_subdir(name: &str) -> Result<Self> {
        SUBDIR_FLAGS
            .iter()
            .find(|(subdir, _)| *subdir == name)
            .map(|&(subdir, flags)| Self { subdir, flags })
            .ok_or_else(|| Error::UnknownPlatform {
                platform: name.to_string(),
            })
    }

    /// The platform this process is running on.
    pub fn native() -> Result<Self> {
        Self::from_subdir(&native_subdir(std::env::consts::OS, std::env::consts::ARCH)?)
    }

    /// All known platforms.
    pub fn all() -> impl Iterator<Item = Platform> {
        SUBDIR_FLAGS
            .iter()
            .map(|&(subdir, flags)| Self { subdir, flags })
    }

    pub fn subdir(&self) -> &'static str {
        self.subdir
    }

    pub fn flags(&self) -> &'static [&'static str] {
        self.flags
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(&flag)
    }

    /// The operating-system part of the subdir (`linux`, `osx`, `win`, ...).
    pub fn family(&self) -> &'static str {
        self.subdir
            .split_once('-')
            .map(|(family, _)| family)
            .unwrap_or(self.subdir)
    }

    /// Every flag name any platform can set, sorted.
    pub fn known_flags() -> Vec<&'static str> {
        let mut flags: Vec<&'static str> = SUBDIR_FLAGS
            .iter()
            .flat_map(|(_, flags)| flags.iter().copied())
            .collect();
        flags.sort_unstable();
        flags.dedup();
        flags
    }

    /// Selector variables for this platform: every known flag plus `build_platform`.
    pub fn selector_env(&self) -> SelectorEnv {
        let mut env: SelectorEnv = Self::known_flags()
            .into_iter()
            .map(|flag| (flag.to_string(), SelectorValue::Bool(self.has_flag(flag))))
            .collect();
        env.insert(
            "build_platform".to_string(),
            SelectorValue::Str(self.subdir.to_string()),
        );
        env
    }

    /// Install sources tried when the caller gives no priority list.
    pub fn default_source_order(&self) -> Vec<String> {
        let mut sources = vec!["conda", "pip"];
        match self.family() {
            "linux" => sources.extend(["apt", "bash", "brew"]),
            "osx" => sources.extend(["brew", "bash"]),
            "win" => sources.extend(["choco", "winget", "pwsh"]),
            _ => {}
        }
        sources.into_iter().map(str::to_string).collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subdir)
    }
}

impl TryFrom<String> for Platform {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_subdir(&value)
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.subdir.to_string()
    }
}

impl std::str::FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_subdir(s)
    }
}

/// Map Rust's `OS`/`ARCH` constants to a conda subdir name.
fn native_subdir(os: &str, arch: &str) -> Result<String> {
    let family = match os {
        "linux" => "linux",
        "macos" => "osx",
        "windows" => "win",
        "freebsd" => "freebsd",
        other => {
            return Err(Error::UnknownPlatform {
                platform: format!("{other}/{arch}"),
            });
        }
    };

    let machine = match (family, arch) {
        (_, "x86_64") => "64",
        (_, "x86") => "32",
        ("linux", "aarch64") => "aarch64",
        (_, "aarch64") => "arm64",
        ("linux", "arm") => "armv7l",
        ("linux", "powerpc64") if cfg!(target_endian = "little") => "ppc64le",
        ("linux", "powerpc64") => "ppc64",
        ("linux", "riscv64") => "riscv64",
        ("linux", "s390x") => "s390x",
        _ => {
            return Err(Error::UnknownPlatform {
                platform: format!("{os}/{arch}"),
            });
        }
    };

    Ok(format!("{family}-{machine}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("linux", "x86_64", "linux-64")]
    #[case("linux", "aarch64", "linux-aarch64")]
    #[case("macos", "aarch64", "osx-arm64")]
    #[case("macos", "x86_64", "osx-64")]
    #[case("windows", "x86_64", "win-64")]
    #[case("windows", "x86", "win-32")]
    #[case("windows", "aarch64", "win-arm64")]
    #[case("linux", "s390x", "linux-s390x")]
    fn maps_native_constants(#[case] os: &str, #[case] arch: &str, #[case] expected: &str) {
        let subdir = native_subdir(os, arch).unwrap();
        assert_eq!(subdir, expected);
        assert!(Platform::from_subdir(&subdir).is_ok());
    }

    #[test]
    fn unknown_native_constants_error() {
        assert!(native_subdir("haiku", "x86_64").is_err());
        assert!(native_subdir("macos", "riscv64").is_err());
    }

    #[test]
    fn every_platform_defines_every_flag() {
        let known = Platform::known_flags();
        for platform in Platform::all() {
            let env = platform.selector_env();
            assert_eq!(env.len(), known.len() + 1, "{platform}");
            for flag in platform.flags() {
                assert_eq!(env[*flag], SelectorValue::Bool(true));
            }
        }
    }

    #[test]
    fn linux_aarch64_flags() {
        let env = Platform::from_subdir("linux-aarch64").unwrap().selector_env();
        assert_eq!(env["linux"], SelectorValue::Bool(true));
        assert_eq!(env["aarch64"], SelectorValue::Bool(true));
        assert_eq!(env["arm64"], SelectorValue::Bool(false));
        assert_eq!(env["win"], SelectorValue::Bool(false));
        assert_eq!(env["build_platform"], SelectorValue::Str("linux-aarch64".into()));
    }

    #[rstest]
    #[case("linux-64", &["conda", "pip", "apt", "bash", "brew"])]
    #[case("osx-arm64", &["conda", "pip", "brew", "bash"])]
    #[case("win-64", &["conda", "pip", "choco", "winget", "pwsh"])]
    #[case("zos-z", &["conda", "pip"])]
    fn default_sources(#[case] subdir: &str, #[case] expected: &[&str]) {
        let platform = Platform::from_subdir(subdir).unwrap();
        assert_eq!(platform.default_source_order(), expected);
    }

    #[test]
    fn serde_uses_subdir_name() {
        let platform: Platform = serde_json::from_str("\"osx-64\"").unwrap();
        assert_eq!(platform.family(), "osx");
        assert_eq!(serde_json::to_string(&platform).unwrap(), "\"osx-64\"");
        assert!(serde_json::from_str::<Platform>("\"amiga-68k\"").is_err());
    }

    #[test]
    fn unknown_subdir_errors() {
        assert!(matches!(
            "beos-64".parse::<Platform>(),
            Err(Error::UnknownPlatform { .. })
        ));
    }
}
