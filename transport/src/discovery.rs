//! Locating the subprocess executable and the vendor SDK library directory.
//!
//! Search order for both: explicit path, environment override, upward walk
//! from the running executable, then OS-conventional install locations. A
//! missing binary is fatal and reports every path tried. A missing SDK
//! directory is only a warning; the subprocess is started anyway and fails
//! on its own if it really needs the library.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment override for the vendor SDK directory.
pub const SDK_PATH_ENV: &str = "DISCORD_SDK_PATH";
/// Environment override for the subprocess executable.
pub const SUBPROCESS_ENV: &str = "CORDLINK_SUBPROCESS";
/// Base name of the subprocess executable.
pub const SUBPROCESS_NAME: &str = "discord-subprocess";

const CANONICAL_SDK_DIR: &str = "discord_social_sdk";
const VERSIONED_SDK_PREFIX: &str = "DiscordSocialSdk-";

#[cfg(windows)]
const LIB_SUBDIR: &str = "bin/release";
#[cfg(not(windows))]
const LIB_SUBDIR: &str = "lib/release";

/// Directories (relative to each ancestor) that may hold the executable.
const BINARY_SUBDIRS: &[&str] = &[
    "bin",
    "rust-native/target/release",
    "rust-native/target/debug",
];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("{name} not found; searched:{}", format_searched(searched))]
    BinaryNotFound { name: String, searched: Vec<PathBuf> },
}

fn format_searched(searched: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in searched {
        let _ = write!(out, "\n  {}", path.display());
    }
    out
}

/// Inputs to discovery. Environment values are captured up front so the
/// search itself never reads process-global state.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub explicit_binary: Option<PathBuf>,
    pub explicit_sdk_dir: Option<PathBuf>,
    pub env_binary: Option<PathBuf>,
    pub env_sdk_dir: Option<PathBuf>,
    /// Starting point of the upward walk (normally the executable's directory).
    pub search_from: Option<PathBuf>,
    pub system_locations: Vec<PathBuf>,
    /// Fall back to a `PATH` lookup for the executable.
    pub use_path: bool,
}

impl DiscoveryOptions {
    /// Options populated from the process environment and executable location.
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |key: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            explicit_binary: None,
            explicit_sdk_dir: None,
            env_binary: non_empty(SUBPROCESS_ENV),
            env_sdk_dir: non_empty(SDK_PATH_ENV),
            search_from: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            system_locations: default_system_locations(),
            use_path: true,
        }
    }

    #[must_use]
    pub fn with_explicit_binary(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.explicit_binary = path;
        }
        self
    }

    #[must_use]
    pub fn with_explicit_sdk_dir(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.explicit_sdk_dir = path;
        }
        self
    }
}

/// Result of a successful discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub binary: PathBuf,
    pub sdk_lib_dir: Option<PathBuf>,
}

pub fn discover(options: &DiscoveryOptions) -> Result<Discovered, DiscoveryError> {
    let binary = find_binary(options)?;
    let sdk_lib_dir = find_sdk_lib_dir(options);
    if sdk_lib_dir.is_none() {
        tracing::warn!(
            "Discord Social SDK library directory not found; set {SDK_PATH_ENV} if the subprocess fails to load it"
        );
    }
    Ok(Discovered {
        binary,
        sdk_lib_dir,
    })
}

#[must_use]
pub fn binary_file_name() -> String {
    format!("{SUBPROCESS_NAME}{}", std::env::consts::EXE_SUFFIX)
}

pub fn find_binary(options: &DiscoveryOptions) -> Result<PathBuf, DiscoveryError> {
    let name = binary_file_name();
    let mut searched = Vec::new();

    let mut check = |candidate: PathBuf, searched: &mut Vec<PathBuf>| -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(candidate);
        }
        searched.push(candidate);
        None
    };

    for direct in [&options.explicit_binary, &options.env_binary]
        .into_iter()
        .flatten()
    {
        if let Some(found) = check(direct.clone(), &mut searched) {
            return Ok(found);
        }
    }

    if let Some(start) = &options.search_from {
        for dir in start.ancestors() {
            for sub in BINARY_SUBDIRS {
                if let Some(found) = check(dir.join(sub).join(&name), &mut searched) {
                    return Ok(found);
                }
            }
        }
    }

    for location in &options.system_locations {
        for candidate in [location.join("bin").join(&name), location.join(&name)] {
            if let Some(found) = check(candidate, &mut searched) {
                return Ok(found);
            }
        }
    }

    if options.use_path {
        match which::which(&name) {
            Ok(found) => return Ok(found),
            Err(_) => searched.push(PathBuf::from(format!("$PATH/{name}"))),
        }
    }

    Err(DiscoveryError::BinaryNotFound { name, searched })
}

#[must_use]
pub fn find_sdk_lib_dir(options: &DiscoveryOptions) -> Option<PathBuf> {
    for direct in [&options.explicit_sdk_dir, &options.env_sdk_dir]
        .into_iter()
        .flatten()
    {
        if let Some(found) = sdk_lib_dir_at(direct) {
            return Some(found);
        }
        tracing::debug!(path = %direct.display(), "SDK override does not contain a library directory");
    }

    if let Some(start) = &options.search_from {
        for dir in start.ancestors() {
            if let Some(found) = find_sdk_in_directory(dir) {
                return Some(found);
            }
        }
    }

    options
        .system_locations
        .iter()
        .filter(|location| location.is_dir())
        .find_map(|location| sdk_lib_dir_at(location))
}

/// Resolve a path that is an SDK root, a parent of one, or a directory of
/// versioned SDK folders.
fn sdk_lib_dir_at(path: &Path) -> Option<PathBuf> {
    let direct = path.join(LIB_SUBDIR);
    if direct.is_dir() {
        return Some(direct);
    }
    let nested = path.join(CANONICAL_SDK_DIR).join(LIB_SUBDIR);
    if nested.is_dir() {
        return Some(nested);
    }
    find_sdk_in_directory(path)
}

/// Version of an SDK folder. The unversioned canonical folder outranks every
/// versioned one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SdkVersion {
    Versioned(Vec<u64>),
    Canonical,
}

impl SdkVersion {
    pub(crate) fn parse(raw: &str) -> Self {
        let segments = raw
            .split(['.', '-', '_'])
            .map(|seg| {
                let digits: String = seg.chars().take_while(char::is_ascii_digit).collect();
                digits.parse::<u64>().unwrap_or(0)
            })
            .collect();
        Self::Versioned(segments)
    }
}

fn find_sdk_in_directory(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut best: Option<(SdkVersion, PathBuf)> = None;

    for entry in entries.flatten() {
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let candidate = if name == CANONICAL_SDK_DIR {
            (SdkVersion::Canonical, entry.path().join(LIB_SUBDIR))
        } else if let Some(version) = name.strip_prefix(VERSIONED_SDK_PREFIX) {
            (
                SdkVersion::parse(version),
                entry.path().join(CANONICAL_SDK_DIR).join(LIB_SUBDIR),
            )
        } else {
            continue;
        };

        if !candidate.1.is_dir() {
            continue;
        }
        let better = match &best {
            None => true,
            Some((current, _)) => candidate.0.cmp(current) == Ordering::Greater,
        };
        if better {
            best = Some(candidate);
        }
    }

    best.map(|(_, path)| path)
}

#[must_use]
pub fn default_system_locations() -> Vec<PathBuf> {
    let home = dirs::home_dir();
    let mut locations = Vec::new();
    if cfg!(target_os = "windows") {
        locations.push(PathBuf::from(r"C:\Discord SDK"));
        locations.push(PathBuf::from(r"C:\Program Files\Discord SDK"));
    } else if cfg!(target_os = "macos") {
        locations.push(PathBuf::from("/opt/discord-sdk"));
        if let Some(home) = home {
            locations.push(home.join(".discord-sdk"));
        }
    } else {
        locations.push(PathBuf::from("/opt/discord-sdk"));
        locations.push(PathBuf::from("/usr/local/discord-sdk"));
        if let Some(home) = home {
            locations.push(home.join(".discord-sdk"));
        }
    }
    locations
}
