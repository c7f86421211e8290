//! Environment handed to the subprocess.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Variables matching any of these patterns never reach the subprocess.
/// Credentials travel in the `initialize` command instead.
pub const ENV_SECRET_DENYLIST: &[&str] = &["*_TOKEN", "*_SECRET", "*_API_KEY", "AWS_*"];

#[cfg(target_os = "windows")]
pub(crate) const LIBRARY_PATH_VAR: &str = "PATH";
#[cfg(target_os = "macos")]
pub(crate) const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub(crate) const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Minimal glob matcher for env var denylist patterns.
/// Handles `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, and exact match.
/// Both pattern and key are compared in uppercase.
fn env_glob_matches(pattern: &str, key_upper: &str) -> bool {
    let pat = pattern.to_uppercase();
    match (pat.starts_with('*'), pat.ends_with('*')) {
        (true, true) if pat.len() >= 2 => key_upper.contains(&pat[1..pat.len() - 1]),
        (true, true) => true,
        (true, false) => key_upper.ends_with(&pat[1..]),
        (false, true) => key_upper.starts_with(&pat[..pat.len() - 1]),
        (false, false) => key_upper == pat,
    }
}

#[must_use]
pub fn is_secret_var(key: &str) -> bool {
    let upper = key.to_uppercase();
    ENV_SECRET_DENYLIST
        .iter()
        .any(|pat| env_glob_matches(pat, &upper))
}

/// Changes applied on top of the inherited environment.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ChildEnv {
    pub remove: Vec<OsString>,
    pub set: Vec<(OsString, OsString)>,
}

impl ChildEnv {
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        for key in &self.remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.set {
            cmd.env(key, value);
        }
    }
}

/// Compute the child environment from `vars` (normally `std::env::vars_os()`).
pub(crate) fn child_env<I>(vars: I, sdk_lib_dir: Option<&Path>) -> ChildEnv
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env = ChildEnv::default();
    let mut existing_library_path = None;

    for (key, value) in vars {
        if key.to_str().is_some_and(is_secret_var) {
            env.remove.push(key);
            continue;
        }
        if key_is(&key, LIBRARY_PATH_VAR) {
            existing_library_path = Some(value);
        }
    }

    if let Some(dir) = sdk_lib_dir {
        let mut paths: Vec<PathBuf> = vec![dir.to_path_buf()];
        if let Some(existing) = &existing_library_path {
            paths.extend(std::env::split_paths(existing));
        }
        match std::env::join_paths(paths) {
            Ok(joined) => env.set.push((OsString::from(LIBRARY_PATH_VAR), joined)),
            Err(e) => tracing::warn!(
                "Cannot add {} to {LIBRARY_PATH_VAR}: {e}",
                dir.display()
            ),
        }
    }

    env
}

fn key_is(key: &OsStr, name: &str) -> bool {
    if cfg!(windows) {
        key.to_str().is_some_and(|k| k.eq_ignore_ascii_case(name))
    } else {
        key == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn env_glob_suffix_matches() {
        assert!(env_glob_matches("*_TOKEN", "CORDLINK_TOKEN"));
        assert!(env_glob_matches("*_API_KEY", "OPENAI_API_KEY"));
        assert!(!env_glob_matches("*_TOKEN", "TOKENIZER"));
    }

    #[test]
    fn env_glob_prefix_matches() {
        assert!(env_glob_matches("AWS_*", "AWS_ACCESS_KEY_ID"));
        assert!(!env_glob_matches("AWS_*", "MY_AWS"));
    }

    #[test]
    fn secret_check_is_case_insensitive() {
        assert!(is_secret_var("github_token"));
        assert!(is_secret_var("Client_Secret"));
        assert!(!is_secret_var("HOME"));
    }

    #[test]
    fn secrets_are_removed() {
        let env = child_env(
            vars(&[("HOME", "/home/u"), ("CORDLINK_TOKEN", "t"), ("AWS_REGION", "x")]),
            None,
        );
        assert_eq!(
            env.remove,
            vec![OsString::from("CORDLINK_TOKEN"), OsString::from("AWS_REGION")]
        );
        assert!(env.set.is_empty());
    }

    #[test]
    fn sdk_dir_is_prepended_to_library_path() {
        let sep = if cfg!(windows) { ";" } else { ":" };
        let existing = format!("/usr/lib{sep}/opt/lib");
        let env = child_env(
            vars(&[(LIBRARY_PATH_VAR, &existing)]),
            Some(Path::new("/sdk/lib/release")),
        );
        let (key, value) = &env.set[0];
        assert_eq!(key, LIBRARY_PATH_VAR);
        let parts: Vec<PathBuf> = std::env::split_paths(value).collect();
        assert_eq!(parts[0], PathBuf::from("/sdk/lib/release"));
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn sdk_dir_without_existing_library_path() {
        let env = child_env(Vec::new(), Some(Path::new("/sdk/lib/release")));
        assert_eq!(env.set.len(), 1);
        assert_eq!(env.set[0].1, OsString::from("/sdk/lib/release"));
    }
}
