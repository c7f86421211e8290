//! Out-of-band OAuth token marker on the subprocess error stream.
//!
//! The subprocess prints a line shaped like
//! `OAuth_TOKEN_FOR_STORAGE: access=<tok>,refresh=<tok|NONE>,expires=<secs>,type=<int>`
//! after a successful token exchange. It may be preceded by a log prefix.

use std::sync::LazyLock;

use regex::Regex;

use cordlink_types::OAuthToken;

const MARKER: &str = "OAuth_TOKEN_FOR_STORAGE:";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"OAuth_TOKEN_FOR_STORAGE:\s*access=([^,\s]+),refresh=([^,\s]+),expires=(\d+),type=(-?\d+)",
    )
    .expect("token marker regex is valid")
});

/// Whether `line` carries the marker at all (even if malformed).
#[must_use]
pub fn contains_marker(line: &str) -> bool {
    line.contains(MARKER)
}

/// Extract token material from a stderr line, if it carries a well-formed marker.
#[must_use]
pub fn parse_token_marker(line: &str) -> Option<OAuthToken> {
    let caps = MARKER_RE.captures(line)?;
    let refresh = &caps[2];
    Some(OAuthToken {
        access_token: caps[1].to_string(),
        refresh_token: (refresh != "NONE").then(|| refresh.to_string()),
        expires_in_secs: caps[3].parse().ok()?,
        token_type: caps[4].parse().ok()?,
    })
}
