//! Build identity reported by `--version`, the bootstrap log line, the `build_info` metric and
//! the outbound `User-Agent`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("CATALOG_SYNC_GIT_COMMIT_HASH");
pub const BUILD_PROFILE: &str = env!("CATALOG_SYNC_BUILD_PROFILE");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("CATALOG_SYNC_GIT_COMMIT_HASH")
);

/// First 12 characters of the commit hash, or `"unknown"` when git was unavailable at build time.
pub fn short_commit_hash() -> &'static str {
    if GIT_COMMIT_HASH == "unknown" {
        return GIT_COMMIT_HASH;
    }
    &GIT_COMMIT_HASH[..GIT_COMMIT_HASH.len().min(12)]
}

/// Value sent as `User-Agent` by every provider client.
pub fn user_agent() -> String {
    format!("catalog-sync/{VERSION}+{}", short_commit_hash())
}
