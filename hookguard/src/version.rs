use std::sync::OnceLock;

/// Crate version with the git commit appended when it was known at build
/// time, e.g. `0.1.0+abc1234` or `0.1.0+abc1234-dirty`.
pub fn version_long() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| match option_env!("HOOKGUARD_GIT_HASH") {
        Some(hash) => format!("{}+{}", env!("CARGO_PKG_VERSION"), hash),
        None => env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_starts_with_package_version() {
        assert!(version_long().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
