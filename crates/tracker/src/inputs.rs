use anyhow::{Context, Result};
use common::proxy_pool::ProxyPool;
use std::path::Path;

/// One wallet per line. Surrounding whitespace and blank lines are ignored;
/// order is preserved and duplicates are kept.
pub fn parse_wallets(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_wallets(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading wallet list {}", path.display()))?;
    Ok(parse_wallets(&content))
}

/// No path means direct connections. A configured path that cannot be read is
/// an error.
pub fn load_proxy_pool(path: Option<&Path>) -> Result<ProxyPool> {
    let Some(path) = path else {
        return Ok(ProxyPool::direct());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading proxy list {}", path.display()))?;
    let pool = ProxyPool::from_lines(content.lines());
    if pool.is_empty() {
        tracing::warn!(path = %path.display(), "proxy list is empty, using direct connections");
    }
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wallets_trims_and_skips_blanks() {
        let wallets = parse_wallets("  0xABC \n\n\tallo1xyz\n   \n0xABC\n");
        assert_eq!(wallets, vec!["0xABC", "allo1xyz", "0xABC"]);
    }

    #[test]
    fn test_read_wallets_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_wallets(&dir.path().join("nope.txt")).unwrap_err();
        assert!(err.to_string().contains("reading wallet list"));
    }

    #[test]
    fn test_load_proxy_pool_normalizes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "1.2.3.4:8080\n\nsocks5://5.6.7.8:1080\n").unwrap();

        let pool = load_proxy_pool(Some(&path)).unwrap();
        assert_eq!(
            pool.endpoints(),
            &["http://1.2.3.4:8080".to_string(), "socks5://5.6.7.8:1080".to_string()]
        );
    }

    #[test]
    fn test_load_proxy_pool_without_path_is_direct() {
        assert!(load_proxy_pool(None).unwrap().is_empty());
    }

    #[test]
    fn test_load_proxy_pool_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_proxy_pool(Some(&dir.path().join("missing.txt"))).is_err());
    }
}
