use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin source of proxy endpoints. An empty pool means direct
/// connections, so `next` simply yields `None`.
#[derive(Debug, Default)]
pub struct ProxyPool {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn direct() -> Self {
        Self::default()
    }

    /// Normalize `host:port` lines into `http://host:port` endpoints. Entries
    /// already carrying a scheme are kept as-is; blank lines are dropped.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let endpoints = lines
            .into_iter()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| {
                if l.contains("://") {
                    l.to_string()
                } else {
                    format!("http://{l}")
                }
            })
            .collect();
        Self::new(endpoints)
    }

    pub fn next(&self) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        Some(&self.endpoints[idx])
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_empty_pool_yields_none() {
        let pool = ProxyPool::direct();
        assert!(pool.is_empty());
        assert_eq!(pool.next(), None);
        assert_eq!(pool.next(), None);
    }

    #[test]
    fn test_round_robin_wraps() {
        let pool = ProxyPool::new(vec!["http://a:1".into(), "http://b:2".into()]);
        assert_eq!(pool.next(), Some("http://a:1"));
        assert_eq!(pool.next(), Some("http://b:2"));
        assert_eq!(pool.next(), Some("http://a:1"));
    }

    #[test]
    fn test_from_lines_normalizes_scheme() {
        let pool = ProxyPool::from_lines("1.2.3.4:8080\n\n  socks5://5.6.7.8:1080 \n# off\n".lines());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.next(), Some("http://1.2.3.4:8080"));
        assert_eq!(pool.next(), Some("socks5://5.6.7.8:1080"));
    }

    #[test]
    fn test_concurrent_callers_spread_evenly() {
        let pool = Arc::new(ProxyPool::new(vec!["a".into(), "b".into(), "c".into()]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..300)
                        .map(|_| pool.next().unwrap().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for h in handles {
            for p in h.join().unwrap() {
                *counts.entry(p).or_default() += 1;
            }
        }
        assert_eq!(counts.values().sum::<usize>(), 1200);
        assert!(counts.values().all(|&c| c == 400));
    }
}
