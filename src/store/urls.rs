use serde::{Deserialize, Serialize};

use crate::error::{DelveError, DelveResult};

/// Canonicalize a URL: lowercase scheme and host, drop default ports,
/// strip the fragment, keep the query string. Idempotent.
pub fn canonicalize(url: &str) -> String {
    let url = url.trim();
    let without_fragment = url.split('#').next().unwrap_or(url);

    let (scheme, rest) = match without_fragment.split_once("://") {
        Some((s, r)) => (s.to_lowercase(), r),
        None => return without_fragment.to_string(),
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let mut host = authority.to_lowercase();
    let default_port = match scheme.as_str() {
        "http" => ":80",
        "https" => ":443",
        _ => "",
    };
    if !default_port.is_empty() && host.ends_with(default_port) {
        host.truncate(host.len() - default_port.len());
    }

    format!("{scheme}://{host}{path_and_query}")
}

/// Hostname portion of a canonical URL, without port.
pub fn hostname_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let authority = rest.split('/').next()?;
    let host = authority.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Multiplicative boost for authoritative hosts.
pub fn hostname_boost(hostname: &str) -> f32 {
    const TRUSTED: [&str; 6] = [
        "wikipedia.org",
        "arxiv.org",
        "github.com",
        "stackoverflow.com",
        "docs.rs",
        "rust-lang.org",
    ];
    if TRUSTED.iter().any(|t| hostname.ends_with(t)) {
        1.5
    } else {
        1.0
    }
}

/// Multiplicative boost for documentation-shaped paths.
pub fn path_boost(url: &str) -> f32 {
    if url.contains("/docs/")
        || url.contains("/documentation/")
        || url.contains("/guide/")
        || url.contains("/tutorial/")
    {
        1.3
    } else if url.contains("/blog/") || url.contains("/news/") {
        1.1
    } else {
        1.0
    }
}

/// A URL discovered during search, before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCandidate {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Optional rerank factor from the search provider; multiplied in
    /// when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<f32>,
}

impl UrlCandidate {
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            rerank: None,
        }
    }

    pub fn with_rerank(mut self, factor: f32) -> Self {
        self.rerank = Some(factor);
        self
    }
}

/// A scored, canonical URL in the store.
///
/// `visited` only ever flips false → true. Scores are recomputed when the
/// same URL is rediscovered (frequency boost); everything else is fixed at
/// insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub hostname: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
    pub visited: bool,
    /// Step at which the URL was first discovered; breaks score ties.
    pub discovered_at: u32,
    /// How many searches produced this URL.
    pub frequency: u32,
    base_score: f32,
}

/// Dedup set of URLs, unique by canonical form.
#[derive(Debug, Default)]
pub struct UrlStore {
    records: Vec<UrlRecord>,
}

impl UrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-discover a URL. The score is the product
    /// query-weight × frequency × hostname-boost × path-boost × rerank.
    /// Returns the canonical URL.
    pub fn add(&mut self, candidate: UrlCandidate, query_weight: f32, step: u32) -> DelveResult<String> {
        if query_weight < 0.0 {
            return Err(DelveError::Invariant(format!(
                "negative query weight {query_weight} for {}",
                candidate.url
            )));
        }
        let canonical = canonicalize(&candidate.url);
        let hostname = hostname_of(&canonical).unwrap_or_default();

        if let Some(existing) = self.records.iter_mut().find(|r| r.url == canonical) {
            existing.frequency += 1;
            existing.score = existing.base_score * existing.frequency as f32;
            return Ok(canonical);
        }

        let base = query_weight
            * hostname_boost(&hostname)
            * path_boost(&canonical)
            * candidate.rerank.unwrap_or(1.0);

        self.records.push(UrlRecord {
            url: canonical.clone(),
            hostname,
            title: candidate.title,
            snippet: candidate.snippet,
            score: base,
            visited: false,
            discovered_at: step,
            frequency: 1,
            base_score: base,
        });
        Ok(canonical)
    }

    pub fn get(&self, url: &str) -> Option<&UrlRecord> {
        let canonical = canonicalize(url);
        self.records.iter().find(|r| r.url == canonical)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn visited_count(&self) -> usize {
        self.records.iter().filter(|r| r.visited).count()
    }

    pub fn unvisited_count(&self) -> usize {
        self.records.iter().filter(|r| !r.visited).count()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.get(url).map(|r| r.visited).unwrap_or(false)
    }

    /// Mark a URL as read. One-way; unknown URLs are ignored.
    pub fn mark_visited(&mut self, url: &str) {
        let canonical = canonicalize(url);
        if let Some(record) = self.records.iter_mut().find(|r| r.url == canonical) {
            record.visited = true;
        }
    }

    /// Highest-scored unvisited records; ties broken by discovery order
    /// (earlier first).
    pub fn top_unvisited(&self, n: usize) -> Vec<&UrlRecord> {
        let mut unvisited: Vec<&UrlRecord> = self.records.iter().filter(|r| !r.visited).collect();
        unvisited.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.discovered_at.cmp(&b.discovered_at))
        });
        unvisited.into_iter().take(n).collect()
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<&UrlRecord>
    where
        P: Fn(&UrlRecord) -> bool,
    {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UrlRecord> {
        self.records.iter()
    }

    pub fn visited_urls(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.visited)
            .map(|r| r.url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_lowercases_and_strips() {
        assert_eq!(
            canonicalize("HTTPS://Example.COM:443/Path?q=1#frag"),
            "https://example.com/Path?q=1"
        );
        assert_eq!(
            canonicalize("http://example.com:80/"),
            "http://example.com/"
        );
        // Non-default port preserved
        assert_eq!(
            canonicalize("http://example.com:8080/x"),
            "http://example.com:8080/x"
        );
        // Bare authority gets a path
        assert_eq!(canonicalize("https://example.com"), "https://example.com/");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let urls = [
            "HTTPS://Example.COM:443/Path?q=1#frag",
            "http://a.b/c",
            "https://x.y:8443/z?a=b#c",
        ];
        for u in urls {
            let once = canonicalize(u);
            assert_eq!(canonicalize(&once), once);
        }
    }

    #[test]
    fn unique_by_canonical_form() {
        let mut store = UrlStore::new();
        store
            .add(UrlCandidate::new("https://Example.com/a", "A", ""), 1.0, 0)
            .unwrap();
        store
            .add(UrlCandidate::new("https://example.com/a#sec", "A", ""), 1.0, 1)
            .unwrap();
        assert_eq!(store.len(), 1);
        // Re-discovery raises the frequency boost
        assert_eq!(store.get("https://example.com/a").unwrap().frequency, 2);
    }

    #[test]
    fn score_is_product_of_boosts() {
        let mut store = UrlStore::new();
        store
            .add(
                UrlCandidate::new("https://github.com/docs/thing", "T", "").with_rerank(2.0),
                1.2,
                0,
            )
            .unwrap();
        let record = store.get("https://github.com/docs/thing").unwrap();
        // 1.2 (weight) * 1.5 (hostname) * 1.3 (path) * 2.0 (rerank)
        assert!((record.score - 4.68).abs() < 1e-4);
    }

    #[test]
    fn rediscovery_multiplies_frequency() {
        let mut store = UrlStore::new();
        for step in 0..3 {
            store
                .add(UrlCandidate::new("https://plain.example.com/x", "X", ""), 1.0, step)
                .unwrap();
        }
        let record = store.get("https://plain.example.com/x").unwrap();
        assert_eq!(record.frequency, 3);
        assert!((record.score - 3.0).abs() < 1e-5);
        assert_eq!(record.discovered_at, 0);
    }

    #[test]
    fn negative_weight_is_invariant_violation() {
        let mut store = UrlStore::new();
        let err = store
            .add(UrlCandidate::new("https://a.example.com/", "A", ""), -1.0, 0)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn top_unvisited_orders_by_score_then_discovery() {
        let mut store = UrlStore::new();
        store
            .add(UrlCandidate::new("https://low.example.com/", "low", ""), 1.0, 0)
            .unwrap();
        store
            .add(UrlCandidate::new("https://high.example.com/docs/", "high", ""), 1.0, 1)
            .unwrap();
        store
            .add(UrlCandidate::new("https://tie-late.example.com/", "late", ""), 1.0, 2)
            .unwrap();

        let top = store.top_unvisited(3);
        assert_eq!(top[0].url, "https://high.example.com/docs/");
        // Equal scores: earlier discovery wins
        assert_eq!(top[1].url, "https://low.example.com/");
        assert_eq!(top[2].url, "https://tie-late.example.com/");
    }

    #[test]
    fn mark_visited_is_one_way() {
        let mut store = UrlStore::new();
        store
            .add(UrlCandidate::new("https://a.example.com/", "A", ""), 1.0, 0)
            .unwrap();
        assert!(!store.is_visited("https://a.example.com/"));
        store.mark_visited("https://A.example.com/");
        assert!(store.is_visited("https://a.example.com/"));
        assert_eq!(store.visited_count(), 1);
        assert_eq!(store.unvisited_count(), 0);
    }

    #[test]
    fn filter_by_predicate() {
        let mut store = UrlStore::new();
        store
            .add(UrlCandidate::new("https://a.wikipedia.org/wiki/X", "X", ""), 1.0, 0)
            .unwrap();
        store
            .add(UrlCandidate::new("https://b.example.com/", "B", ""), 1.0, 0)
            .unwrap();
        let wiki = store.filter(|r| r.hostname.ends_with("wikipedia.org"));
        assert_eq!(wiki.len(), 1);
    }

    #[test]
    fn hostname_helpers() {
        assert_eq!(
            hostname_of("https://en.wikipedia.org/wiki/Rust"),
            Some("en.wikipedia.org".into())
        );
        assert!(hostname_boost("en.wikipedia.org") > 1.0);
        assert_eq!(hostname_boost("random.example.com"), 1.0);
        assert!(path_boost("https://x.com/docs/api") > path_boost("https://x.com/about"));
    }
}
