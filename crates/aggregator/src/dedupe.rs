//! URL fingerprinting and result merging.
//!
//! Two results are duplicates when their normalized URLs match. Merging
//! keeps the richest text and remembers every contributing engine together
//! with the position the result held in that engine's list, which ranking
//! consumes.

use std::collections::HashMap;

use ms_domain::SearchResult;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fingerprint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Query parameters that only identify the click, not the document.
fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_")
        || matches!(
            name,
            "fbclid" | "gclid" | "msclkid" | "mc_cid" | "mc_eid" | "ref" | "referrer"
        )
}

/// Normalize a URL into its dedup key:
///
/// scheme is dropped (http and https collapse), host is lowercased with a
/// leading `www.` and default ports removed, the fragment is dropped,
/// tracking parameters are removed, and a trailing slash on a non-root path
/// is stripped. Unparseable URLs fall back to the trimmed, lowercased raw
/// string so identical strings still collapse.
pub fn fingerprint(raw: &str) -> String {
    let Ok(parsed) = url::Url::parse(raw) else {
        return raw.trim().to_lowercase();
    };
    let Some(host) = parsed.host_str() else {
        return raw.trim().to_lowercase();
    };

    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut out = String::with_capacity(raw.len());
    out.push_str(host);
    // `Url::port` is `None` for the scheme's default port, which is exactly
    // the strip-defaults rule.
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    let mut path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    out.push_str(&path);

    let surviving: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !surviving.is_empty() {
        out.push('?');
        for (i, (k, v)) in surviving.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(k);
            if !v.is_empty() {
                out.push('=');
                out.push_str(v);
            }
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One engine's claim on a merged result.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub engine: String,
    pub weight: f64,
    /// 0-based rank inside that engine's result list.
    pub position: usize,
}

/// A deduplicated result plus everything ranking needs.
#[derive(Debug)]
pub struct MergedResult {
    pub result: SearchResult,
    pub fingerprint: String,
    pub contributions: Vec<Contribution>,
}

/// Collapse per-engine result lists into one deduplicated list.
///
/// Input order is the deterministic engine selection order; within an
/// engine, upstream rank order. The output preserves first-seen order
/// (ranking re-sorts it anyway).
pub fn merge(per_engine: &[(String, f64, Vec<SearchResult>)]) -> Vec<MergedResult> {
    let mut order: Vec<String> = Vec::new();
    let mut by_fp: HashMap<String, MergedResult> = HashMap::new();

    for (engine, weight, results) in per_engine {
        for (position, result) in results.iter().enumerate() {
            let fp = fingerprint(&result.url);
            let contribution = Contribution {
                engine: engine.clone(),
                weight: *weight,
                position,
            };

            match by_fp.get_mut(&fp) {
                None => {
                    let mut seed = result.clone();
                    seed.engines = vec![engine.clone()];
                    seed.engine = engine.clone();
                    order.push(fp.clone());
                    by_fp.insert(
                        fp.clone(),
                        MergedResult {
                            result: seed,
                            fingerprint: fp,
                            contributions: vec![contribution],
                        },
                    );
                }
                Some(merged) => {
                    if result.title.len() > merged.result.title.len() {
                        merged.result.title = result.title.clone();
                    }
                    if result.content.len() > merged.result.content.len() {
                        merged.result.content = result.content.clone();
                    }
                    if merged.result.thumbnail.is_none() {
                        merged.result.thumbnail = result.thumbnail.clone();
                    }
                    if merged.result.published_at.is_none() {
                        merged.result.published_at = result.published_at;
                    }
                    if !merged.result.engines.iter().any(|e| e == engine) {
                        merged.result.engines.push(engine.clone());
                    }
                    merged.contributions.push(contribution);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|fp| by_fp.remove(&fp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_domain::Category;

    #[test]
    fn fingerprint_normalizes_tracking_scheme_and_slash() {
        // The spec's S2 pair.
        assert_eq!(
            fingerprint("https://www.Example.com/path/?utm_source=x#frag"),
            "example.com/path"
        );
        assert_eq!(fingerprint("http://example.com/path"), "example.com/path");
    }

    #[test]
    fn fingerprint_strips_default_port_keeps_custom() {
        assert_eq!(fingerprint("https://example.com:443/a"), "example.com/a");
        assert_eq!(fingerprint("http://example.com:80/a"), "example.com/a");
        assert_eq!(
            fingerprint("http://example.com:8080/a"),
            "example.com:8080/a"
        );
    }

    #[test]
    fn fingerprint_keeps_meaningful_query_params() {
        assert_eq!(
            fingerprint("https://example.com/search?q=rust&utm_campaign=x&fbclid=y"),
            "example.com/search?q=rust"
        );
    }

    #[test]
    fn fingerprint_root_slash_is_kept() {
        assert_eq!(fingerprint("https://example.com/"), "example.com/");
    }

    #[test]
    fn fingerprint_unparseable_falls_back_to_raw() {
        assert_eq!(fingerprint("  Not A Url  "), "not a url");
    }

    fn r(engine: &str, title: &str, url: &str, content: &str) -> SearchResult {
        SearchResult::new(engine, title, url, content, Category::General)
    }

    #[test]
    fn merge_unions_contributors_and_keeps_longest_text() {
        let per_engine = vec![
            (
                "e1".to_string(),
                1.0,
                vec![r("e1", "Rust", "https://www.rust-lang.org/", "short")],
            ),
            (
                "e2".to_string(),
                0.8,
                vec![r(
                    "e2",
                    "Rust Programming Language",
                    "https://rust-lang.org/",
                    "a longer snippet about rust",
                )],
            ),
        ];
        let merged = merge(&per_engine);
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.result.engines, vec!["e1", "e2"]);
        assert_eq!(m.result.title, "Rust Programming Language");
        assert_eq!(m.result.content, "a longer snippet about rust");
        assert_eq!(m.contributions.len(), 2);
        assert_eq!(m.contributions[0].position, 0);
    }

    #[test]
    fn merge_keeps_distinct_urls_apart() {
        let per_engine = vec![(
            "e1".to_string(),
            1.0,
            vec![
                r("e1", "A", "https://a.example/", "a"),
                r("e1", "B", "https://b.example/", "b"),
            ],
        )];
        assert_eq!(merge(&per_engine).len(), 2);
    }
}
