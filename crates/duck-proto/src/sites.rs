//! URL match patterns and per-site page classification.
//!
//! Patterns follow the browser extension match-pattern shape
//! `<scheme>://<host>/<path>`:
//!
//! - scheme: `*` (http or https), `http`, or `https`
//! - host: `*`, `*.example.com` (the domain and every subdomain), or an exact host
//! - path: a glob where `*` matches any run of characters; it is matched
//!   against the path plus query string
//!
//! A tab's tracked-kind membership is purely a function of its current URL.

use std::str::FromStr;

use regex::Regex;
use url::Url;

use crate::config::SitesConfig;
use crate::protocol::SourceKind;
use crate::ProtoError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemePattern {
    HttpOrHttps,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Subdomains(String),
    Exact(String),
}

#[derive(Debug, Clone)]
pub struct UrlPattern {
    raw: String,
    scheme: SchemePattern,
    host: HostPattern,
    path: Regex,
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for UrlPattern {}

impl UrlPattern {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, url: &Url) -> bool {
        let scheme_ok = match &self.scheme {
            SchemePattern::HttpOrHttps => matches!(url.scheme(), "http" | "https"),
            SchemePattern::Exact(s) => url.scheme() == s,
        };
        if !scheme_ok {
            return false;
        }

        let host = match url.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return false,
        };
        let host_ok = match &self.host {
            HostPattern::Any => true,
            HostPattern::Exact(h) => host == *h,
            HostPattern::Subdomains(domain) => {
                host == *domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
        };
        if !host_ok {
            return false;
        }

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        self.path.is_match(&target)
    }
}

impl FromStr for UrlPattern {
    type Err = ProtoError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ProtoError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        let (scheme, rest) = raw.split_once("://").ok_or_else(|| invalid("missing ://"))?;
        let scheme = match scheme {
            "*" => SchemePattern::HttpOrHttps,
            "http" | "https" => SchemePattern::Exact(scheme.to_string()),
            _ => return Err(invalid("unsupported scheme")),
        };

        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => return Err(invalid("missing path")),
        };
        let host = host.to_ascii_lowercase();
        let host = if host == "*" {
            HostPattern::Any
        } else if let Some(domain) = host.strip_prefix("*.") {
            if domain.is_empty() || domain.contains('*') {
                return Err(invalid("bad wildcard host"));
            }
            HostPattern::Subdomains(domain.to_string())
        } else if host.is_empty() || host.contains('*') {
            return Err(invalid("bad host"));
        } else {
            HostPattern::Exact(host)
        };

        let path = path_regex(path).map_err(|_| invalid("bad path"))?;

        Ok(Self {
            raw: raw.to_string(),
            scheme,
            host,
            path,
        })
    }
}

/// Anchored regex for a path glob where `*` is the only wildcard.
fn path_regex(glob: &str) -> Result<Regex, regex::Error> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
}

/// A set of patterns describing one site.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiteMatcher {
    patterns: Vec<UrlPattern>,
}

impl SiteMatcher {
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ProtoError> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().parse())
            .collect::<Result<Vec<UrlPattern>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.patterns.iter().any(|p| p.matches(url))
    }

    /// Unparseable URLs never match.
    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).map(|u| self.matches(&u)).unwrap_or(false)
    }

    pub fn raw_patterns(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.raw.clone()).collect()
    }
}

/// All sites the coordinator knows about: the tracked video sites and the
/// audio-player site.
#[derive(Debug, Clone)]
pub struct Sites {
    youtube: SiteMatcher,
    instagram: SiteMatcher,
    player: SiteMatcher,
}

impl Sites {
    pub fn from_config(config: &SitesConfig) -> Result<Self, ProtoError> {
        Ok(Self {
            youtube: SiteMatcher::parse(&config.youtube)?,
            instagram: SiteMatcher::parse(&config.instagram)?,
            player: SiteMatcher::parse(&config.player)?,
        })
    }

    pub fn tracked(&self, kind: SourceKind) -> &SiteMatcher {
        match kind {
            SourceKind::YouTube => &self.youtube,
            SourceKind::Instagram => &self.instagram,
        }
    }

    pub fn player(&self) -> &SiteMatcher {
        &self.player
    }

    pub fn is_tracked_url(&self, kind: SourceKind, url: &str) -> bool {
        self.tracked(kind).matches_str(url)
    }

    pub fn is_player_url(&self, url: &str) -> bool {
        self.player.matches_str(url)
    }

    /// The tracked kind a URL belongs to, if any.
    pub fn kind_for_url(&self, url: &str) -> Option<SourceKind> {
        let parsed = Url::parse(url).ok()?;
        SourceKind::ALL
            .into_iter()
            .find(|kind| self.tracked(*kind).matches(&parsed))
    }

    /// Whether `url` is a page of `kind` that actually hosts a video.
    pub fn is_video_page(&self, kind: SourceKind, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !self.tracked(kind).matches(&parsed) {
            return false;
        }
        match kind {
            SourceKind::YouTube => {
                (parsed.path() == "/watch" && parsed.query_pairs().any(|(k, _)| k == "v"))
                    || parsed.path().starts_with("/shorts/")
            }
            SourceKind::Instagram => true,
        }
    }

    /// Whether `url` is a video page of any tracked kind.
    pub fn looks_like_video_page(&self, url: &str) -> bool {
        SourceKind::ALL
            .into_iter()
            .any(|kind| self.is_video_page(kind, url))
    }

    /// Every pattern of every site, for startup injection queries.
    pub fn all_patterns(&self) -> Vec<String> {
        let mut all = self.youtube.raw_patterns();
        all.extend(self.instagram.raw_patterns());
        all.extend(self.player.raw_patterns());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Default for Sites {
        fn default() -> Self {
            Self::from_config(&SitesConfig::default()).unwrap()
        }
    }

    fn pattern(raw: &str) -> UrlPattern {
        raw.parse().unwrap()
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_wildcard_scheme_matches_http_and_https_only() {
        let p = pattern("*://open.spotify.com/*");
        assert!(p.matches(&url("https://open.spotify.com/")));
        assert!(p.matches(&url("http://open.spotify.com/album/1")));
        assert!(!p.matches(&url("ftp://open.spotify.com/")));
        assert!(!p.matches(&url("https://spotify.com/")));
    }

    #[test]
    fn test_subdomain_wildcard() {
        let p = pattern("https://*.example.com/*");
        assert!(p.matches(&url("https://example.com/")));
        assert!(p.matches(&url("https://a.b.example.com/x")));
        assert!(!p.matches(&url("https://badexample.com/")));
    }

    #[test]
    fn test_path_glob_sees_query() {
        let p = pattern("*://www.youtube.com/watch*");
        assert!(p.matches(&url("https://www.youtube.com/watch?v=abc")));
        assert!(!p.matches(&url("https://www.youtube.com/feed")));
        let re = path_regex("/a*b*c").unwrap();
        assert!(re.is_match("/axxbyyc"));
        assert!(!re.is_match("/axxbyy"));
        // Everything but `*` is literal.
        let re = path_regex("/v1.0/?x=[1]").unwrap();
        assert!(re.is_match("/v1.0/?x=[1]"));
        assert!(!re.is_match("/v100/?x=1"));
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!("youtube.com".parse::<UrlPattern>().is_err());
        assert!("gopher://x.com/*".parse::<UrlPattern>().is_err());
        assert!("*://x.com".parse::<UrlPattern>().is_err());
        assert!("*://foo*.com/*".parse::<UrlPattern>().is_err());
    }

    #[test]
    fn test_default_sites_classification() {
        let sites = Sites::default();
        assert_eq!(
            sites.kind_for_url("https://m.youtube.com/"),
            Some(SourceKind::YouTube)
        );
        assert_eq!(
            sites.kind_for_url("https://instagram.com/reels/"),
            Some(SourceKind::Instagram)
        );
        assert_eq!(sites.kind_for_url("https://example.com/"), None);
        assert_eq!(sites.kind_for_url("not a url"), None);
        assert!(sites.is_player_url("https://open.spotify.com/"));
    }

    #[test]
    fn test_video_page_rules() {
        let sites = Sites::default();
        assert!(sites.is_video_page(SourceKind::YouTube, "https://www.youtube.com/watch?v=abc"));
        assert!(sites.is_video_page(SourceKind::YouTube, "https://youtube.com/shorts/xyz"));
        assert!(!sites.is_video_page(SourceKind::YouTube, "https://www.youtube.com/watch"));
        assert!(!sites.is_video_page(SourceKind::YouTube, "https://www.youtube.com/"));
        assert!(sites.is_video_page(SourceKind::Instagram, "https://www.instagram.com/"));
        assert!(!sites.looks_like_video_page("https://example.com/watch?v=1"));
    }
}
