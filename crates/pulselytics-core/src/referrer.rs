use serde::{Deserialize, Serialize};
use url::Url;

/// Traffic-source category for a referrer URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferrerClass {
    Direct,
    Search,
    Social,
    Email,
    Other,
    Unknown,
}

impl ReferrerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferrerClass::Direct => "direct",
            ReferrerClass::Search => "search",
            ReferrerClass::Social => "social",
            ReferrerClass::Email => "email",
            ReferrerClass::Other => "other",
            ReferrerClass::Unknown => "unknown",
        }
    }
}

const SEARCH_HOSTS: &[&str] = &[
    "google.",
    "bing.com",
    "yahoo.com",
    "duckduckgo.com",
    "baidu.com",
    "yandex.ru",
];

const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "linkedin.com",
    "pinterest.com",
    "reddit.com",
    "t.co",
];

const EMAIL_HOSTS: &[&str] = &[
    "gmail.",
    "outlook.com",
    "mail.",
    "yahoo.",
];

/// Classify a referrer URL into a traffic-source category.
///
/// Missing or empty referrer means the visitor arrived directly. An
/// unparseable string is `Unknown`. Hostname matching is a substring scan
/// over the fixed lists, search before social before email; the order is a
/// deliberate tie-break (`yahoo.` sits in both the search and email lists,
/// so yahoo.com referrers classify as search).
pub fn classify(referrer: Option<&str>) -> ReferrerClass {
    let raw = match referrer {
        None => return ReferrerClass::Direct,
        Some(r) if r.is_empty() => return ReferrerClass::Direct,
        Some(r) => r,
    };

    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return ReferrerClass::Unknown,
    };
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();

    if SEARCH_HOSTS.iter().any(|needle| host.contains(needle)) {
        ReferrerClass::Search
    } else if SOCIAL_HOSTS.iter().any(|needle| host.contains(needle)) {
        ReferrerClass::Social
    } else if EMAIL_HOSTS.iter().any(|needle| host.contains(needle)) {
        ReferrerClass::Email
    } else {
        ReferrerClass::Other
    }
}
