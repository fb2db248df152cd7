use std::fmt;

use url::Url;

/// Scheme/host/port triple used for same-origin decisions.
///
/// An origin with an empty scheme is the placeholder origin of a blank document.
/// Unique origins (e.g. `data:` documents) only match themselves, which in practice
/// means they never match anything through [`SecurityOrigin::can_access`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityOrigin {
    scheme: String,
    host: String,
    port: Option<u16>,
    unique: bool,
    domain: Option<String>,
}

impl SecurityOrigin {
    pub fn from_url(url: &Url) -> Self {
        match url.scheme() {
            "about" | "javascript" => Self::empty(),
            "data" => Self {
                scheme: "data".to_string(),
                host: String::new(),
                port: None,
                unique: true,
                domain: None,
            },
            scheme => Self {
                scheme: scheme.to_string(),
                host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
                port: url.port(),
                unique: false,
                domain: None,
            },
        }
    }

    pub fn empty() -> Self {
        Self {
            scheme: String::new(),
            host: String::new(),
            port: None,
            unique: false,
            domain: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scheme.is_empty()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn protocol(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Relaxes the effective domain the way `document.domain = ...` does.
    ///
    /// Returns false when the new domain is not a suffix of the current host.
    pub fn set_domain_from_dom(&mut self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        let allowed = self.host == domain || self.host.ends_with(&format!(".{domain}"));
        if allowed && !self.unique && !self.is_empty() {
            self.domain = Some(domain);
        }
        allowed
    }

    pub fn domain_was_set_in_dom(&self) -> bool {
        self.domain.is_some()
    }

    pub fn can_access(&self, other: &SecurityOrigin) -> bool {
        if self.unique || other.unique {
            return false;
        }
        if self.scheme != other.scheme {
            return false;
        }
        match (&self.domain, &other.domain) {
            (Some(mine), Some(theirs)) => mine == theirs,
            (None, None) => self.host == other.host && self.port == other.port,
            _ => false,
        }
    }

    /// Serialization used to derive security tokens. Empty and unique origins
    /// serialize to `"null"`.
    pub fn to_token_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SecurityOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() || self.unique {
            return f.write_str("null");
        }
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(url: &str) -> SecurityOrigin {
        SecurityOrigin::from_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn same_origin_built_independently_matches() {
        assert!(origin("https://a.example/one").can_access(&origin("https://a.example/two")));
    }

    #[test]
    fn host_scheme_and_port_must_match() {
        let base = origin("https://a.example/");
        assert!(!base.can_access(&origin("https://b.example/")));
        assert!(!base.can_access(&origin("http://a.example/")));
        assert!(!base.can_access(&origin("https://a.example:8443/")));
    }

    #[test]
    fn blank_and_data_origins_serialize_as_null() {
        assert!(origin("about:blank").is_empty());
        assert_eq!(origin("about:blank").to_token_string(), "null");
        assert_eq!(origin("data:text/html,hi").to_token_string(), "null");
        assert_eq!(origin("https://a.example:444/x").to_token_string(), "https://a.example:444");
    }

    #[test]
    fn relaxed_domains_compare_by_domain() {
        let mut left = origin("https://one.shop.example/");
        let mut right = origin("https://two.shop.example/");
        assert!(!left.can_access(&right));
        assert!(left.set_domain_from_dom("shop.example"));
        assert!(!left.can_access(&right));
        assert!(right.set_domain_from_dom("shop.example"));
        assert!(left.can_access(&right));
        assert!(!right.set_domain_from_dom("other.example"));
    }
}
