//! SIP header map
//!
//! Keys compare case-insensitively and keep their first-seen position.
//! A repeated header overwrites the earlier value, except for the routing
//! headers (`Via`, `Record-Route`, `Route`) whose repeats are folded into one
//! comma-separated value so that responses can echo every hop in order.

use std::fmt;

/// Canonical header names used by the stack
pub mod names {
    pub const VIA: &str = "Via";
    pub const FROM: &str = "From";
    pub const TO: &str = "To";
    pub const CALL_ID: &str = "Call-ID";
    pub const CSEQ: &str = "CSeq";
    pub const CONTACT: &str = "Contact";
    pub const MAX_FORWARDS: &str = "Max-Forwards";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const EXPIRES: &str = "Expires";
    pub const USER_AGENT: &str = "User-Agent";
    pub const ALLOW: &str = "Allow";
    pub const SUPPORTED: &str = "Supported";
    pub const SUBJECT: &str = "Subject";
    pub const RECORD_ROUTE: &str = "Record-Route";
    pub const ROUTE: &str = "Route";
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
    pub const PROXY_AUTHENTICATE: &str = "Proxy-Authenticate";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
}

/// Expand compact forms (RFC 3261 §7.3.3) and fix the casing of known names
pub fn canonical_name(name: &str) -> String {
    let canonical = match name.to_ascii_lowercase().as_str() {
        "v" | "via" => names::VIA,
        "f" | "from" => names::FROM,
        "t" | "to" => names::TO,
        "i" | "call-id" => names::CALL_ID,
        "cseq" => names::CSEQ,
        "m" | "contact" => names::CONTACT,
        "c" | "content-type" => names::CONTENT_TYPE,
        "l" | "content-length" => names::CONTENT_LENGTH,
        "k" | "supported" => names::SUPPORTED,
        "s" | "subject" => names::SUBJECT,
        "max-forwards" => names::MAX_FORWARDS,
        "expires" => names::EXPIRES,
        "user-agent" => names::USER_AGENT,
        "allow" => names::ALLOW,
        "record-route" => names::RECORD_ROUTE,
        "route" => names::ROUTE,
        "www-authenticate" => names::WWW_AUTHENTICATE,
        "proxy-authenticate" => names::PROXY_AUTHENTICATE,
        "authorization" => names::AUTHORIZATION,
        "proxy-authorization" => names::PROXY_AUTHORIZATION,
        _ => return name.to_string(),
    };
    canonical.to_string()
}

fn is_folded(name: &str) -> bool {
    [names::VIA, names::RECORD_ROUTE, names::ROUTE]
        .iter()
        .any(|folded| folded.eq_ignore_ascii_case(name))
}

/// Ordered, case-insensitive header map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Value of a header, looked up by full or compact name
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = canonical_name(name);
        self.position(&name).map(|i| self.entries[i].1.as_str())
    }

    /// Whether the header is present
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a header, replacing any previous value in place
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = canonical_name(name);
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Add a header as parsed from the wire: routing headers fold, others
    /// overwrite
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let name = canonical_name(name);
        let value = value.into();
        match self.position(&name) {
            Some(i) if is_folded(&name) => {
                let existing = &mut self.entries[i].1;
                existing.push_str(", ");
                existing.push_str(&value);
            }
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let name = canonical_name(name);
        self.position(&name).map(|i| self.entries.remove(i).1)
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

/// Value of a `;name=value` parameter in a header value
pub fn param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    value.split(';').skip(1).find_map(|p| {
        let (key, val) = p.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(val.trim().trim_matches('"').split(',').next().unwrap_or("").trim())
        } else {
            None
        }
    })
}

/// Split a folded header value into its comma-separated entries, respecting
/// `<...>` and quoted strings
pub fn split_list(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0u32;
    let mut quoted = false;
    let mut start = 0;
    for (i, ch) in value.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                parts.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = value[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}
