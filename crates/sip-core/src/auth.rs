//! RFC 2617 digest authentication (MD5, optional `qop=auth`)

use md5::compute as md5_compute;
use rand::Rng;

use crate::error::{Result, SipError};
use crate::headers::names;
use crate::message::{Method, SipMessage};

/// Which challenge header a 401/407 carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// `WWW-Authenticate` from a 401, answered with `Authorization`
    Www,
    /// `Proxy-Authenticate` from a 407, answered with `Proxy-Authorization`
    Proxy,
}

impl ChallengeKind {
    /// Header the credentials must be sent in
    pub fn response_header(self) -> &'static str {
        match self {
            ChallengeKind::Www => names::AUTHORIZATION,
            ChallengeKind::Proxy => names::PROXY_AUTHORIZATION,
        }
    }
}

/// Digest challenge parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub kind: ChallengeKind,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// `true` when the server offered `qop=auth`
    pub qop_auth: bool,
    pub algorithm: Option<String>,
}

/// Split `k=v, k="v, with comma"` into pairs
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            }
        };
        params.push((key, value.to_string()));
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

impl AuthChallenge {
    /// Parse a challenge header value (`Digest realm="..", nonce=".."`)
    pub fn parse(kind: ChallengeKind, value: &str) -> Result<Self> {
        let value = value.trim();
        let (scheme, rest) = value.split_once(' ').unwrap_or((value, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(SipError::UnsupportedChallenge(scheme.to_string()));
        }

        let params = parse_params(rest);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        let algorithm = get("algorithm");
        if let Some(alg) = &algorithm {
            if !alg.eq_ignore_ascii_case("md5") {
                return Err(SipError::UnsupportedChallenge(format!("algorithm {alg}")));
            }
        }

        Ok(Self {
            kind,
            realm: get("realm").ok_or_else(|| SipError::invalid_header("WWW-Authenticate", value))?,
            nonce: get("nonce").ok_or_else(|| SipError::invalid_header("WWW-Authenticate", value))?,
            opaque: get("opaque"),
            qop_auth: get("qop").is_some_and(|q| q.split(',').any(|o| o.trim().eq_ignore_ascii_case("auth"))),
            algorithm,
        })
    }

    /// Extract the challenge from a 401 or 407 response
    pub fn from_response(response: &SipMessage) -> Result<Self> {
        match response.status() {
            Some(401) => {
                let value = response
                    .header(names::WWW_AUTHENTICATE)
                    .ok_or(SipError::MissingHeader(names::WWW_AUTHENTICATE))?;
                Self::parse(ChallengeKind::Www, value)
            }
            Some(407) => {
                let value = response
                    .header(names::PROXY_AUTHENTICATE)
                    .ok_or(SipError::MissingHeader(names::PROXY_AUTHENTICATE))?;
                Self::parse(ChallengeKind::Proxy, value)
            }
            _ => Err(SipError::UnsupportedChallenge("not a 401/407 response".into())),
        }
    }
}

/// Account credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn hex_md5(input: &str) -> String {
    format!("{:x}", md5_compute(input.as_bytes()))
}

/// Compute the digest `response` value
pub fn digest_response(
    credentials: &Credentials,
    challenge: &AuthChallenge,
    method: &Method,
    uri: &str,
    qop: Option<(&str, &str)>,
) -> String {
    let ha1 = hex_md5(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    let ha2 = hex_md5(&format!("{method}:{uri}"));
    match qop {
        Some((nc, cnonce)) => hex_md5(&format!(
            "{ha1}:{}:{nc}:{cnonce}:auth:{ha2}",
            challenge.nonce
        )),
        None => hex_md5(&format!("{ha1}:{}:{ha2}", challenge.nonce)),
    }
}

/// Build the `(header name, header value)` answering a challenge
///
/// Each challenge is answered once, so the nonce count is always 1.
pub fn authorization(
    credentials: &Credentials,
    challenge: &AuthChallenge,
    method: &Method,
    uri: &str,
) -> (&'static str, String) {
    let cnonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
    authorization_with_cnonce(credentials, challenge, method, uri, &cnonce)
}

/// [`authorization`] with a caller-chosen client nonce
pub fn authorization_with_cnonce(
    credentials: &Credentials,
    challenge: &AuthChallenge,
    method: &Method,
    uri: &str,
    cnonce: &str,
) -> (&'static str, String) {
    const NC: &str = "00000001";
    let qop = challenge.qop_auth.then_some((NC, cnonce));
    let response = digest_response(credentials, challenge, method, uri, qop);

    let mut value = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\", algorithm=MD5",
        credentials.username, challenge.realm, challenge.nonce
    );
    if let Some(opaque) = &challenge.opaque {
        value.push_str(&format!(", opaque=\"{opaque}\""));
    }
    if challenge.qop_auth {
        value.push_str(&format!(", qop=auth, nc={NC}, cnonce=\"{cnonce}\""));
    }
    (challenge.kind.response_header(), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            username: "Mufasa".into(),
            password: "Circle Of Life".into(),
        }
    }

    #[test]
    fn test_parse_challenge_with_quoted_commas() {
        let c = AuthChallenge::parse(
            ChallengeKind::Www,
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        )
        .unwrap();
        assert_eq!(c.realm, "testrealm@host.com");
        assert_eq!(c.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(c.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert!(c.qop_auth);
    }

    #[test]
    fn test_rfc2617_reference_response() {
        // Worked example from RFC 2617 §3.5
        let challenge = AuthChallenge::parse(
            ChallengeKind::Www,
            "Digest realm=\"testrealm@host.com\", qop=\"auth\", nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\"",
        )
        .unwrap();
        let response = digest_response(
            &creds(),
            &challenge,
            &Method::Other("GET".into()),
            "/dir/index.html",
            Some(("00000001", "0a4f113b")),
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_authorization_header_shape() {
        let challenge = AuthChallenge::parse(ChallengeKind::Proxy, "Digest realm=\"pbx\", nonce=\"abc\", algorithm=MD5").unwrap();
        let (name, value) = authorization_with_cnonce(&creds(), &challenge, &Method::Invite, "sip:100@pbx", "c1");
        assert_eq!(name, "Proxy-Authorization");
        assert!(value.starts_with("Digest username=\"Mufasa\", realm=\"pbx\", nonce=\"abc\", uri=\"sip:100@pbx\""));
        assert!(!value.contains("qop"));
    }

    #[test]
    fn test_rejects_other_schemes_and_algorithms() {
        assert!(AuthChallenge::parse(ChallengeKind::Www, "Basic realm=\"x\"").is_err());
        assert!(AuthChallenge::parse(ChallengeKind::Www, "Digest realm=\"x\", nonce=\"y\", algorithm=SHA-256").is_err());
        assert!(AuthChallenge::parse(ChallengeKind::Www, "Digest realm=\"x\"").is_err());
    }

    #[test]
    fn test_from_response() {
        let response = SipMessage::response(401, "Unauthorized")
            .with_header(names::WWW_AUTHENTICATE, "Digest realm=\"r\", nonce=\"n\"");
        let challenge = AuthChallenge::from_response(&response).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::Www);
        assert!(AuthChallenge::from_response(&SipMessage::response(200, "OK")).is_err());
    }
}
