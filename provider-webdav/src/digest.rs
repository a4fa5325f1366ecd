//! HTTP Digest authentication (RFC 7616 / RFC 2617), MD5 and MD5-sess with
//! `qop=auth`.

use md5::{Digest, Md5};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Hash algorithm announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
        }
    }
}

/// Parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// Server offered `qop=auth`
    pub qop_auth: bool,
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` value. Returns `None` for non-Digest
    /// schemes, a missing realm or nonce, and unsupported algorithms.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("Digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = DigestAlgorithm::Md5;
        let mut qop_auth = false;
        let mut stale = false;

        for (name, value) in split_params(params) {
            match name.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => {
                    algorithm = if value.eq_ignore_ascii_case("MD5") {
                        DigestAlgorithm::Md5
                    } else if value.eq_ignore_ascii_case("MD5-sess") {
                        DigestAlgorithm::Md5Sess
                    } else {
                        return None;
                    }
                }
                "qop" => {
                    qop_auth = value
                        .split(',')
                        .any(|q| q.trim().eq_ignore_ascii_case("auth"))
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm,
            qop_auth,
            stale,
        })
    }
}

/// `name=value` pairs, values optionally quoted; commas inside quotes are kept.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = params.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if chars.next().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        pairs.push((name.trim().to_string(), value.trim().to_string()));
    }

    pairs
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Digest credentials for one session. The nonce count increments per request.
#[derive(Debug)]
pub struct DigestAuth {
    challenge: DigestChallenge,
    nonce_count: AtomicU32,
}

impl DigestAuth {
    pub fn new(challenge: DigestChallenge) -> Self {
        Self {
            challenge,
            nonce_count: AtomicU32::new(1),
        }
    }

    pub fn challenge(&self) -> &DigestChallenge {
        &self.challenge
    }

    /// `Authorization` header value for a request, with a random cnonce.
    pub fn authorization(&self, method: &str, uri: &str, username: &str, password: &str) -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill(&mut bytes);
        self.authorization_with_cnonce(method, uri, username, password, &hex::encode(bytes))
    }

    pub fn authorization_with_cnonce(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        cnonce: &str,
    ) -> String {
        let c = &self.challenge;
        let nc = format!("{:08x}", self.nonce_count.fetch_add(1, Ordering::Relaxed));

        let mut ha1 = md5_hex(&format!("{}:{}:{}", username, c.realm, password));
        if c.algorithm == DigestAlgorithm::Md5Sess {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, c.nonce, cnonce));
        }
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let response = if c.qop_auth {
            md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, c.nonce, nc, cnonce, ha2))
        } else {
            md5_hex(&format!("{}:{}:{}", ha1, c.nonce, ha2))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}",
            username,
            c.realm,
            c.nonce,
            uri,
            c.algorithm.as_str()
        );
        if c.qop_auth {
            header.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        }
        if let Some(opaque) = &c.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        header.push_str(&format!(", response=\"{}\"", response));
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC2617_CHALLENGE: &str = r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;

    #[test]
    fn test_parse_challenge() {
        let challenge = DigestChallenge::parse(RFC2617_CHALLENGE).unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(
            challenge.opaque.as_deref(),
            Some("5ccc069c403ebaf9f0171e9517f40e41")
        );
        assert!(challenge.qop_auth);
        assert_eq!(challenge.algorithm, DigestAlgorithm::Md5);
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(DigestChallenge::parse(r#"Basic realm="x""#).is_none());
        assert!(DigestChallenge::parse(r#"Digest realm="x""#).is_none());
        assert!(DigestChallenge::parse(r#"Digest realm="x", nonce="n", algorithm=SHA-256"#).is_none());
    }

    #[test]
    fn test_parse_md5_sess_unquoted() {
        let challenge =
            DigestChallenge::parse("Digest realm=dav, nonce=abc, algorithm=MD5-sess, stale=TRUE")
                .unwrap();
        assert_eq!(challenge.algorithm, DigestAlgorithm::Md5Sess);
        assert!(challenge.stale);
        assert!(!challenge.qop_auth);
    }

    #[test]
    fn test_rfc2617_response() {
        let auth = DigestAuth::new(DigestChallenge::parse(RFC2617_CHALLENGE).unwrap());
        let header = auth.authorization_with_cnonce(
            "GET",
            "/dir/index.html",
            "Mufasa",
            "Circle Of Life",
            "0a4f113b",
        );
        assert!(header.contains(r#"response="6629fae49393a05397450978507c4ef1""#));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains(r#"opaque="5ccc069c403ebaf9f0171e9517f40e41""#));
    }

    #[test]
    fn test_nonce_count_increments() {
        let auth = DigestAuth::new(DigestChallenge::parse(RFC2617_CHALLENGE).unwrap());
        auth.authorization("GET", "/", "u", "p");
        let second = auth.authorization("GET", "/", "u", "p");
        assert!(second.contains("nc=00000002"));
    }

    #[test]
    fn test_without_qop() {
        let challenge = DigestChallenge::parse(r#"Digest realm="r", nonce="n""#).unwrap();
        let header = DigestAuth::new(challenge).authorization_with_cnonce("PUT", "/f", "u", "p", "c");
        let ha1 = md5_hex("u:r:p");
        let ha2 = md5_hex("PUT:/f");
        let expected = md5_hex(&format!("{}:n:{}", ha1, ha2));
        assert!(header.contains(&format!(r#"response="{}""#, expected)));
        assert!(!header.contains("qop"));
    }
}
