//! Trigger authentication — component C1.
//!
//! Verifies an inbound webhook against a pipeline's configured trigger
//! sources. The signature scheme (HMAC, hex-encoded, carried in a header)
//! is the same idiom shipper's `webhook::do_send_event` uses for
//! outbound signing, just SHA-1 instead of SHA-256 and verified instead of
//! produced.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::types::{SourceInfo, SourceType};

type HmacSha1 = Hmac<Sha1>;

/// Case-sensitive HTTP header map, as handed to [`Authenticator::authenticate`].
pub type Headers<'a> = HashMap<&'a str, &'a str>;

/// Verifies inbound webhook triggers against a pipeline's [`SourceInfo`]
/// list.
#[derive(Debug, Default, Clone, Copy)]
pub struct Authenticator;

impl Authenticator {
    pub fn new() -> Self {
        Self
    }

    /// Check `headers`/`body` against `sources`. Accepts on the first
    /// matching source config; rejects otherwise. An empty `sources` list
    /// means the pipeline has no configured trigger sources — callers MAY
    /// choose to treat that as a public pipeline, but this
    /// function itself returns `false` since no match can be found.
    pub fn authenticate(&self, headers: &Headers<'_>, body: &[u8], sources: &[SourceInfo]) -> bool {
        sources
            .iter()
            .any(|source| self.matches_source(headers, body, source))
    }

    fn matches_source(&self, headers: &Headers<'_>, body: &[u8], source: &SourceInfo) -> bool {
        let Some(signature_header) = headers.get(source.header_key.as_str()) else {
            return false;
        };

        if let Some(event_header) = source.source_type.event_type_header() {
            let Some(event_type) = headers.get(event_header) else {
                return false;
            };
            let wrapped = format!(",{event_type},");
            if !source.event_list.contains(&wrapped) {
                return false;
            }
        }

        match source.source_type {
            SourceType::Github | SourceType::Manual => {
                verify_hmac_sha1(&source.secret_key, body, signature_header)
            }
        }
    }
}

/// Verify a `sha1=<hex>` signature header against `secret`/`body`.
fn verify_hmac_sha1(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha1=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn github_source(secret: &str) -> SourceInfo {
        SourceInfo {
            source_type: SourceType::Github,
            header_key: "X-Hub-Signature".to_string(),
            secret_key: secret.to_string(),
            event_list: ",push,".to_string(),
        }
    }

    #[test]
    fn s5_accepts_valid_github_signature() {
        let body = b"hello";
        let signature = sign("s", body);
        let headers: Headers = HashMap::from([
            ("X-Hub-Signature", signature.as_str()),
            ("X-Github-Event", "push"),
        ]);
        let auth = Authenticator::new();
        assert!(auth.authenticate(&headers, body, &[github_source("s")]));
    }

    #[test]
    fn s5_rejects_when_body_byte_changes() {
        let signature = sign("s", b"hello");
        let headers: Headers = HashMap::from([
            ("X-Hub-Signature", signature.as_str()),
            ("X-Github-Event", "push"),
        ]);
        let auth = Authenticator::new();
        assert!(!auth.authenticate(&headers, b"hellp", &[github_source("s")]));
    }

    #[test]
    fn rejects_event_not_in_allow_list() {
        let body = b"hello";
        let signature = sign("s", body);
        let headers: Headers = HashMap::from([
            ("X-Hub-Signature", signature.as_str()),
            ("X-Github-Event", "pull_request"),
        ]);
        let auth = Authenticator::new();
        assert!(!auth.authenticate(&headers, body, &[github_source("s")]));
    }

    #[test]
    fn rejects_missing_signature_header() {
        let headers: Headers = HashMap::from([("X-Github-Event", "push")]);
        let auth = Authenticator::new();
        assert!(!auth.authenticate(&headers, b"hello", &[github_source("s")]));
    }

    #[test]
    fn manual_source_has_no_event_header_requirement() {
        let body = b"trigger-me";
        let signature = sign("s", body);
        let headers: Headers = HashMap::from([("X-Manual-Signature", signature.as_str())]);
        let manual = SourceInfo {
            source_type: SourceType::Manual,
            header_key: "X-Manual-Signature".to_string(),
            secret_key: "s".to_string(),
            event_list: String::new(),
        };
        let auth = Authenticator::new();
        assert!(auth.authenticate(&headers, body, &[manual]));
    }

    #[test]
    fn empty_source_list_rejects() {
        let auth = Authenticator::new();
        assert!(!auth.authenticate(&HashMap::new(), b"x", &[]));
    }

    #[test]
    fn accepts_on_first_matching_source_among_several() {
        let body = b"hello";
        let signature = sign("s2", body);
        let headers: Headers = HashMap::from([
            ("X-Hub-Signature", signature.as_str()),
            ("X-Github-Event", "push"),
        ]);
        let auth = Authenticator::new();
        let sources = vec![github_source("s1"), github_source("s2")];
        assert!(auth.authenticate(&headers, body, &sources));
    }
}
