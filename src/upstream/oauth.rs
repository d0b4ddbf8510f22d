//! OAuth1 request signing for user-context sessions.
//!
//! Only the signature flow needed to authorize requests with an existing
//! token pair lives here; token issuance is someone else's problem.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

/// Percent-encode per RFC 3986: everything but unreserved characters.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Signs requests with a consumer pair and a user token pair.
#[derive(Debug, Clone)]
pub struct OAuth1Signer {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

impl OAuth1Signer {
    /// Build the `Authorization: OAuth ...` header value for a request.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        request_params: &[(String, String)],
    ) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.header_with(method, url, request_params, &nonce, &timestamp)
    }

    fn header_with(
        &self,
        method: &str,
        url: &str,
        request_params: &[(String, String)],
        nonce: &str,
        timestamp: &str,
    ) -> String {
        let oauth_params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.consumer_key.clone()),
            ("oauth_nonce".into(), nonce.to_string()),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), timestamp.to_string()),
            ("oauth_token".into(), self.token.clone()),
            ("oauth_version".into(), "1.0".into()),
        ];

        // Parameter string: all request + oauth params, encoded, sorted.
        let mut pairs: Vec<(String, String)> = request_params
            .iter()
            .chain(oauth_params.iter())
            .map(|(k, v)| (percent_encode(k), percent_encode(v)))
            .collect();
        pairs.sort();
        let param_string = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let base = format!(
            "{}&{}&{}",
            method.to_uppercase(),
            percent_encode(url),
            percent_encode(&param_string)
        );
        let key = format!(
            "{}&{}",
            percent_encode(&self.consumer_secret),
            percent_encode(&self.token_secret)
        );

        let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes()).expect("hmac accepts any key");
        mac.update(base.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let mut header_params = oauth_params;
        header_params.push(("oauth_signature".into(), signature));
        header_params.sort();
        let fields = header_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {fields}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode_reserved() {
        assert_eq!(percent_encode("abc-._~XYZ09"), "abc-._~XYZ09");
        assert_eq!(percent_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(percent_encode("ü"), "%C3%BC");
    }

    #[test]
    fn test_header_shape() {
        let signer = OAuth1Signer {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            token: "tk".into(),
            token_secret: "ts".into(),
        };
        let header = signer.header_with(
            "get",
            "https://api.example.com/1.1/search/tweets.json",
            &[("q".into(), "rust".into())],
            "nonce",
            "1456300800",
        );
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_consumer_key=\"ck\""));
        assert!(header.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert!(header.contains("oauth_signature=\""));
    }

    #[test]
    fn test_signature_is_deterministic_for_fixed_inputs() {
        let signer = OAuth1Signer {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            token: "tk".into(),
            token_secret: "ts".into(),
        };
        let a = signer.header_with("GET", "https://x.test/r", &[], "n", "1");
        let b = signer.header_with("GET", "https://x.test/r", &[], "n", "1");
        assert_eq!(a, b);
    }
}
