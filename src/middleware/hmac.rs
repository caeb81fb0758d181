//! HMAC signature filter.
//!
//! The filter buffers the request body, checks a keyed digest of it against
//! a signature carried in a header, and forwards the request with an
//! identical, replayable body when the signature matches.
//!
//! Two providers decide how the digest is computed and where the signature
//! lives:
//!
//! | Provider | Digest | Signature header | Signed bytes |
//! |---|---|---|---|
//! | `default` | HMAC-SHA256 | configurable | body, then URL and nonce if configured |
//! | `github` | HMAC-SHA1 | `X-Hub-Signature: sha1=<hex>` | body |
//!
//! The default provider can additionally require a timestamp header within
//! two seconds of the server clock.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use http::header::{HeaderName, HeaderValue};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::{ConfigError, ValidationError};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Stage;
use crate::request::Request;
use crate::response::Response;
use crate::secret::{NoSecrets, Secret, SecretProvider};

const GITHUB_HEADER: &str = "x-hub-signature";
/// `sha1=` followed by 40 hex digits.
const GITHUB_SIGNATURE_LEN: usize = 45;
const GITHUB_PREFIX_LEN: usize = 5;

/// Largest accepted distance, in seconds, between a signed timestamp and now.
const MAX_CLOCK_SKEW_SECS: u64 = 2;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Which signature scheme a [`HmacFilter`] checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Default,
    Github,
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "default" => Ok(Self::Default),
            "github"       => Ok(Self::Github),
            _              => Err(ConfigError::UnknownProvider(s.to_owned())),
        }
    }
}

/// How the secret and the received signature are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Bytes used as they are.
    #[default]
    Raw,
    Hex,
    Base64,
}

impl Encoding {
    fn decode(self, input: &[u8], what: &'static str) -> Result<Vec<u8>, ValidationError> {
        let decode_err = |reason: String| ValidationError::Decode { what, reason };
        match self {
            Self::Raw    => Ok(input.to_vec()),
            Self::Hex    => hex::decode(input).map_err(|e| decode_err(e.to_string())),
            Self::Base64 => BASE64.decode(input).map_err(|e| decode_err(e.to_string())),
        }
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "raw" => Ok(Self::Raw),
            "hex"      => Ok(Self::Hex),
            "base64"   => Ok(Self::Base64),
            _          => Err(ConfigError::UnknownEncoding(s.to_owned())),
        }
    }
}

/// Settings for a [`HmacFilter`].
///
/// ```rust
/// use gatehouse::middleware::{Encoding, HmacConfig};
/// use gatehouse::Secret;
///
/// let signed = HmacConfig::new(Secret::named("HOOK_SECRET"), "X-Signature")
///     .encoding(Encoding::Hex)
///     .nonce_header("X-Nonce")
///     .timestamp_header("X-Timestamp")
///     .include_url(true);
///
/// let github = HmacConfig::github(Secret::value("ThisIsMySecret"));
/// # let _ = (signed, github);
/// ```
#[derive(Clone, Debug)]
pub struct HmacConfig {
    provider: Provider,
    secret: Secret,
    signature_header: String,
    nonce_header: Option<String>,
    timestamp_header: Option<String>,
    encoding: Encoding,
    include_url: bool,
    clock: fn() -> i64,
}

impl HmacConfig {
    /// Default provider: HMAC-SHA256, signature read from `signature_header`.
    pub fn new(secret: Secret, signature_header: impl Into<String>) -> Self {
        Self {
            provider: Provider::Default,
            secret,
            signature_header: signature_header.into(),
            nonce_header: None,
            timestamp_header: None,
            encoding: Encoding::Raw,
            include_url: false,
            clock: unix_now,
        }
    }

    /// Github webhook signatures. Only the secret is configurable.
    pub fn github(secret: Secret) -> Self {
        Self::new(secret, GITHUB_HEADER).provider(Provider::Github)
    }

    /// Switches provider. With [`Provider::Github`] every setting except the
    /// secret is ignored.
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    /// Header whose bytes are fed into the digest after the body and URL.
    pub fn nonce_header(mut self, name: impl Into<String>) -> Self {
        self.nonce_header = Some(name.into());
        self
    }

    /// Header carrying the signing time in Unix seconds.
    pub fn timestamp_header(mut self, name: impl Into<String>) -> Self {
        self.timestamp_header = Some(name.into());
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Feed the request URL into the digest after the body.
    pub fn include_url(mut self, include: bool) -> Self {
        self.include_url = include;
        self
    }

    /// Replaces the clock used for timestamp checks.
    pub fn clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn header_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::try_from(name).map_err(|_| ConfigError::InvalidHeaderName(name.to_owned()))
}

fn optional_header(name: Option<&str>) -> Result<Option<HeaderName>, ConfigError> {
    name.filter(|n| !n.is_empty()).map(header_name).transpose()
}

// ── Strategies ────────────────────────────────────────────────────────────────

/// HMAC-SHA256 over body, optional URL and optional nonce, with an optional
/// freshness window on a timestamp header.
pub struct DefaultStrategy {
    secret: String,
    signature_header: HeaderName,
    nonce_header: Option<HeaderName>,
    timestamp_header: Option<HeaderName>,
    encoding: Encoding,
    include_url: bool,
    clock: fn() -> i64,
}

impl DefaultStrategy {
    pub fn validate(&self, req: &Request, body: &[u8]) -> Result<bool, ValidationError> {
        let signature = req
            .headers()
            .get(&self.signature_header)
            .ok_or_else(|| ValidationError::MissingHeader(self.signature_header.to_string()))?;
        if self.secret.is_empty() {
            return Err(ValidationError::EmptySecret);
        }

        let key = self.encoding.decode(self.secret.as_bytes(), "secret")?;
        let signature = self.encoding.decode(signature.as_bytes(), "signature")?;

        let mut mac = Hmac::<Sha256>::new_from_slice(&key).map_err(|_| ValidationError::InvalidKey)?;
        mac.update(body);
        if self.include_url {
            mac.update(req.uri().to_string().as_bytes());
        }
        if let Some(nonce) = self.nonce_header.as_ref().and_then(|h| req.headers().get(h)) {
            mac.update(nonce.as_bytes());
        }

        if let Some(header) = &self.timestamp_header {
            let signed_at = parse_timestamp(req.headers().get(header), header)?;
            if (self.clock)().abs_diff(signed_at) > MAX_CLOCK_SKEW_SECS {
                return Ok(false);
            }
        }

        Ok(mac.verify_slice(&signature).is_ok())
    }
}

impl fmt::Debug for DefaultStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultStrategy")
            .field("signature_header", &self.signature_header)
            .field("nonce_header", &self.nonce_header)
            .field("timestamp_header", &self.timestamp_header)
            .field("encoding", &self.encoding)
            .field("include_url", &self.include_url)
            .finish_non_exhaustive()
    }
}

fn parse_timestamp(value: Option<&HeaderValue>, header: &HeaderName) -> Result<i64, ValidationError> {
    let value = value.ok_or_else(|| ValidationError::MissingHeader(header.to_string()))?;
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| ValidationError::Timestamp(String::from_utf8_lossy(value.as_bytes()).into_owned()))
}

/// Github webhook signatures: `X-Hub-Signature: sha1=<hex HMAC-SHA1 of body>`.
pub struct GithubStrategy {
    secret: String,
}

impl GithubStrategy {
    pub fn validate(&self, req: &Request, body: &[u8]) -> Result<bool, ValidationError> {
        let signature = req
            .headers()
            .get(GITHUB_HEADER)
            .map(HeaderValue::as_bytes)
            .unwrap_or_default();
        if signature.len() != GITHUB_SIGNATURE_LEN {
            return Err(ValidationError::SignatureLength(signature.len()));
        }
        if self.secret.is_empty() {
            return Err(ValidationError::EmptySecret);
        }

        let mut mac = Hmac::<Sha1>::new_from_slice(self.secret.as_bytes())
            .map_err(|_| ValidationError::InvalidKey)?;
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());

        Ok(expected.as_bytes().ct_eq(&signature[GITHUB_PREFIX_LEN..]).into())
    }
}

impl fmt::Debug for GithubStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubStrategy").finish_non_exhaustive()
    }
}

/// The signature check selected by a [`HmacConfig`]'s provider.
#[derive(Debug)]
pub enum HmacValidator {
    Default(DefaultStrategy),
    Github(GithubStrategy),
}

impl HmacValidator {
    /// Resolves the secret and header names of `config`.
    pub fn from_config(config: &HmacConfig, secrets: &dyn SecretProvider) -> Result<Self, ConfigError> {
        let secret = config.secret.resolve(secrets)?;
        match config.provider {
            Provider::Github => Ok(Self::Github(GithubStrategy { secret })),
            Provider::Default => {
                if config.signature_header.is_empty() {
                    return Err(ConfigError::MissingSignatureHeader);
                }
                Ok(Self::Default(DefaultStrategy {
                    secret,
                    signature_header: header_name(&config.signature_header)?,
                    nonce_header: optional_header(config.nonce_header.as_deref())?,
                    timestamp_header: optional_header(config.timestamp_header.as_deref())?,
                    encoding: config.encoding,
                    include_url: config.include_url,
                    clock: config.clock,
                }))
            }
        }
    }

    /// `Ok(true)` when the signature matches, `Ok(false)` when it does not
    /// (or the timestamp is stale), `Err` when the request cannot be checked.
    pub fn validate(&self, req: &Request, body: &[u8]) -> Result<bool, ValidationError> {
        match self {
            Self::Default(strategy) => strategy.validate(req, body),
            Self::Github(strategy) => strategy.validate(req, body),
        }
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Lets a request through only when its body carries a valid signature;
/// answers `403 Forbidden` otherwise.
#[derive(Clone, Debug)]
pub struct HmacFilter {
    validator: Arc<HmacValidator>,
}

impl HmacFilter {
    /// Builds the filter from a config whose secret is a literal value.
    /// A [`Secret::Named`] secret fails with
    /// [`ConfigError::UnresolvedSecret`]; use
    /// [`with_secrets`](HmacFilter::with_secrets) for those.
    pub fn new(config: HmacConfig) -> Result<Self, ConfigError> {
        Self::with_secrets(config, &NoSecrets)
    }

    pub fn with_secrets(config: HmacConfig, secrets: &dyn SecretProvider) -> Result<Self, ConfigError> {
        let validator = HmacValidator::from_config(&config, secrets)?;
        Ok(Self { validator: Arc::new(validator) })
    }
}

impl Stage for HmacFilter {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(HmacGate { validator: Arc::clone(&self.validator), next })
    }
}

struct HmacGate {
    validator: Arc<HmacValidator>,
    next: BoxedHandler,
}

impl ErasedHandler for HmacGate {
    fn call(&self, mut req: Request) -> BoxFuture {
        let validator = Arc::clone(&self.validator);
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            let body = match req.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(remote = ?req.remote_addr(), url = %req.uri(), error = %e, "request denied: unreadable body");
                    return Response::forbidden();
                }
            };

            match validator.validate(&req, &body) {
                Ok(true) => next.call(req).await,
                Ok(false) => {
                    warn!(remote = ?req.remote_addr(), url = %req.uri(), "request denied: invalid hmac");
                    Response::forbidden()
                }
                Err(e) => {
                    warn!(remote = ?req.remote_addr(), url = %req.uri(), error = %e, "request denied: hmac not verifiable");
                    Response::forbidden()
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    use super::*;
    use crate::handler::Handler;

    const NOW: i64 = 1_700_000_000;

    fn fixed_clock() -> i64 {
        NOW
    }

    fn request(headers: &[(&str, &str)], body: &'static str) -> Request {
        let mut builder = http::Request::post("https://hooks.example.com/deploy?env=prod");
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        Request::new(builder.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap())
    }

    fn sha256(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
        for part in parts {
            mac.update(part);
        }
        mac.finalize().into_bytes().to_vec()
    }

    fn validator(config: HmacConfig) -> HmacValidator {
        HmacValidator::from_config(&config, &NoSecrets).unwrap()
    }

    fn hex_config() -> HmacConfig {
        HmacConfig::new(Secret::value(hex::encode("key")), "X-Signature").encoding(Encoding::Hex)
    }

    #[test]
    fn default_hex_signature_matches() {
        let sig = hex::encode(sha256(b"key", &[b"body"]));
        let req = request(&[("x-signature", sig.as_str())], "body");
        assert!(validator(hex_config()).validate(&req, b"body").unwrap());
    }

    #[test]
    fn default_base64_signature_matches() {
        let config = HmacConfig::new(Secret::value(BASE64.encode("key")), "X-Signature")
            .encoding(Encoding::Base64);
        let sig = BASE64.encode(sha256(b"key", &[b"body"]));
        let req = request(&[("x-signature", sig.as_str())], "body");
        assert!(validator(config).validate(&req, b"body").unwrap());
    }

    #[test]
    fn any_single_bit_flip_fails() {
        let v = validator(hex_config());
        let sig = sha256(b"key", &[b"body"]);

        let mut flipped_sig = sig.clone();
        flipped_sig[7] ^= 0x01;
        let req = request(&[("x-signature", hex::encode(&flipped_sig).as_str())], "");
        assert!(!v.validate(&req, b"body").unwrap());

        let req = request(&[("x-signature", hex::encode(&sig).as_str())], "");
        assert!(!v.validate(&req, b"bodz").unwrap());

        let other_key = validator(
            HmacConfig::new(Secret::value(hex::encode("kez")), "X-Signature").encoding(Encoding::Hex),
        );
        assert!(!other_key.validate(&req, b"body").unwrap());
    }

    #[test]
    fn url_then_nonce_follow_the_body() {
        let config = hex_config().include_url(true).nonce_header("X-Nonce");
        let url = "https://hooks.example.com/deploy?env=prod";
        let sig = hex::encode(sha256(b"key", &[b"body", url.as_bytes(), b"n-42"]));
        let req = request(&[("x-signature", sig.as_str()), ("x-nonce", "n-42")], "");
        assert!(validator(config).validate(&req, b"body").unwrap());

        let swapped = hex::encode(sha256(b"key", &[b"body", b"n-42", url.as_bytes()]));
        let config = hex_config().include_url(true).nonce_header("X-Nonce");
        let req = request(&[("x-signature", swapped.as_str()), ("x-nonce", "n-42")], "");
        assert!(!validator(config).validate(&req, b"body").unwrap());
    }

    #[test]
    fn absent_nonce_header_is_skipped() {
        let config = hex_config().nonce_header("X-Nonce");
        let sig = hex::encode(sha256(b"key", &[b"body"]));
        let req = request(&[("x-signature", sig.as_str())], "");
        assert!(validator(config).validate(&req, b"body").unwrap());
    }

    #[test]
    fn timestamp_window_is_two_seconds_inclusive() {
        let v = validator(hex_config().timestamp_header("X-Timestamp").clock(fixed_clock));
        let sig = hex::encode(sha256(b"key", &[b"body"]));
        let check = |ts: i64| {
            let ts = ts.to_string();
            v.validate(&request(&[("x-signature", sig.as_str()), ("x-timestamp", ts.as_str())], ""), b"body")
        };

        assert!(check(NOW).unwrap());
        assert!(check(NOW - 2).unwrap());
        assert!(check(NOW + 2).unwrap());
        assert!(!check(NOW - 3).unwrap());
        assert!(!check(NOW + 3).unwrap());
    }

    #[test]
    fn unparseable_timestamp_is_an_error() {
        let v = validator(hex_config().timestamp_header("X-Timestamp").clock(fixed_clock));
        let sig = hex::encode(sha256(b"key", &[b"body"]));
        let req = request(&[("x-signature", sig.as_str()), ("x-timestamp", "yesterday")], "");
        assert!(matches!(v.validate(&req, b"body"), Err(ValidationError::Timestamp(_))));

        let req = request(&[("x-signature", sig.as_str())], "");
        assert!(matches!(v.validate(&req, b"body"), Err(ValidationError::MissingHeader(_))));
    }

    #[test]
    fn default_provider_errors() {
        let empty = validator(HmacConfig::new(Secret::value(""), "X-Signature"));
        let req = request(&[("x-signature", "abc")], "");
        assert!(matches!(empty.validate(&req, b""), Err(ValidationError::EmptySecret)));

        let req = request(&[("x-signature", "not-hex")], "");
        assert!(matches!(
            validator(hex_config()).validate(&req, b""),
            Err(ValidationError::Decode { what: "signature", .. })
        ));

        let bad_secret = validator(
            HmacConfig::new(Secret::value("zz"), "X-Signature").encoding(Encoding::Hex),
        );
        let req = request(&[("x-signature", "00")], "");
        assert!(matches!(
            bad_secret.validate(&req, b""),
            Err(ValidationError::Decode { what: "secret", .. })
        ));

        let req = request(&[], "");
        assert!(matches!(
            validator(hex_config()).validate(&req, b""),
            Err(ValidationError::MissingHeader(_))
        ));
    }

    #[test]
    fn github_signature() {
        let v = validator(HmacConfig::github(Secret::value("ThisIsMySecret")));
        let sig = "sha1=8c08e9b7e2bdb4d87982f40d6bf6d36c0d0caab4";

        let req = request(&[("X-Hub-Signature", sig)], "");
        assert!(v.validate(&req, b"ThisIsARequest").unwrap());
        assert!(!v.validate(&req, b"ThisIsARequesT").unwrap());
    }

    #[test]
    fn github_ignores_everything_but_the_secret() {
        let config = HmacConfig::github(Secret::value("ThisIsMySecret"))
            .encoding(Encoding::Base64)
            .include_url(true)
            .nonce_header("X-Nonce")
            .timestamp_header("X-Timestamp");
        let req = request(&[("X-Hub-Signature", "sha1=8c08e9b7e2bdb4d87982f40d6bf6d36c0d0caab4")], "");
        assert!(validator(config).validate(&req, b"ThisIsARequest").unwrap());
    }

    #[test]
    fn github_signature_length_is_checked() {
        let v = validator(HmacConfig::github(Secret::value("ThisIsMySecret")));
        let short = request(&[("X-Hub-Signature", "sha1=8c08e9b7e2bdb4d87982f40d6bf6d36c0d0caab")], "");
        assert!(matches!(v.validate(&short, b""), Err(ValidationError::SignatureLength(44))));

        let missing = request(&[], "");
        assert!(matches!(v.validate(&missing, b""), Err(ValidationError::SignatureLength(0))));

        let empty = validator(HmacConfig::github(Secret::value("")));
        let req = request(&[("X-Hub-Signature", "sha1=8c08e9b7e2bdb4d87982f40d6bf6d36c0d0caab4")], "");
        assert!(matches!(empty.validate(&req, b""), Err(ValidationError::EmptySecret)));
    }

    #[test]
    fn configuration_is_checked_when_building() {
        assert!(matches!(
            HmacFilter::new(HmacConfig::new(Secret::value("k"), "")),
            Err(ConfigError::MissingSignatureHeader)
        ));
        assert!(matches!(
            HmacFilter::new(HmacConfig::new(Secret::value("k"), "bad header")),
            Err(ConfigError::InvalidHeaderName(_))
        ));
        assert!(matches!(
            HmacFilter::new(HmacConfig::github(Secret::named("GITHUB_SECRET"))),
            Err(ConfigError::UnresolvedSecret(_))
        ));
        assert_eq!("GitHub".parse::<Provider>().unwrap(), Provider::Github);
        assert!("gitlab".parse::<Provider>().is_err());
        assert_eq!("base64".parse::<Encoding>().unwrap(), Encoding::Base64);
        assert!("rot13".parse::<Encoding>().is_err());
    }

    #[tokio::test]
    async fn filter_replays_body_to_next_handler() {
        let filter = HmacFilter::new(HmacConfig::github(Secret::value("ThisIsMySecret"))).unwrap();
        let handler = filter.wrap(
            (|mut req: Request| async move {
                let body = req.bytes().await.unwrap();
                Response::text(String::from_utf8_lossy(&body).into_owned())
            })
            .into_boxed_handler(),
        );

        let ok = handler
            .call(request(&[("X-Hub-Signature", "sha1=8c08e9b7e2bdb4d87982f40d6bf6d36c0d0caab4")], "ThisIsARequest"))
            .await;
        assert_eq!(ok.status_code(), StatusCode::OK);
        assert_eq!(ok.body(), b"ThisIsARequest");

        let denied = handler
            .call(request(&[("X-Hub-Signature", "sha1=0000000000000000000000000000000000000000")], "ThisIsARequest"))
            .await;
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
        assert!(denied.body().is_empty());
    }
}
