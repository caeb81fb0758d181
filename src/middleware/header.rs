//! Header-presence filter.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Stage;
use crate::request::Request;
use crate::response::Response;

/// A set of header values, compared byte for byte.
///
/// Duplicates collapse: requiring the same value twice is the same as
/// requiring it once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueSet(BTreeSet<Vec<u8>>);

impl ValueSet {
    pub fn insert(&mut self, value: &HeaderValue) {
        self.0.insert(value.as_bytes().to_vec());
    }

    /// Every value in `self` appears at least once in `received`.
    pub fn is_subset_of<'a>(&self, received: impl IntoIterator<Item = &'a HeaderValue>) -> bool {
        let received: BTreeSet<&[u8]> = received.into_iter().map(HeaderValue::as_bytes).collect();
        self.0.iter().all(|v| received.contains(v.as_slice()))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Header names mapped to the values each must carry.
///
/// Names are canonicalized on construction, so `X-Key`, `x-key` and `X-KEY`
/// all name the same requirement.
#[derive(Clone, Debug, Default)]
pub struct HeaderRequirement {
    required: HashMap<HeaderName, ValueSet>,
}

impl HeaderRequirement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a requirement from `(name, values)` pairs.
    ///
    /// ```rust
    /// use gatehouse::middleware::HeaderRequirement;
    ///
    /// let req = HeaderRequirement::from_pairs([
    ///     ("X-Key", vec!["secret"]),
    ///     ("X-Role", vec!["admin", "ops"]),
    /// ]).unwrap();
    /// assert_eq!(req.len(), 2);
    /// ```
    pub fn from_pairs<I, K, V, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        pairs.into_iter().try_fold(Self::new(), |mut req, (name, values)| {
            let name = name.as_ref();
            // A name with no values still has to be present.
            let set = req.required.entry(parse_name(name)?).or_default();
            for value in values {
                set.insert(&parse_value(name, value.as_ref())?);
            }
            Ok(req)
        })
    }

    /// Adds `value` to the values required for `name`.
    pub fn require(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let header = parse_name(name)?;
        let value = parse_value(name, value)?;
        self.required.entry(header).or_default().insert(&value);
        Ok(self)
    }

    /// Every required name is present and carries every required value.
    /// Extra headers and extra values are ignored.
    pub fn is_satisfied_by(&self, headers: &HeaderMap) -> bool {
        self.required.iter().all(|(name, values)| {
            headers.contains_key(name) && values.is_subset_of(headers.get_all(name))
        })
    }

    pub fn len(&self) -> usize { self.required.len() }
    pub fn is_empty(&self) -> bool { self.required.is_empty() }
}

fn parse_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::try_from(name).map_err(|_| ConfigError::InvalidHeaderName(name.to_owned()))
}

fn parse_value(name: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::try_from(value).map_err(|_| ConfigError::InvalidHeaderValue { name: name.to_owned() })
}

/// Lets a request through only when its headers satisfy a
/// [`HeaderRequirement`]; answers `403 Forbidden` otherwise.
#[derive(Clone, Debug)]
pub struct HeaderFilter {
    requirement: Arc<HeaderRequirement>,
}

impl HeaderFilter {
    pub fn new(requirement: HeaderRequirement) -> Self {
        Self { requirement: Arc::new(requirement) }
    }
}

impl Stage for HeaderFilter {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(HeaderGate { requirement: Arc::clone(&self.requirement), next })
    }
}

struct HeaderGate {
    requirement: Arc<HeaderRequirement>,
    next: BoxedHandler,
}

impl ErasedHandler for HeaderGate {
    fn call(&self, req: Request) -> BoxFuture {
        if self.requirement.is_satisfied_by(req.headers()) {
            return self.next.call(req);
        }

        warn!(
            remote = ?req.remote_addr(),
            url = %req.uri(),
            "request denied: header verification failed"
        );
        debug!(headers = ?req.headers(), "received headers");
        Box::pin(async { Response::forbidden() })
    }
}
