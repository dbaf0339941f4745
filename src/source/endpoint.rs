//! Where a source fetches from.
//!
//! Most feeds hit one fixed URL for their whole life.  The analyzer feeds
//! instead ask for a random sample on every attempt, so the URL is only known
//! at the moment an attempt is issued.  [`Endpoint::target`] resolves the URL
//! for one attempt and reports the sample index it picked, which the poller
//! carries through to the result.

use rand::Rng;
use url::Url;

/// Default upper bound (exclusive) for sampled indices.
pub const DEFAULT_SAMPLE_BOUND: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Same URL on every attempt.
    Fixed(Url),
    /// `url` plus a fresh `param=<n>` query pair per attempt, `n` in
    /// `[0, bound)`.
    Sampled { url: Url, param: String, bound: u32 },
}

/// The URL for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: Url,
    /// Index drawn for a sampled endpoint, `None` for fixed ones.
    pub sample_index: Option<u32>,
}

impl Endpoint {
    pub fn fixed(url: Url) -> Self {
        Endpoint::Fixed(url)
    }

    pub fn sampled(url: Url, param: impl Into<String>, bound: u32) -> Self {
        Endpoint::Sampled {
            url,
            param: param.into(),
            bound: bound.max(1),
        }
    }

    /// Resolve the URL for the next attempt using the thread-local RNG.
    pub fn target(&self) -> Target {
        self.target_with(&mut rand::thread_rng())
    }

    pub fn target_with<R: Rng>(&self, rng: &mut R) -> Target {
        match self {
            Endpoint::Fixed(url) => Target {
                url: url.clone(),
                sample_index: None,
            },
            Endpoint::Sampled { url, param, bound } => {
                let index = rng.gen_range(0..*bound);
                let mut url = url.clone();
                url.query_pairs_mut()
                    .append_pair(param, &index.to_string());
                Target {
                    url,
                    sample_index: Some(index),
                }
            }
        }
    }

    /// The URL without any per-attempt query pairs, for logging.
    pub fn base_url(&self) -> &Url {
        match self {
            Endpoint::Fixed(url) | Endpoint::Sampled { url, .. } => url,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
