//! Annotation publishing with retry.
//!
//! The engine never talks to CI itself. A [`Publisher`] delivers one
//! rendered [`Annotation`]; [`publish_with_retry`] wraps any publisher in
//! exponential backoff driven by a [`RetryPolicy`]. Exhausted retries come
//! back as [`PublishError::Exhausted`] so the caller can warn and move on.

use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Annotation style Buildkite shows for failures
pub const DEFAULT_STYLE: &str = "error";

/// Context used when the environment does not name one
pub const DEFAULT_CONTEXT: &str = "bazel-failures";

/// A rendered annotation ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Markdown body
    pub body: String,
    /// Context key; annotations with the same context replace each other
    pub context: String,
    /// Visual style (`error`, `warning`, `info`, `success`)
    pub style: String,
}

impl Annotation {
    /// Creates an error-styled annotation
    pub fn new(body: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            context: context.into(),
            style: DEFAULT_STYLE.to_string(),
        }
    }

    /// Overrides the style
    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }
}

/// Errors from publishing an annotation
#[derive(Error, Debug)]
pub enum PublishError {
    /// The publisher could not be started or reached
    #[error("failed to run publisher: {0}")]
    Io(#[from] std::io::Error),

    /// The publisher ran and reported failure
    #[error("publisher rejected the annotation: {0}")]
    Rejected(String),

    /// Every attempt failed
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last: Box<PublishError>,
    },
}

/// Something that can deliver an annotation
pub trait Publisher {
    /// Makes one delivery attempt
    fn publish(&self, annotation: &Annotation) -> Result<(), PublishError>;
}

/// Exponential backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 for the first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Publishes `annotation`, sleeping through `sleep` between failed attempts.
///
/// Tests pass a recording closure instead of [`std::thread::sleep`].
pub fn publish_with_retry<P, S>(
    publisher: &P,
    annotation: &Annotation,
    policy: &RetryPolicy,
    mut sleep: S,
) -> Result<(), PublishError>
where
    P: Publisher + ?Sized,
    S: FnMut(Duration),
{
    let attempts = policy.attempts.max(1);
    let mut retry = 0;

    loop {
        match publisher.publish(annotation) {
            Ok(()) => {
                debug!("Published annotation '{}' on attempt {}", annotation.context, retry + 1);
                return Ok(());
            }
            Err(e) if retry + 1 >= attempts => {
                return Err(PublishError::Exhausted {
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_for(retry);
                warn!(
                    "Annotation attempt {}/{} failed: {}; retrying in {:?}",
                    retry + 1,
                    attempts,
                    e,
                    delay
                );
                sleep(delay);
                retry += 1;
            }
        }
    }
}

/// [`publish_with_retry`] with real sleeps
pub fn publish_blocking<P: Publisher + ?Sized>(
    publisher: &P,
    annotation: &Annotation,
    policy: &RetryPolicy,
) -> Result<(), PublishError> {
    publish_with_retry(publisher, annotation, policy, thread::sleep)
}
