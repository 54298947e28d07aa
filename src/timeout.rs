//! Collaborator Call Timeouts
//!
//! Every call out to the content generator or the publish API is bounded.
//! An expired call is reported like any other collaborator failure.

use std::time::Duration;
use tokio::time;

/// Timeout applied to a single collaborator call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeout {
    duration: Duration,
}

impl Default for CallTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl CallTimeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run a collaborator future under this timeout
    ///
    /// The future is dropped when the timeout expires.
    pub async fn run<F, T>(&self, what: &str, future: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match time::timeout(self.duration, future).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "{} timed out after {:?}",
                what,
                self.duration
            )),
        }
    }
}
