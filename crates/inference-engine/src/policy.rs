//! Timeout and concurrency bounds for backend calls

use crate::BackendError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

/// How a single backend call is bounded
#[derive(Debug, Clone)]
pub struct InvocationPolicy {
    /// Upper bound on waiting for a permit plus the call itself
    pub timeout: Duration,
    /// Shared limiter on concurrent backend calls, if the deployment wants one
    pub limiter: Option<Arc<Semaphore>>,
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            limiter: None,
        }
    }
}

impl InvocationPolicy {
    /// Unlimited concurrency with the given timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            limiter: None,
        }
    }

    /// Share a permit pool with other adapters
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Run `call` under the limiter and the timeout.
    ///
    /// Dropping the call on timeout abandons it; backends that own a child
    /// process kill it on drop.
    pub async fn invoke<T, F>(&self, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let bounded = async {
            let _permit = match &self.limiter {
                Some(limiter) => Some(limiter.acquire().await.map_err(|_| BackendError::LimiterClosed)?),
                None => None,
            };
            call.await
        };

        match timeout(self.timeout, bounded).await {
            Ok(result) => result,
            Err(_) => {
                let millis = self.timeout.as_millis() as u64;
                debug!("Backend call abandoned after {}ms", millis);
                Err(BackendError::Timeout(millis))
            }
        }
    }
}
