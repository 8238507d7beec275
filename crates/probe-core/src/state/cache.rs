//! Read side of the reference state: one list+fetch of the blob document,
//! retried as a whole a fixed number of times.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::state::blob::BlobStore;
use crate::state::reference::{ReferenceState, StateDocument};

pub struct StateCache {
    store: Arc<BlobStore>,
    retries: u32,
    retry_delay: Duration,
}

impl StateCache {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self { store, retries: 3, retry_delay: Duration::from_secs(3) }
    }

    pub fn with_retry(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// The whole document. Fails with [`Error::Store`] once retries run out.
    pub async fn document(&self) -> Result<StateDocument> {
        let mut last_err = String::from("unknown error");
        for attempt in 1..=self.retries {
            let read = async {
                let value = self.store.read_document().await?;
                StateDocument::from_value(&value)
            };
            match read.await {
                Ok(doc) => return Ok(doc),
                Err(e) => {
                    tracing::warn!("state fetch attempt {}/{} failed: {}", attempt, self.retries, e);
                    last_err = e.to_string();
                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(Error::Store(format!("max retries reached fetching state: {last_err}")))
    }

    /// State for one chain; an absent chain reads as an empty state.
    pub async fn get(&self, chain: &str) -> Result<ReferenceState> {
        Ok(self.document().await?.get(chain))
    }
}
