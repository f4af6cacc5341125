//! Restart-on-failure wrapper for the long-running service loop.

use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};

use crate::{cache::TtlCache, Error};

const DEDUP_CAPACITY: usize = 30;

/// Remembers which error kinds were logged recently.
#[derive(Debug)]
pub struct ErrorDedup {
    seen: TtlCache<String, ()>,
}

impl ErrorDedup {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: TtlCache::new(DEDUP_CAPACITY, window),
        }
    }

    /// True the first time `kind` shows up inside the window.
    pub fn should_log(&mut self, kind: &str) -> bool {
        self.should_log_at(kind, Instant::now())
    }

    pub fn should_log_at(&mut self, kind: &str, now: Instant) -> bool {
        let key = kind.to_string();
        if self.seen.get_at(&key, now).is_some() {
            return false;
        }
        self.seen.insert_at(key, (), now);
        true
    }
}

/// Dedup key of a loop failure: the core error kind when there is one,
/// otherwise the root cause text.
pub fn failure_kind(err: &anyhow::Error) -> String {
    if let Some(e) = err.chain().find_map(|c| c.downcast_ref::<Error>()) {
        return e.kind().to_string();
    }
    err.root_cause().to_string()
}

/// Run `make()` until it returns `Ok`, restarting after `backoff` when it
/// returns an error or panics. Repeated failures of one kind are logged once
/// per dedup window. Returns the number of restarts.
pub async fn supervise<F, Fut>(
    name: &str,
    mut dedup: ErrorDedup,
    backoff: Duration,
    mut make: F,
) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut restarts = 0;
    loop {
        let kind = match tokio::spawn(make()).await {
            Ok(Ok(())) => {
                tracing::info!(service = name, restarts, "service stopped");
                return restarts;
            }
            Ok(Err(e)) => {
                let kind = failure_kind(&e);
                if dedup.should_log(&kind) {
                    tracing::error!(service = name, error = ?e, "service failed; restarting");
                }
                kind
            }
            Err(join) => {
                let kind = if join.is_panic() { "panic" } else { "cancelled" }.to_string();
                if dedup.should_log(&kind) {
                    tracing::error!(service = name, error = %join, "service crashed; restarting");
                }
                kind
            }
        };

        restarts += 1;
        tracing::debug!(service = name, %kind, restarts, "restart scheduled");
        sleep(backoff).await;
    }
}
