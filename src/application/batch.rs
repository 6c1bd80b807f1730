//! Chunked concurrency: bounded parallelism per chunk, a fixed pause between chunks.

use std::{fmt, future::Future, num::NonZeroUsize, time::Duration, time::Instant};

use futures::future::join_all;
use tracing::debug;

const DEFAULT_CHUNK_SIZE: usize = 5;
const DEFAULT_CHUNK_DELAY_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub chunk_size: NonZeroUsize,
    pub delay: Duration,
}

impl BatchOptions {
    /// Build options, clamping a zero chunk size to 1.
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size: NonZeroUsize::new(chunk_size).unwrap_or(NonZeroUsize::MIN),
            delay,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::new(
            DEFAULT_CHUNK_SIZE,
            Duration::from_millis(DEFAULT_CHUNK_DELAY_MS),
        )
    }
}

/// Result slot for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome<R> {
    Done(R),
    Failed { message: String },
}

impl<R> ChunkOutcome<R> {
    pub fn is_failed(&self) -> bool {
        matches!(self, ChunkOutcome::Failed { .. })
    }

    /// `"success"` or `"error"`, matching the persisted status vocabulary.
    pub fn status(&self) -> &'static str {
        match self {
            ChunkOutcome::Done(_) => "success",
            ChunkOutcome::Failed { .. } => "error",
        }
    }

    pub fn ok(self) -> Option<R> {
        match self {
            ChunkOutcome::Done(value) => Some(value),
            ChunkOutcome::Failed { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<R, String> {
        match self {
            ChunkOutcome::Done(value) => Ok(value),
            ChunkOutcome::Failed { message } => Err(message),
        }
    }
}

/// Run `process` over `items` in consecutive chunks.
///
/// Items within a chunk run concurrently; a failing item becomes
/// [`ChunkOutcome::Failed`] without affecting its neighbours. The pause runs
/// between chunks only. Outcomes are returned in input order.
pub async fn process_in_chunks<T, R, E, F, Fut>(
    items: Vec<T>,
    process: F,
    options: BatchOptions,
) -> Vec<ChunkOutcome<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: fmt::Display,
{
    let total = items.len();
    let chunk_size = options.chunk_size.get();
    let chunk_count = total.div_ceil(chunk_size);
    let mut outcomes = Vec::with_capacity(total);
    let mut pending = items.into_iter().peekable();
    let mut chunk_index = 0usize;

    while pending.peek().is_some() {
        let started_at = Instant::now();
        let chunk = pending.by_ref().take(chunk_size).map(|item| {
            let future = process(item);
            async move {
                match future.await {
                    Ok(value) => ChunkOutcome::Done(value),
                    Err(err) => ChunkOutcome::Failed {
                        message: err.to_string(),
                    },
                }
            }
        });
        let results = join_all(chunk).await;
        chunk_index += 1;

        debug!(
            target = "sitebake::batch",
            op = "process_in_chunks",
            chunk = chunk_index,
            chunks = chunk_count,
            size = results.len(),
            failed = results.iter().filter(|outcome| outcome.is_failed()).count(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Chunk finished"
        );
        outcomes.extend(results);

        if pending.peek().is_some() && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
    }

    outcomes
}
