//! Race several fallible operations and keep the first success.
//!
//! Used by the monitor to query multiple product feeds at once. Operations
//! still outstanding when a winner is found are dropped, which cancels any
//! in-flight request they own.

use std::fmt;
use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

/// Aggregate failure returned when every raced operation failed.
#[derive(Debug)]
pub struct RaceError<E> {
    /// `(operation index, error)` pairs in completion order.
    pub failures: Vec<(usize, E)>,
}

impl<E> RaceError<E> {
    /// Number of failed operations.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True when no operation was raced at all.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Iterate the individual errors in completion order.
    pub fn errors(&self) -> impl Iterator<Item = &E> {
        self.failures.iter().map(|(_, e)| e)
    }

    /// The error that completed last, if any.
    pub fn last(&self) -> Option<&E> {
        self.failures.last().map(|(_, e)| e)
    }
}

impl<E: fmt::Display> fmt::Display for RaceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} operations failed", self.failures.len())?;
        for (index, error) in &self.failures {
            write!(f, "; #{}: {}", index, error)?;
        }
        Ok(())
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RaceError<E> {}

/// Run all operations concurrently and return the first `Ok`.
///
/// If every operation fails, the failures are returned in the order they
/// completed, each tagged with the index of the operation that produced it.
/// An empty input yields an empty `RaceError`.
pub async fn race_first_success<I, F, T, E>(operations: I) -> Result<T, RaceError<E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<_> = operations
        .into_iter()
        .enumerate()
        .map(|(index, op)| async move { (index, op.await) })
        .collect();

    let mut failures = Vec::new();
    while let Some((index, result)) = pending.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(error) => failures.push((index, error)),
        }
    }

    Err(RaceError { failures })
}
