// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bounded-concurrency batch scheduler.

use arb_provider::CancellationToken;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::future::Future;
use tracing::debug;

/// Run one batch of work items with bounded concurrency.
///
/// - At most `min(workers, items.len())` futures are in flight at once.
/// - Items are launched in input order; completion order is arbitrary.
/// - Results are reordered by `key` ascending before being returned.
/// - If any item fails, no further items are launched, in-flight items
///   are awaited, and the **first observed** error is returned with no
///   partial results.
/// - When `stop` is cancelled, no further items are launched; in-flight
///   items drain and their results are returned (a partial batch).
///
/// `workers` is clamped to at least 1.
///
/// # Errors
///
/// The first error observed from any item.
pub async fn run_batch<T, E, F, Fut, K>(
    workers: u32,
    items: Vec<K>,
    stop: &CancellationToken,
    run: F,
    key: fn(&T) -> u32,
) -> Result<Vec<T>, E>
where
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let workers = workers.max(1) as usize;
    let mut pending = items.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut results: Vec<T> = Vec::new();
    let mut first_error: Option<E> = None;

    loop {
        while first_error.is_none() && !stop.is_cancelled() && in_flight.len() < workers {
            let Some(item) = pending.next() else { break };
            in_flight.push(run(item));
        }
        match in_flight.next().await {
            Some(Ok(value)) => results.push(value),
            Some(Err(err)) => {
                // Stop launching; keep draining what is already running.
                if first_error.is_none() {
                    debug!("batch item failed, draining in-flight work");
                    first_error = Some(err);
                }
            }
            None => break,
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    results.sort_by_key(key);
    Ok(results)
}
