use std::{ops::Range, sync::mpsc, thread};

use log::{debug, trace, warn};

use crate::{ServiceError, chunk::plan, outcome::Outcomes};

/// Result of one store call over a chunk.
pub(crate) type ChunkResult = Result<Outcomes, ServiceError>;

/// Runs `call` over `items` in chunks of at most `limit`, one thread per chunk,
/// and returns the per-item outcomes in input order.
///
/// Each worker gets exclusive access to its own sub-slice and reports back over a
/// channel, so the outcome array is only touched by the calling thread. Returns
/// after every worker has finished.
pub(crate) fn dispatch<T, F>(op: &'static str, items: &mut [T], limit: usize, call: F) -> Outcomes
where
    T: Send,
    F: Fn(Range<usize>, &mut [T]) -> ChunkResult + Sync,
{
    let len = items.len();
    let chunks = plan(len, limit);
    let mut outcomes: Outcomes = vec![None; len];

    if chunks.len() <= 1 {
        for range in chunks {
            let result = call(range.clone(), items);
            merge(op, &mut outcomes, range, result);
        }
        return outcomes;
    }

    debug!("{}: {} items in {} chunks", op, len, chunks.len());

    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        let call = &call;
        let mut rest = items;
        for range in chunks {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            rest = tail;
            let tx = tx.clone();
            scope.spawn(move || {
                let result = call(range.clone(), head);
                trace!("{}: chunk {:?} done", op, range);
                // The receiver outlives the scope.
                let _ = tx.send((range, result));
            });
        }
    });
    drop(tx);

    for (range, result) in rx {
        merge(op, &mut outcomes, range, result);
    }
    outcomes
}

/// Runs `call` once over all of `items`, for stores that cannot split the batch.
pub(crate) fn dispatch_single<T>(
    op: &'static str,
    items: &mut [T],
    call: impl FnOnce(&mut [T]) -> ChunkResult,
) -> Outcomes {
    let len = items.len();
    let mut outcomes: Outcomes = vec![None; len];
    if len > 0 {
        let result = call(items);
        merge(op, &mut outcomes, 0..len, result);
    }
    outcomes
}

fn merge(op: &'static str, outcomes: &mut Outcomes, range: Range<usize>, result: ChunkResult) {
    let result = match result {
        Ok(items) if items.len() == range.len() => Ok(items),
        Ok(items) => Err(ServiceError::Backend(format!(
            "store returned {} results for {} keys",
            items.len(),
            range.len()
        ))),
        Err(err) => Err(err),
    };
    match result {
        Ok(items) => {
            for (slot, outcome) in outcomes[range].iter_mut().zip(items) {
                *slot = outcome;
            }
        }
        Err(err) => {
            warn!("{}: call for items {:?} failed: {}", op, range, err);
            for slot in &mut outcomes[range] {
                *slot = Some(err.clone());
            }
        }
    }
}
