use std::ops::Range;

/// Splits `0..n` into contiguous ranges of at most `limit` items.
///
/// Produces `ceil(n / limit)` ranges in ascending order; a `limit` of zero is treated as one.
pub fn plan(n: usize, limit: usize) -> Vec<Range<usize>> {
    let limit = limit.max(1);
    (0..n.div_ceil(limit))
        .map(|i| {
            let lo = i * limit;
            lo..(lo + limit).min(n)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(plan(0, 500).is_empty());
    }

    #[test]
    fn chunks_cover_input_exactly_once() {
        for n in [1, 2, 499, 500, 501, 1000, 1200, 2501] {
            for limit in [1, 3, 500, 1000] {
                let chunks = plan(n, limit);
                assert_eq!(chunks.len(), n.div_ceil(limit));
                let mut next = 0;
                for chunk in &chunks {
                    assert_eq!(chunk.start, next);
                    assert!(chunk.len() <= limit && !chunk.is_empty());
                    next = chunk.end;
                }
                assert_eq!(next, n);
            }
        }
    }

    #[test]
    fn last_chunk_holds_the_remainder() {
        assert_eq!(plan(1200, 1000), vec![0..1000, 1000..1200]);
    }
}
