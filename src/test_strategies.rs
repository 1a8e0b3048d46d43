#[cfg(test)]
pub mod strategies {
    use proptest::collection::SizeRange;
    use proptest::prelude::*;

    /// Arbitrary (offset, timestamp_ms) commit sequences, deliberately
    /// unordered so acceptance gates see duplicates and rewinds
    pub fn arb_commit_sequence(
        len: impl Into<SizeRange>,
    ) -> impl Strategy<Value = Vec<(i64, i64)>> {
        proptest::collection::vec((0..10_000i64, 1..1_000_000i64), len)
    }

    /// (head, committed) offsets where committed may overrun the last polled
    /// head offset (transient negative lag)
    pub fn arb_head_and_committed() -> impl Strategy<Value = (i64, i64)> {
        (0..1_000_000i64).prop_flat_map(|head| (Just(head), 0..=head + 100))
    }
}
