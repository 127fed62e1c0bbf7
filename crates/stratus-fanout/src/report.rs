//! Aggregate outcome of one fan-out batch.

/// A failed item and its position in the batch input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure<E> {
    pub index: usize,
    pub error: E,
}

/// What happened to a batch: how many items existed, how many were
/// attempted, and which of them failed (ordered by item position).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<E> {
    total: usize,
    attempted: usize,
    failures: Vec<ItemFailure<E>>,
}

impl<E> BatchReport<E> {
    pub(crate) fn new(total: usize, attempted: usize, failures: Vec<ItemFailure<E>>) -> Self {
        Self {
            total,
            attempted,
            failures,
        }
    }

    /// Number of items handed to the batch.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of items whose action was invoked.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Items never attempted because an earlier step failed.
    pub fn skipped(&self) -> usize {
        self.total - self.attempted
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn failures(&self) -> &[ItemFailure<E>] {
        &self.failures
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The failure of the earliest failing item.
    pub fn first_failure(&self) -> Option<&E> {
        self.failures.first().map(|f| &f.error)
    }

    /// `Ok` if nothing failed, otherwise the first failure.
    pub fn into_result(self) -> Result<(), E> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }

    /// Convert the failures into another error type.
    pub fn map_err<F>(self, f: impl Fn(E) -> F) -> BatchReport<F> {
        BatchReport {
            total: self.total,
            attempted: self.attempted,
            failures: self
                .failures
                .into_iter()
                .map(|ItemFailure { index, error }| ItemFailure {
                    index,
                    error: f(error),
                })
                .collect(),
        }
    }
}
