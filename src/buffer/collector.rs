use parking_lot::Mutex;

/// Results appended concurrently by every worker of a run.
///
/// Append order is completion order, not submission order, once more than
/// one worker is active.
#[derive(Debug)]
pub struct ResultCollector<R> {
    results: Mutex<Vec<R>>,
}

impl<R> Default for ResultCollector<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResultCollector<R> {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, result: R) {
        self.results.lock().push(result);
    }

    /// Append a whole bite of results under one lock.
    pub fn extend(&self, results: Vec<R>) {
        if results.is_empty() {
            return;
        }
        self.results.lock().extend(results);
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Run `f` against the results collected so far.
    pub fn with_results<F, O>(&self, f: F) -> O
    where
        F: FnOnce(&[R]) -> O,
    {
        f(self.results.lock().as_slice())
    }

    /// Move everything out, leaving the collector empty for the next run.
    pub fn take(&self) -> Vec<R> {
        std::mem::take(&mut *self.results.lock())
    }
}
