/// Runs a closure when dropped.
///
/// Used wherever a release step must happen on every exit path: the closure
/// runs on normal return, early return and unwinding alike, and it can be
/// moved into another closure to tie the release to that closure's drop.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    closure: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
