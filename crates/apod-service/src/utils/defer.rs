/// Guard that runs a closure when dropped.
///
/// The closure runs at most once, whether the guard is dropped normally or during unwinding.
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> DeferGuard<F> {
    /// Runs the deferred closure right away instead of waiting for the drop.
    pub fn run(mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure, returning a `DeferGuard` that will
/// run it when dropped.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_runs_on_drop() {
        let ran = Cell::new(0);
        {
            let _guard = defer(|| ran.set(ran.get() + 1));
            assert_eq!(ran.get(), 0);
        }
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn test_run_early_only_once() {
        let ran = Cell::new(0);
        let guard = defer(|| ran.set(ran.get() + 1));
        guard.run();
        assert_eq!(ran.get(), 1);
    }
}
