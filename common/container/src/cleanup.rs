// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// An ordered pile of cleanup actions, drained in LIFO order on drop.
///
/// The orchestrator registers a cleanup each time it finishes a setup step,
/// so teardown happens in the reverse of setup order on every exit path.
/// Closures handle (and log) their own failures; one failing cleanup must
/// not keep the remaining ones from running.
pub(crate) struct CleanupStack {
    cleanups: Vec<(&'static str, Box<dyn FnOnce()>)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self {
            cleanups: Vec::new(),
        }
    }

    pub fn push(&mut self, label: &'static str, cleanup: impl FnOnce() + 'static) {
        self.cleanups.push((label, Box::new(cleanup)));
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        while let Some((label, cleanup)) = self.cleanups.pop() {
            tracing::debug!("Running cleanup: {}", label);
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn cleanups_run_in_reverse_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut stack = CleanupStack::new();
        for step in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            stack.push(step, move || order.borrow_mut().push(step));
        }
        drop(stack);

        assert_eq!(*order.borrow(), vec!["third", "second", "first"]);
    }

    #[test]
    fn empty_stack_drops_quietly() {
        drop(CleanupStack::new());
    }
}
