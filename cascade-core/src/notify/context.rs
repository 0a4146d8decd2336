//! Dispatch Context
//!
//! The dispatch context records which `(instance, source)` pairs are having
//! their handlers invoked on the current thread. A handler that writes back
//! to the very value whose change it is reacting to would otherwise recurse
//! forever.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a dispatch pushes an entry and the
//! returned guard pops it when dropped, so the stack stays balanced even if
//! a handler panics. Writes to other values, or to the same value of another
//! instance, nest normally.

use std::cell::RefCell;

use super::store::InstanceId;

thread_local! {
    static DISPATCH_STACK: RefCell<Vec<DispatchEntry>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DispatchEntry {
    instance: InstanceId,
    source: String,
}

/// Guard that pops the dispatch entry when dropped.
#[derive(Debug)]
pub struct DispatchContext {
    instance: InstanceId,
}

impl DispatchContext {
    /// Enter handler dispatch for `source` on `instance`.
    ///
    /// Returns `None` if the same pair is already being dispatched further
    /// up this thread's stack.
    pub fn enter(instance: InstanceId, source: &str) -> Option<Self> {
        DISPATCH_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack
                .iter()
                .any(|entry| entry.instance == instance && entry.source == source)
            {
                return None;
            }
            stack.push(DispatchEntry {
                instance,
                source: source.to_owned(),
            });
            Some(Self { instance })
        })
    }

    /// Check whether `source` on `instance` is being dispatched.
    ///
    /// A handler can use this to tell a write it is about to make will not
    /// run that source's handlers again.
    pub fn is_dispatching(instance: InstanceId, source: &str) -> bool {
        DISPATCH_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.instance == instance && entry.source == source)
        })
    }

    /// Number of nested dispatches on this thread. Zero outside any handler.
    pub fn depth() -> usize {
        DISPATCH_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for DispatchContext {
    fn drop(&mut self) {
        DISPATCH_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.instance, self.instance,
                    "DispatchContext mismatch: expected {:?}, got {:?}",
                    self.instance, entry.instance
                );
            }
        });
    }
}
