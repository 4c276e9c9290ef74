#![forbid(unsafe_code)]

//! RAII subscription guard shared by the store and the history manager.

use std::cell::RefCell;
use std::fmt;

/// Keeps a listener registered until dropped or [`unsubscribe`]d.
///
/// Unsubscribing is idempotent: the cancel action runs at most once.
///
/// [`unsubscribe`]: Subscription::unsubscribe
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: RefCell::new(Some(Box::new(cancel))),
        }
    }

    /// A guard that owns no listener.
    pub fn inert() -> Self {
        Self {
            cancel: RefCell::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self.cancel.borrow_mut().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel.borrow().is_some()
    }

    /// Leave the listener registered for the lifetime of its owner.
    pub fn detach(self) {
        self.cancel.borrow_mut().take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn unsubscribe_runs_once() {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let sub = Subscription::new(move || c.set(c.get() + 1));
        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        drop(Subscription::new(move || c.set(c.get() + 1)));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn detach_never_cancels() {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        Subscription::new(move || c.set(c.get() + 1)).detach();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn inert_is_inactive() {
        let sub = Subscription::inert();
        assert!(!sub.is_active());
        sub.unsubscribe();
    }
}
