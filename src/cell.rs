//! A single-completion, observable cell.
//!
//! This is the primitive both the reservation future and a channel
//! creator's shutdown-done future are built from: a value that starts
//! unresolved, completes exactly once, and lets any number of observers
//! either await it or register a callback that fires once the value is
//! known. Listener callbacks run synchronously, in registration order,
//! inside `complete()`. That is what lets a caller register a
//! permit-release listener "first" (at cell-creation time) and rely on it
//! running before any listener registered later observes completion.
use std::sync::Mutex;
use tokio::sync::Notify;

enum State<T> {
    Pending(Vec<Box<dyn FnOnce(&T) + Send>>),
    Done(T),
}

/// A value that is set exactly once and may be observed many times.
pub(crate) struct Cell<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T: Clone> Cell<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
            notify: Notify::new(),
        }
    }

    /// Completes the cell with `value`, running every registered listener
    /// in registration order. A cell that is already complete ignores
    /// subsequent `complete` calls, so this is safe to call more than once
    /// (e.g. from both a caller and a defensive cleanup path).
    pub(crate) fn complete(&self, value: T) {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Done(value.clone())) {
                State::Pending(listeners) => listeners,
                State::Done(previous) => {
                    // Already completed; restore the prior value and do nothing else.
                    *state = State::Done(previous);
                    return;
                }
            }
        };
        for listener in listeners {
            listener(&value);
        }
        self.notify.notify_waiters();
    }

    /// Registers a listener that fires once, with the completed value. If
    /// the cell is already complete, the listener fires immediately,
    /// inline, before this call returns.
    pub(crate) fn on_complete(&self, listener: impl FnOnce(&T) + Send + 'static) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Pending(listeners) => listeners.push(Box::new(listener)),
            State::Done(value) => listener(value),
        }
    }

    /// Waits for the cell to complete and returns a clone of its value.
    ///
    /// Race-free: the `Notified` future is created before the pending
    /// check, so a `complete()` that lands between the check and the
    /// `.await` is not missed.
    pub(crate) async fn wait(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let State::Done(value) = &*self.state.lock().unwrap() {
                return value.clone();
            }
            notified.await;
        }
    }

    /// `true` if the cell has already completed.
    #[cfg(test)]
    pub(crate) fn is_done(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Done(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_after_complete() {
        let cell = Arc::new(Cell::<u32>::new());
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait().await })
        };
        tokio::task::yield_now().await;
        cell.complete(42);
        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn wait_returns_immediately_if_already_done() {
        let cell = Cell::<u32>::new();
        cell.complete(7);
        assert_eq!(cell.wait().await, 7);
    }

    #[test]
    fn listeners_fire_once_in_registration_order() {
        let cell = Cell::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        cell.on_complete(move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        cell.on_complete(move |_| o2.lock().unwrap().push(2));

        cell.complete(1);
        cell.complete(2); // ignored, already done

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn late_listener_fires_immediately() {
        let cell = Cell::<u32>::new();
        cell.complete(5);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        cell.on_complete(move |v| seen2.store(*v as usize, Ordering::SeqCst));
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn complete_is_idempotent() {
        let cell = Cell::<u32>::new();
        cell.complete(1);
        cell.complete(2);
        assert!(cell.is_done());
        assert_eq!(
            match &*cell.state.lock().unwrap() {
                State::Done(v) => *v,
                State::Pending(_) => unreachable!(),
            },
            1
        );
    }
}
