use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
};

type Callback = Box<dyn Fn() + Send + Sync>;

/// Application window open/close counters. Owned by the policy; other
/// threads reach it through a [`WindowManagerObserver`].
///
/// Both counters wrap on overflow.
#[derive(Default)]
pub struct WindowCounters {
    opened: AtomicU64,
    closed: AtomicU64,
    on_opened: Mutex<Vec<Callback>>,
    on_closed: Mutex<Vec<Callback>>,
}

impl WindowCounters {
    pub fn window_opened(&self) {
        self.opened.fetch_add(1, Ordering::AcqRel);
        fire(&self.on_opened);
    }

    pub fn window_closed(&self) {
        self.closed.fetch_add(1, Ordering::AcqRel);
        fire(&self.on_closed);
    }

    pub fn opened_count(&self) -> u64 {
        self.opened.load(Ordering::Acquire)
    }

    pub fn closed_count(&self) -> u64 {
        self.closed.load(Ordering::Acquire)
    }

    pub fn currently_open(&self) -> u64 {
        self.opened_count().wrapping_sub(self.closed_count())
    }
}

impl std::fmt::Debug for WindowCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowCounters")
            .field("opened", &self.opened_count())
            .field("closed", &self.closed_count())
            .finish_non_exhaustive()
    }
}

fn fire(callbacks: &Mutex<Vec<Callback>>) {
    let callbacks = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
    for callback in callbacks.iter() {
        callback();
    }
}

/// Non-owning view of the policy's window counters.
#[derive(Clone, Debug, Default)]
pub struct WindowManagerObserver {
    counters: Weak<WindowCounters>,
}

impl WindowManagerObserver {
    pub fn new(counters: &Arc<WindowCounters>) -> Self {
        Self {
            counters: Arc::downgrade(counters),
        }
    }

    /// Zero once the policy is gone.
    pub fn currently_open_windows(&self) -> u64 {
        self.counters
            .upgrade()
            .map(|counters| counters.currently_open())
            .unwrap_or(0)
    }

    pub fn is_attached(&self) -> bool {
        self.counters.strong_count() > 0
    }

    /// Returns false if the policy has already been torn down.
    pub fn register_opened_callback(&self, callback: impl Fn() + Send + Sync + 'static) -> bool {
        self.register(callback, |counters| &counters.on_opened)
    }

    pub fn register_closed_callback(&self, callback: impl Fn() + Send + Sync + 'static) -> bool {
        self.register(callback, |counters| &counters.on_closed)
    }

    fn register(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
        list: impl FnOnce(&WindowCounters) -> &Mutex<Vec<Callback>>,
    ) -> bool {
        let Some(counters) = self.counters.upgrade() else {
            return false;
        };
        list(counters.as_ref())
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
        true
    }
}
