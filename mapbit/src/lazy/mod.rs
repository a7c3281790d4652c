//! Deferred values resolved at most once.
//!
//! [`Lazy`] is the load-once cell every lazy field is built on. Reading a loaded cell never takes a lock,
//! the first reader of an unloaded cell runs the loader while concurrent readers of the same cell block
//! until it finishes. A failed load leaves the cell unloaded so the next access retries.

pub mod data;
pub mod list;
pub mod reference;

pub use data::LazyData;
pub use list::LazyList;
pub use reference::LazyRef;

use crate::error::PersistenceError;
use log::debug;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Performs the underlying fetch of a lazy unit.
pub trait Loader<T>: Send + Sync {
    fn load(&self) -> Result<T, PersistenceError>;
}

impl<T, F> Loader<T> for F
where
    F: Fn() -> Result<T, PersistenceError> + Send + Sync,
{
    fn load(&self) -> Result<T, PersistenceError> {
        self()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

pub struct Lazy<T> {
    cell: OnceCell<T>,
    loading: AtomicBool,
    loader: Option<Arc<dyn Loader<T>>>,
}

impl<T> Lazy<T> {
    pub fn new(loader: Arc<dyn Loader<T>>) -> Self {
        Self { cell: OnceCell::new(), loading: AtomicBool::new(false), loader: Some(loader) }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, PersistenceError> + Send + Sync + 'static,
        T: 'static,
    {
        Self::new(Arc::new(f))
    }

    pub fn loaded(value: T) -> Self {
        Self { cell: OnceCell::with_value(value), loading: AtomicBool::new(false), loader: None }
    }

    pub fn state(&self) -> LoadState {
        if self.cell.get().is_some() {
            LoadState::Loaded
        } else if self.loading.load(Ordering::Acquire) {
            LoadState::Loading
        } else {
            LoadState::Unloaded
        }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Value if already resolved, never triggers a fetch.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Resolves the value, fetching it on first access.
    pub fn get(&self) -> Result<&T, PersistenceError> {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        self.cell.get_or_try_init(|| {
            let loader = self.loader.as_ref().ok_or_else(|| PersistenceError::Custom("lazy unit has no loader".to_string()))?;
            self.loading.store(true, Ordering::Release);
            debug!("lazy unit fetching");
            let result = loader.load();
            self.loading.store(false, Ordering::Release);
            result
        })
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    /// Fresh unit sharing the loader with a reset load state.
    pub fn duplicate(&self) -> Self
    where
        T: Clone,
    {
        match &self.loader {
            Some(loader) => Self::new(loader.clone()),
            None => match self.cell.get() {
                Some(value) => Self::loaded(value.clone()),
                None => Self { cell: OnceCell::new(), loading: AtomicBool::new(false), loader: None },
            },
        }
    }
}

impl<T: Clone> Clone for Lazy<T> {
    /// Keeps the resolved value, unlike [`Lazy::duplicate`].
    fn clone(&self) -> Self {
        let cell = match self.cell.get() {
            Some(value) => OnceCell::with_value(value.clone()),
            None => OnceCell::new(),
        };
        Self { cell, loading: AtomicBool::new(false), loader: self.loader.clone() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(value) => f.debug_tuple("Lazy::Loaded").field(value).finish(),
            None => write!(f, "Lazy::{:?}", self.state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn loads_once_across_threads() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();
        let lazy = Arc::new(Lazy::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok("resolved".to_string())
        }));
        let n = 16;
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n).map(|_| {
            let lazy = lazy.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                lazy.get().unwrap().clone()
            })
        }).collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), "resolved");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.state(), LoadState::Loaded);
    }

    #[test]
    fn failure_leaves_unit_unloaded_for_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let lazy = Lazy::from_fn(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PersistenceError::Backend("connection reset".into()))
            } else {
                Ok(7)
            }
        });
        assert!(lazy.get().is_err());
        assert_eq!(lazy.state(), LoadState::Unloaded);
        assert_eq!(*lazy.get().unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_resets_state_but_shares_loader() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();
        let lazy = Lazy::from_fn(move || Ok(counter.fetch_add(1, Ordering::SeqCst)));
        assert_eq!(*lazy.get().unwrap(), 0);
        let copy = lazy.duplicate();
        assert!(!copy.is_loaded());
        assert_eq!(*copy.get().unwrap(), 1);
        let cloned = lazy.clone();
        assert_eq!(cloned.peek(), Some(&0));
    }

    #[test]
    fn preloaded_unit_never_fetches() {
        let lazy = Lazy::loaded(vec![1, 2]);
        assert!(!lazy.has_loader());
        assert_eq!(lazy.get().unwrap().len(), 2);
        assert_eq!(lazy.duplicate().peek(), Some(&vec![1, 2]));
    }
}
