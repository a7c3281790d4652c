use crate::error::PersistenceError;
use crate::meta::EntityMeta;
use crate::persist::CounterStore;
use crate::retry::retry_bounded;
use crate::value::{Key, Value};
use log::debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Produces a key for an entity whose key property is still empty.
pub trait IdGenerator: Send + Sync {
    fn generate(&self, meta: &EntityMeta) -> Result<Key, PersistenceError>;
}

#[derive(Default, Debug)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self, _meta: &EntityMeta) -> Result<Key, PersistenceError> {
        Ok(Key::Simple(Value::Uuid(Uuid::new_v4())))
    }
}

/// In-process monotonic counter.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicI64,
}

impl SequenceGenerator {
    pub fn starting_at(first: i64) -> Self {
        Self { next: AtomicI64::new(first) }
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceGenerator {
    fn generate(&self, _meta: &EntityMeta) -> Result<Key, PersistenceError> {
        Ok(Key::Simple(Value::Int(self.next.fetch_add(1, Ordering::SeqCst))))
    }
}

pub const DEFAULT_RETRY_BUDGET: usize = 10;

/// Counter kept by the backend, advanced by compare-and-set.
///
/// Generation is serialized per generator, conflicts with other processes are retried within the budget.
pub struct TableGenerator {
    counter: String,
    store: Arc<dyn CounterStore>,
    retry_budget: usize,
    lock: Mutex<()>,
}

impl TableGenerator {
    pub fn new(counter: impl Into<String>, store: Arc<dyn CounterStore>) -> Self {
        Self { counter: counter.into(), store, retry_budget: DEFAULT_RETRY_BUDGET, lock: Mutex::new(()) }
    }

    pub fn with_retry_budget(mut self, attempts: usize) -> Self {
        self.retry_budget = attempts.max(1);
        self
    }

    fn advance(&self) -> Result<i64, PersistenceError> {
        let current = self.store.current(&self.counter)?;
        let next = current.unwrap_or(0) + 1;
        if self.store.compare_and_set(&self.counter, current, next)? {
            Ok(next)
        } else {
            Err(PersistenceError::Backend(format!("counter {} moved concurrently", self.counter)))
        }
    }
}

impl IdGenerator for TableGenerator {
    fn generate(&self, meta: &EntityMeta) -> Result<Key, PersistenceError> {
        let _serial = self.lock.lock()?;
        let next = retry_bounded(self.retry_budget, |attempt| {
            let result = self.advance();
            if let Err(e) = &result {
                debug!("counter {} attempt {attempt} for {} failed: {e}", self.counter, meta.name());
            }
            result
        })
        .map_err(|e| match e {
            PersistenceError::Backend(message) => {
                PersistenceError::RetryExhausted { attempts: self.retry_budget, context: message }
            }
            other => other,
        })?;
        Ok(Key::Simple(Value::Int(next)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::field;
    use crate::meta::ColumnMeta;
    use crate::value::ValueType;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Debug, Default)]
    struct Ticket { id: i64 }
    crate::impl_entity!(Ticket);

    fn meta() -> Arc<EntityMeta> {
        EntityMeta::builder::<Ticket>("Ticket")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|t: &Ticket| &t.id, |t: &mut Ticket| &mut t.id)).primary_key())
            .build()
            .unwrap()
    }

    #[derive(Default)]
    struct Counters {
        values: Mutex<HashMap<String, i64>>,
        conflicts: AtomicUsize,
    }

    impl CounterStore for Counters {
        fn current(&self, counter: &str) -> Result<Option<i64>, PersistenceError> {
            Ok(self.values.lock()?.get(counter).copied())
        }

        fn compare_and_set(&self, counter: &str, expected: Option<i64>, next: i64) -> Result<bool, PersistenceError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                return Ok(false);
            }
            let mut values = self.values.lock()?;
            if values.get(counter).copied() != expected {
                return Ok(false);
            }
            values.insert(counter.to_string(), next);
            Ok(true)
        }
    }

    #[test]
    fn table_generator_survives_transient_conflicts() {
        let store = Arc::new(Counters::default());
        store.conflicts.store(3, Ordering::SeqCst);
        let generator = TableGenerator::new("tickets", store.clone());
        assert_eq!(generator.generate(&meta()).unwrap(), Key::Simple(Value::Int(1)));
        assert_eq!(generator.generate(&meta()).unwrap(), Key::Simple(Value::Int(2)));
    }

    #[test]
    fn table_generator_exhausts_its_budget() {
        let store = Arc::new(Counters::default());
        store.conflicts.store(100, Ordering::SeqCst);
        let generator = TableGenerator::new("tickets", store.clone()).with_retry_budget(4);
        let err = generator.generate(&meta()).unwrap_err();
        assert!(matches!(err, PersistenceError::RetryExhausted { attempts: 4, .. }));
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 96);
    }

    #[test]
    fn concurrent_generation_yields_distinct_keys() {
        let store: Arc<dyn CounterStore> = Arc::new(Counters::default());
        let generator = Arc::new(TableGenerator::new("tickets", store));
        let meta = meta();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                let meta = meta.clone();
                thread::spawn(move || (0..25).map(|_| generator.generate(&meta).unwrap()).collect::<Vec<_>>())
            })
            .collect();
        let mut keys: Vec<Key> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = keys.len();
        keys.sort_by_key(|k| k.to_string());
        keys.dedup();
        assert_eq!(keys.len(), total);
        assert_eq!(total, 200);
    }

    #[test]
    fn uuid_and_sequence_generators() {
        let meta = meta();
        assert_ne!(UuidGenerator.generate(&meta).unwrap(), UuidGenerator.generate(&meta).unwrap());
        let seq = SequenceGenerator::starting_at(10);
        assert_eq!(seq.generate(&meta).unwrap(), Key::from(10i64));
        assert_eq!(seq.generate(&meta).unwrap(), Key::from(11i64));
    }
}
