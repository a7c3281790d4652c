#![allow(dead_code)]

use mapbit::meta::ColumnMeta;
use mapbit::memory::MemoryStore;
use mapbit::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub dogs: LazyList<Dog>,
}

#[derive(Debug, Default)]
pub struct Dog {
    pub id: i64,
    pub name: String,
    pub bio: LazyData<String>,
    pub tags: Vec<String>,
    pub owner: LazyRef<Owner>,
    pub pals: LazyList<Dog>,
}

#[derive(Debug, Default)]
pub struct Cat {
    pub id: i64,
    pub name: String,
    pub lives: i64,
}

#[derive(Debug, Default)]
pub struct Badge {
    pub id: uuid::Uuid,
    pub name: String,
    pub level: i64,
}

mapbit::impl_entity!(Owner, Dog, Cat, Badge);

pub fn dog(name: &str) -> Dog {
    Dog { name: name.to_string(), bio: LazyData::new(format!("{name} is a good dog")), ..Default::default() }
}

pub fn registry() -> MetaRegistry {
    let owner = EntityMeta::builder::<Owner>("Owner")
        .column(ColumnMeta::plain("id", ValueType::Int, field(|o: &Owner| &o.id, |o: &mut Owner| &mut o.id)).primary_key())
        .column(ColumnMeta::plain("name", ValueType::Text, field(|o: &Owner| &o.name, |o: &mut Owner| &mut o.name)))
        .column(ColumnMeta::mapped("dogs", "Dog", "owner", list(|o: &Owner| &o.dogs, |o: &mut Owner| &mut o.dogs)))
        .build()
        .unwrap();
    let dog = EntityMeta::builder::<Dog>("Dog")
        .column(ColumnMeta::plain("id", ValueType::Int, field(|d: &Dog| &d.id, |d: &mut Dog| &mut d.id)).primary_key())
        .column(ColumnMeta::plain("name", ValueType::Text, field(|d: &Dog| &d.name, |d: &mut Dog| &mut d.name)))
        .column(ColumnMeta::plain("bio", ValueType::Text, lazy_field(|d: &Dog| &d.bio, |d: &mut Dog| &mut d.bio)).lazy())
        .column(ColumnMeta::collection("tags", ValueType::Text, field(|d: &Dog| &d.tags, |d: &mut Dog| &mut d.tags)))
        .column(ColumnMeta::join("owner", "Owner", reference(|d: &Dog| &d.owner, |d: &mut Dog| &mut d.owner)))
        .column(ColumnMeta::join_collection("pals", "Dog", list(|d: &Dog| &d.pals, |d: &mut Dog| &mut d.pals)))
        .generator("id", Arc::new(SequenceGenerator::starting_at(1)))
        .discriminator("kind", "dog")
        .build()
        .unwrap();
    let cat = EntityMeta::builder::<Cat>("Cat")
        .column(ColumnMeta::plain("id", ValueType::Int, field(|c: &Cat| &c.id, |c: &mut Cat| &mut c.id)).primary_key())
        .column(ColumnMeta::plain("name", ValueType::Text, field(|c: &Cat| &c.name, |c: &mut Cat| &mut c.name)))
        .column(ColumnMeta::plain("lives", ValueType::Int, field(|c: &Cat| &c.lives, |c: &mut Cat| &mut c.lives)))
        .discriminator("kind", "cat")
        .build()
        .unwrap();
    let badge = EntityMeta::builder::<Badge>("Badge")
        .column(ColumnMeta::plain("id", ValueType::Uuid, field(|b: &Badge| &b.id, |b: &mut Badge| &mut b.id)).primary_key())
        .column(ColumnMeta::plain("name", ValueType::Text, field(|b: &Badge| &b.name, |b: &mut Badge| &mut b.name)).primary_key())
        .column(ColumnMeta::plain("level", ValueType::Int, field(|b: &Badge| &b.level, |b: &mut Badge| &mut b.level)))
        .build()
        .unwrap();
    MetaRegistry::builder()
        .entity(owner)
        .entity(dog)
        .entity(cat)
        .entity(badge)
        .hierarchy("Animal", &["Dog", "Cat"])
        .build()
        .unwrap()
}

pub fn engine(store: Arc<dyn DataStore>) -> Engine {
    Engine::new(registry(), store, EngineSettings::default())
}

/// Counts the fetches of lazily loaded columns and collections.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub column_fetches: Arc<AtomicUsize>,
    pub row_loads: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn column_fetches(&self) -> usize {
        self.column_fetches.load(Ordering::SeqCst)
    }

    pub fn row_loads(&self) -> usize {
        self.row_loads.load(Ordering::SeqCst)
    }
}

impl DataStore for CountingStore {
    fn open(&self) -> Result<Box<dyn DataHandler>, PersistenceError> {
        Ok(Box::new(CountingHandler { inner: self.inner.open()?, store: self.clone() }))
    }
}

struct CountingHandler {
    inner: Box<dyn DataHandler>,
    store: CountingStore,
}

impl DataHandler for CountingHandler {
    fn save(&self, meta: &EntityMeta, table: &TableMeta, data: ColumnData) -> Result<bool, PersistenceError> {
        self.inner.save(meta, table, data)
    }
    fn save_collection(&self, meta: &EntityMeta, table: &TableMeta, keys: ColumnData, column: &ColumnMeta, items: Vec<Value>) -> Result<bool, PersistenceError> {
        self.inner.save_collection(meta, table, keys, column, items)
    }
    fn delete(&self, meta: &EntityMeta, table: &TableMeta, keys: ColumnData) -> Result<bool, PersistenceError> {
        self.inner.delete(meta, table, keys)
    }
    fn load(&self, context: &EntityContext, keys: &ColumnData) -> Result<Option<ColumnData>, PersistenceError> {
        self.store.row_loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(context, keys)
    }
    fn load_column(&self, meta: &EntityMeta, table: &TableMeta, column: &ColumnMeta, keys: &ColumnData) -> Result<Value, PersistenceError> {
        self.store.column_fetches.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        self.inner.load_column(meta, table, column, keys)
    }
    fn load_collection(&self, meta: &EntityMeta, table: &TableMeta, column: &ColumnMeta, keys: &ColumnData) -> Result<Vec<Value>, PersistenceError> {
        self.store.column_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.load_collection(meta, table, column, keys)
    }
    fn find_by(&self, context: &EntityContext, column: &str, value: &Value) -> Result<Vec<ColumnData>, PersistenceError> {
        self.inner.find_by(context, column, value)
    }
    fn query(&self, context: &EntityContext, name: &str, params: &ColumnData) -> Result<Vec<ColumnData>, PersistenceError> {
        self.inner.query(context, name, params)
    }
    fn pending_work(&self) -> bool {
        self.inner.pending_work()
    }
    fn begin_work(&self) -> Result<(), PersistenceError> {
        self.inner.begin_work()
    }
    fn commit_work(&self) -> Result<(), PersistenceError> {
        self.inner.commit_work()
    }
    fn rollback_work(&self) -> Result<(), PersistenceError> {
        self.inner.rollback_work()
    }
}
