#![allow(dead_code)]

use async_trait::async_trait;
use nl2sql_repair::config::{EngineConfig, RetryPacing};
use nl2sql_repair::error::{RepairError, Result};
use nl2sql_repair::llm::Translator;
use nl2sql_repair::store::{QueryOutput, QueryStore, SqliteStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const ORDERS_DDL: &str = "
CREATE TABLE orders (
    order_id TEXT PRIMARY KEY,
    user_id TEXT,
    product_id TEXT,
    city TEXT,
    order_date DATETIME,
    quantity INTEGER
);";

/// Four Bangalore orders, one of them outside the week before 2025-07-26.
pub const ORDERS_ROWS: &str = "
INSERT INTO orders VALUES
('o1', 'u1', 'p1', 'Bangalore', '2025-07-25 10:00:00', 2),
('o2', 'u2', 'p2', 'Bangalore', '2025-07-24 12:00:00', 1),
('o3', 'u1', 'p3', 'Mumbai',    '2025-07-20 15:00:00', 3),
('o4', 'u1', 'p4', 'Bangalore', '2025-07-23 09:00:00', 4),
('o5', 'u1', 'p5', 'Bangalore', '2025-07-10 14:00:00', 1);";

pub const BANGALORE_LAST_WEEK: &str = "SELECT order_id FROM orders \
     WHERE city = 'Bangalore' AND order_date >= datetime('2025-07-26', '-7 days') \
     ORDER BY order_id";

pub fn orders_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.execute_batch(ORDERS_DDL).unwrap();
    store.execute_batch(ORDERS_ROWS).unwrap();
    store
}

pub fn fast_config(max_attempts: u32) -> EngineConfig {
    EngineConfig {
        max_attempts,
        pacing: RetryPacing::none(),
        ..EngineConfig::default()
    }
}

/// Translator driven by a closure over (prompt, 1-based call number)
pub struct FnTranslator<F> {
    reply: F,
    prompts: Mutex<Vec<String>>,
}

impl<F> FnTranslator<F>
where
    F: Fn(&str, usize) -> Result<String> + Send + Sync,
{
    pub fn new(reply: F) -> Self {
        Self {
            reply,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl<F> Translator for FnTranslator<F>
where
    F: Fn(&str, usize) -> Result<String> + Send + Sync,
{
    async fn translate(&self, prompt: &str) -> Result<String> {
        let call = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len()
        };
        (self.reply)(prompt, call)
    }
}

pub fn unreachable_translator() -> FnTranslator<impl Fn(&str, usize) -> Result<String> + Send + Sync> {
    FnTranslator::new(|_: &str, _: usize| Err(RepairError::Translation("service unreachable".to_string())))
}

/// Counts execute calls on top of a real store
pub struct CountingStore<S> {
    inner: S,
    calls: AtomicUsize,
}

impl<S: QueryStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: QueryStore> QueryStore for CountingStore<S> {
    async fn execute(&self, query: &str) -> Result<QueryOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(query).await
    }
}
