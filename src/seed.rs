//! Sample e-commerce database used by the CLI demo and the tests.

use crate::error::Result;
use crate::store::SqliteStore;
use tracing::info;

pub const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    user_id TEXT,
    product_id TEXT,
    city TEXT,
    order_date DATETIME,
    quantity INTEGER
);

CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    username TEXT
);
"#;

pub const SAMPLE_DATA: &str = r#"
INSERT OR REPLACE INTO orders (order_id, user_id, product_id, city, order_date, quantity) VALUES
('550e8400-e29b-41d4-a716-446655440000', '6ba7b810-9dad-11d1-80b4-00c04fd430c8', '123e4567-e89b-12d3-a456-426614174000', 'Bangalore', '2025-07-25 10:00:00', 2),
('550e8400-e29b-41d4-a716-446655440001', '6ba7b811-9dad-11d1-80b4-00c04fd430c8', '123e4567-e89b-12d3-a456-426614174001', 'Bangalore', '2025-07-24 12:00:00', 1),
('550e8400-e29b-41d4-a716-446655440002', '6ba7b810-9dad-11d1-80b4-00c04fd430c8', '123e4567-e89b-12d3-a456-426614174002', 'Mumbai', '2025-07-20 15:00:00', 3),
('550e8400-e29b-41d4-a716-446655440003', '6ba7b810-9dad-11d1-80b4-00c04fd430c8', '123e4567-e89b-12d3-a456-426614174003', 'Bangalore', '2025-07-23 09:00:00', 4),
('550e8400-e29b-41d4-a716-446655440004', '6ba7b810-9dad-11d1-80b4-00c04fd430c8', '123e4567-e89b-12d3-a456-426614174004', 'Bangalore', '2025-07-22 14:00:00', 1);

INSERT OR REPLACE INTO users (user_id, username) VALUES
('6ba7b810-9dad-11d1-80b4-00c04fd430c8', 'alice'),
('6ba7b811-9dad-11d1-80b4-00c04fd430c8', 'bob');
"#;

pub const DEMO_QUESTIONS: [&str; 2] = [
    "Show the top 10 products sold in Bangalore in the last 7 days.",
    "List users who made more than 3 purchases in a month.",
];

/// Create the schema and load the sample rows. Safe to run repeatedly.
pub fn bootstrap(store: &SqliteStore) -> Result<()> {
    store.execute_batch(SCHEMA_DDL)?;
    store.execute_batch(SAMPLE_DATA)?;
    info!("Sample database created and populated");
    Ok(())
}
