//! Catalog Module
//!
//! The relational data the API serves. The server only needs the two reads
//! below, so the database sits behind [`Catalog`]; [`InMemoryCatalog`] backs
//! local runs and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub short_description: String,
    pub description: String,
    /// Price in cents
    pub price: i64,
    pub sizes: Vec<String>,
    pub colors: Vec<String>,
    pub images: Vec<String>,
}

// == Catalog ==
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn user(&self, id: i64) -> Result<Option<User>>;

    /// Products ordered by id.
    async fn products(&self, limit: usize, offset: usize) -> Result<Vec<Product>>;
}

// == In-memory Catalog ==
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    users: RwLock<BTreeMap<i64, User>>,
    products: RwLock<BTreeMap<i64, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    pub fn insert_product(&self, product: Product) {
        self.products.write().insert(product.id, product);
    }

    /// A small fixed data set for local runs.
    pub fn seeded() -> Self {
        let catalog = Self::new();
        let created_at = Utc::now();
        for (id, name) in [(1, "Ada Lovelace"), (2, "Grace Hopper"), (3, "Alan Turing")] {
            catalog.insert_user(User {
                id,
                name: name.to_string(),
                email: format!("{}@example.com", name.split(' ').next().unwrap_or(name).to_lowercase()),
                created_at,
            });
        }
        for (id, name, price) in [(1, "Canvas Tote", 2400), (2, "Wool Beanie", 1800), (3, "Linen Shirt", 5600)] {
            catalog.insert_product(Product {
                id,
                name: name.to_string(),
                short_description: format!("{} for everyday use", name),
                description: format!("The {} is made to last.", name.to_lowercase()),
                price,
                sizes: vec!["S".to_string(), "M".to_string(), "L".to_string()],
                colors: vec!["black".to_string(), "natural".to_string()],
                images: vec![format!("/images/products/{}.jpg", id)],
            });
        }
        catalog
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn products(&self, limit: usize, offset: usize) -> Result<Vec<Product>> {
        Ok(self
            .products
            .read()
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
