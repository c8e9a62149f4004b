//! Service wiring: user store plus the thin storefront collaborators the
//! middleware stack protects (catalog reads, cart mutations).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use storefront_auth::UserStore;
use storefront_core::UserId;
use storefront_infra::{InMemoryUserStore, PostgresUserStore};

/// Catalog entry exposed by the read-only product routes.
#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
}

/// Static demo catalog. Catalog persistence is an external collaborator and
/// out of scope; the routes exist to exercise the middleware stack.
#[derive(Debug)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn with_demo_data() -> Self {
        Self {
            products: vec![
                Product {
                    id: "SKU-1001".into(),
                    name: "Walnut desk organizer".into(),
                    price_cents: 4_900,
                },
                Product {
                    id: "SKU-1002".into(),
                    name: "Brass desk lamp".into(),
                    price_cents: 12_900,
                },
                Product {
                    id: "SKU-1003".into(),
                    name: "Linen notebook".into(),
                    price_cents: 1_900,
                },
            ],
        }
    }

    pub fn list(&self) -> &[Product] {
        &self.products
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn search(&self, query: &str) -> Vec<&Product> {
        let needle = query.to_lowercase();
        self.products
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
}

/// Per-user carts, keyed by the verified identity from the request context.
#[derive(Debug, Default)]
pub struct CartService {
    inner: Mutex<HashMap<UserId, Vec<CartLine>>>,
}

impl CartService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: UserId, product_id: &str, quantity: u32) -> Vec<CartLine> {
        let mut carts = self.inner.lock().unwrap();
        let lines = carts.entry(user_id).or_default();

        if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity += quantity;
        } else {
            lines.push(CartLine {
                product_id: product_id.to_string(),
                quantity,
            });
        }
        lines.clone()
    }

    pub fn items(&self, user_id: UserId) -> Vec<CartLine> {
        self.inner
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct AppServices {
    pub users: Arc<dyn UserStore>,
    pub catalog: Arc<Catalog>,
    pub carts: Arc<CartService>,
}

impl AppServices {
    /// In-memory wiring (dev/test).
    pub fn in_memory() -> Self {
        Self::with_user_store(Arc::new(InMemoryUserStore::new()))
    }

    /// Postgres-backed wiring (production).
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::with_user_store(Arc::new(PostgresUserStore::new(pool)))
    }

    pub fn with_user_store(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            catalog: Arc::new(Catalog::with_demo_data()),
            carts: Arc::new(CartService::new()),
        }
    }
}
