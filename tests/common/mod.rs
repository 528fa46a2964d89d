#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use stock_ledger_api::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{category, product, stock_audit_log, stock_movement, supplier, user},
    events::{self, EventSender},
    services::stock_movements::StockMovementService,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Helper harness backing each test with a fresh on-disk SQLite database and
/// a fully wired stock movement service.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub service: StockMovementService,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestLedger {
    /// Construct a new test ledger with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = db_dir.path().join("stock_ledger_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        let db_arc = Arc::new(pool);
        let (tx, rx) = mpsc::channel(256);
        let sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let service = StockMovementService::with_lock_timeout(
            db_arc.clone(),
            sender,
            Duration::from_secs(5),
        );

        Self {
            db: db_arc,
            service,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    pub async fn seed_category(&self, name: &str) -> category::Model {
        category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(String::new()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to insert category")
    }

    pub async fn seed_supplier(&self, name: &str) -> supplier::Model {
        supplier::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(format!("{}@example.com", name.to_lowercase())),
            phone: Set("555-0100".to_string()),
            address: Set("1 Warehouse Way".to_string()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to insert supplier")
    }

    pub async fn seed_user(&self, username: &str) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(username.to_string()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to insert user")
    }

    /// Inserts a product under the given category/supplier. Products always
    /// start at quantity zero; stock only arrives through movements.
    pub async fn seed_product(
        &self,
        name: &str,
        category: &category::Model,
        supplier: &supplier::Model,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            category_id: Set(category.id),
            supplier_id: Set(supplier.id),
            price: Set(dec!(9.99)),
            quantity: Set(0),
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to insert product")
    }

    /// Category + supplier + product in one call for tests that only need a
    /// product to move stock against.
    pub async fn seed_default_product(&self, name: &str) -> product::Model {
        let category = self.seed_category("Tools").await;
        let supplier = self.seed_supplier("Acme").await;
        self.seed_product(name, &category, &supplier).await
    }

    pub async fn quantity_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.db.as_ref())
            .await
            .expect("failed to load product")
            .expect("product missing")
            .quantity
    }

    pub async fn movement_count(&self, product_id: Uuid) -> u64 {
        stock_movement::Entity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .count(self.db.as_ref())
            .await
            .expect("failed to count movements")
    }

    pub async fn audit_count(&self, product_id: Uuid) -> u64 {
        stock_audit_log::Entity::find()
            .filter(stock_audit_log::Column::ProductId.eq(product_id))
            .count(self.db.as_ref())
            .await
            .expect("failed to count audit entries")
    }

    /// The ledger-derived quantity: sum of IN amounts minus sum of OUT
    /// amounts over the movement log.
    pub async fn ledger_sum(&self, product_id: Uuid) -> i64 {
        let movements = stock_movement::Entity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .all(self.db.as_ref())
            .await
            .expect("failed to load movements");

        movements
            .iter()
            .map(|m| match m.movement_type.as_str() {
                "IN" => i64::from(m.amount),
                "OUT" => -i64::from(m.amount),
                other => panic!("unexpected movement type {other}"),
            })
            .sum()
    }
}
