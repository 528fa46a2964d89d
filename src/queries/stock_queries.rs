use crate::{
    entities::{
        category,
        product::{self, Entity as Product},
        stock_audit_log::{self, Entity as StockAuditLog},
    },
    errors::ServiceError,
    LOW_STOCK_THRESHOLD,
};
use async_trait::async_trait;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Read-only view over the ledger store. Queries observe the latest
/// committed state and take no locks.
#[async_trait]
pub trait Query: Send + Sync {
    type Result: Send + Sync;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError>;
}

/// Point read of a product's cached quantity.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetProductQuantityQuery {
    pub product_id: Uuid,
}

#[async_trait]
impl Query for GetProductQuantityQuery {
    type Result = i32;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        Product::find_by_id(self.product_id)
            .one(db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .map(|p| p.quantity)
            .ok_or(ServiceError::ProductNotFound(self.product_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowStockProduct {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
}

/// All products with a quantity strictly below the threshold, lowest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetLowStockQuery {
    pub threshold: i32,
}

impl Default for GetLowStockQuery {
    fn default() -> Self {
        Self {
            threshold: LOW_STOCK_THRESHOLD,
        }
    }
}

#[async_trait]
impl Query for GetLowStockQuery {
    type Result = Vec<LowStockProduct>;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let products = Product::find()
            .filter(product::Column::Quantity.lt(self.threshold))
            .order_by_asc(product::Column::Quantity)
            .all(db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(products
            .into_iter()
            .map(|p| LowStockProduct {
                product_id: p.id,
                name: p.name,
                quantity: p.quantity,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStats {
    pub total_products: i64,
    pub total_quantity: i64,
}

/// Product count and quantity sum per category. Categories without products
/// are absent from the result; no zero rows are emitted.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GetCategoryStatsQuery {}

#[async_trait]
impl Query for GetCategoryStatsQuery {
    type Result = HashMap<String, CategoryStats>;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let rows = Product::find()
            .select_only()
            .column_as(category::Column::Name, "category_name")
            .column_as(
                Expr::col((product::Entity, product::Column::Id)).count(),
                "total_products",
            )
            .column_as(
                Expr::col((product::Entity, product::Column::Quantity)).sum(),
                "total_quantity",
            )
            .join(JoinType::InnerJoin, product::Relation::Category.def())
            .group_by(category::Column::Name)
            .into_tuple::<(String, i64, Option<i64>)>()
            .all(db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .map(|(name, total_products, total_quantity)| {
                (
                    name,
                    CategoryStats {
                        total_products,
                        total_quantity: total_quantity.unwrap_or(0),
                    },
                )
            })
            .collect())
    }
}

/// Audit trail listing, newest first; entries created in the same instant
/// keep their insertion order (identity ascending).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GetAuditHistoryQuery {
    /// Restrict to one product, or list the whole system when absent.
    pub product_id: Option<Uuid>,
}

#[async_trait]
impl Query for GetAuditHistoryQuery {
    type Result = Vec<stock_audit_log::Model>;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let mut query = StockAuditLog::find();

        if let Some(product_id) = self.product_id {
            query = query.filter(stock_audit_log::Column::ProductId.eq(product_id));
        }

        query
            .order_by_desc(stock_audit_log::Column::CreatedAt)
            .order_by_asc(stock_audit_log::Column::Id)
            .all(db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}
