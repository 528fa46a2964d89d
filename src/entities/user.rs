use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimal actor identity for audit attribution. Registration and
/// authentication are owned by the external layer; the ledger only needs a
/// row for the audit trail's weak reference to point at.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub username: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_audit_log::Entity")]
    StockAuditLog,
}

impl Related<super::stock_audit_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockAuditLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
