use crate::{
    db::DbPool,
    entities::{
        product::{self, Entity as Product},
        stock_audit_log::{self, Entity as StockAuditLog},
        stock_movement::{self, Entity as StockMovement, MovementType},
        user::Entity as User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::movement_validation::{check_movement, ensure_positive_amount},
    LOW_STOCK_THRESHOLD,
};
use dashmap::DashMap;
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionError,
    TransactionTrait,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A movement intent as received from the external layer.
#[derive(Debug, Clone)]
pub struct ApplyMovementCommand {
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub amount: i32,
    /// Acting identity recorded on the audit entry; optional because system
    /// jobs move stock too.
    pub actor_id: Option<Uuid>,
    /// Caller-supplied idempotency token. A key the ledger has already seen
    /// returns the stored movement as a no-op instead of applying twice.
    pub request_key: Option<Uuid>,
}

/// Service owning every write to the stock ledger.
///
/// This is the single mutation point for `products.quantity`: validation,
/// the quantity update, the movement insert and the audit insert all happen
/// in one transaction, serialized per product so concurrent requests cannot
/// race past the validate-then-apply window. No other code path may write
/// the quantity column.
#[derive(Clone)]
pub struct StockMovementService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    lock_acquire_timeout: Duration,
}

impl StockMovementService {
    /// Creates a new stock movement service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self::with_lock_timeout(db_pool, event_sender, Duration::from_secs(5))
    }

    /// Creates a service with an explicit bound on stock-lock acquisition.
    pub fn with_lock_timeout(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        lock_acquire_timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            locks: Arc::new(DashMap::new()),
            lock_acquire_timeout,
        }
    }

    /// Applies exactly one movement to exactly one product, atomically.
    ///
    /// On success the committed movement row is returned; its
    /// `previous_quantity`/`new_quantity` snapshot reflects the transition
    /// this call performed. Failures leave quantity, movement log and audit
    /// log untouched. Retryable failures (see
    /// [`ServiceError::is_retryable`]) may be replayed with the same
    /// `request_key` without risk of double-application.
    #[instrument(skip(self), fields(product_id = %cmd.product_id))]
    pub async fn apply_movement(
        &self,
        cmd: ApplyMovementCommand,
    ) -> Result<stock_movement::Model, ServiceError> {
        self.apply(cmd, None).await
    }

    /// Writes a compensating movement that undoes `movement_id`.
    ///
    /// The ledger is append-only: movements are never deleted, so this is
    /// the only correction path. The compensation goes through the full
    /// apply pipeline, which means reversing an IN fails with
    /// `InsufficientStock` when the stock has since been consumed. A
    /// movement can be reversed once, and a reversal cannot itself be
    /// reversed.
    #[instrument(skip(self))]
    pub async fn reverse_movement(
        &self,
        movement_id: i64,
        actor_id: Option<Uuid>,
    ) -> Result<stock_movement::Model, ServiceError> {
        let db = self.db_pool.as_ref();

        let original = StockMovement::find_by_id(movement_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Stock movement {} not found", movement_id))
            })?;

        if original.reversal_of.is_some() {
            return Err(ServiceError::InvalidMovement(format!(
                "movement {} is itself a reversal and cannot be reversed",
                movement_id
            )));
        }

        let movement_type = original.movement_type().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "movement {} carries unknown type {:?}",
                movement_id, original.movement_type
            ))
        })?;

        let cmd = ApplyMovementCommand {
            product_id: original.product_id,
            movement_type: movement_type.opposite(),
            amount: original.amount,
            actor_id,
            request_key: None,
        };

        self.apply(cmd, Some(movement_id)).await
    }

    /// Advisory "would this movement succeed" check against the latest
    /// committed quantity. Does not lock anything; the answer can be stale
    /// by the time a real `apply_movement` runs.
    #[instrument(skip(self))]
    pub async fn preview_movement(
        &self,
        product_id: Uuid,
        movement_type: MovementType,
        amount: i32,
    ) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();

        let current = Product::find_by_id(product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::ProductNotFound(product_id))?
            .quantity;

        check_movement(current, movement_type, amount)
    }

    /// Deletes an acting identity while retaining its audit trail: the
    /// entries' `actor_id` is cleared in the same transaction that removes
    /// the user row.
    #[instrument(skip(self))]
    pub async fn delete_actor(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();

        let detached = db
            .transaction::<_, u64, ServiceError>(move |txn| {
                Box::pin(async move {
                    User::find_by_id(user_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("User {} not found", user_id))
                        })?;

                    let update = StockAuditLog::update_many()
                        .col_expr(
                            stock_audit_log::Column::ActorId,
                            Expr::value(sea_orm::Value::Uuid(None)),
                        )
                        .filter(stock_audit_log::Column::ActorId.eq(user_id))
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    User::delete_by_id(user_id)
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    Ok(update.rows_affected)
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        if let Err(e) = self
            .event_sender
            .send(Event::ActorDeleted {
                user_id,
                audit_entries_detached: detached,
            })
            .await
        {
            warn!(%user_id, error = %e, "Failed to emit actor-deleted event");
        }

        Ok(())
    }

    async fn apply(
        &self,
        cmd: ApplyMovementCommand,
        reversal_of: Option<i64>,
    ) -> Result<stock_movement::Model, ServiceError> {
        // Reject malformed input before taking the lock; the authoritative
        // validation still runs inside the transaction.
        ensure_positive_amount(cmd.amount)?;

        let _guard = self.acquire_product_lock(cmd.product_id).await?;

        let db = self.db_pool.as_ref();
        let start = Instant::now();
        let txn_cmd = cmd.clone();

        let (movement, applied) = db
            .transaction::<_, (stock_movement::Model, bool), ServiceError>(move |txn| {
                Box::pin(async move {
                    // Idempotent replay: a request key the ledger has seen
                    // returns the stored movement without touching anything.
                    if let Some(key) = txn_cmd.request_key {
                        if let Some(prior) = StockMovement::find()
                            .filter(stock_movement::Column::RequestKey.eq(key))
                            .one(txn)
                            .await
                            .map_err(ServiceError::db_error)?
                        {
                            return Ok((prior, false));
                        }
                    }

                    if let Some(original_id) = reversal_of {
                        let already_reversed = StockMovement::find()
                            .filter(stock_movement::Column::ReversalOf.eq(original_id))
                            .one(txn)
                            .await
                            .map_err(ServiceError::db_error)?;
                        if already_reversed.is_some() {
                            return Err(ServiceError::InvalidMovement(format!(
                                "movement {} is already reversed",
                                original_id
                            )));
                        }
                    }

                    let product = Product::find_by_id(txn_cmd.product_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or(ServiceError::ProductNotFound(txn_cmd.product_id))?;

                    // Re-validate against the quantity read under the lock;
                    // any speculative pre-check is not trusted here.
                    check_movement(product.quantity, txn_cmd.movement_type, txn_cmd.amount)?;

                    let previous_quantity = product.quantity;
                    let new_quantity =
                        previous_quantity + txn_cmd.movement_type.delta(txn_cmd.amount);

                    let mut active_product: product::ActiveModel = product.into();
                    active_product.quantity = Set(new_quantity);
                    active_product
                        .update(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    let movement = stock_movement::ActiveModel {
                        product_id: Set(txn_cmd.product_id),
                        movement_type: Set(txn_cmd.movement_type.as_str().to_string()),
                        amount: Set(txn_cmd.amount),
                        previous_quantity: Set(previous_quantity),
                        new_quantity: Set(new_quantity),
                        request_key: Set(txn_cmd.request_key),
                        reversal_of: Set(reversal_of),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    stock_audit_log::ActiveModel {
                        product_id: Set(txn_cmd.product_id),
                        delta: Set(txn_cmd.movement_type.delta(txn_cmd.amount)),
                        movement_type: Set(txn_cmd.movement_type.as_str().to_string()),
                        actor_id: Set(txn_cmd.actor_id),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    Ok((movement, true))
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        histogram!("stock_ledger.movement.duration", start.elapsed());

        if !applied {
            counter!("stock_ledger.movement.replayed", 1);
            info!(
                movement_id = movement.id,
                "Replayed idempotent movement request"
            );
            return Ok(movement);
        }

        counter!(
            "stock_ledger.movement.applied",
            1,
            "movement_type" => cmd.movement_type.as_str()
        );

        info!(
            movement_id = movement.id,
            movement_type = %movement.movement_type,
            amount = movement.amount,
            previous_quantity = movement.previous_quantity,
            new_quantity = movement.new_quantity,
            "Applied stock movement"
        );

        // The movement is committed; event delivery is best-effort and never
        // unwinds it.
        let event = match movement.reversal_of {
            Some(original_id) => Event::StockMovementReversed {
                movement_id: movement.id,
                reversal_of: original_id,
                product_id: movement.product_id,
                new_quantity: movement.new_quantity,
                actor_id: cmd.actor_id,
            },
            None => Event::StockMovementApplied {
                movement_id: movement.id,
                product_id: movement.product_id,
                movement_type: movement.movement_type.clone(),
                amount: movement.amount,
                previous_quantity: movement.previous_quantity,
                new_quantity: movement.new_quantity,
                actor_id: cmd.actor_id,
                occurred_at: movement.created_at,
            },
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(movement_id = movement.id, error = %e, "Failed to emit movement event");
        }

        if movement.new_quantity < LOW_STOCK_THRESHOLD {
            if let Err(e) = self
                .event_sender
                .send(Event::LowStockDetected {
                    product_id: movement.product_id,
                    quantity: movement.new_quantity,
                    threshold: LOW_STOCK_THRESHOLD,
                })
                .await
            {
                warn!(product_id = %movement.product_id, error = %e, "Failed to emit low-stock event");
            }
        }

        Ok(movement)
    }

    /// Serializes movements per product. Movements for different products
    /// proceed in parallel; waiting is bounded, and expiry surfaces as a
    /// retryable lock-timeout error rather than blocking indefinitely.
    async fn acquire_product_lock(
        &self,
        product_id: Uuid,
    ) -> Result<OwnedMutexGuard<()>, ServiceError> {
        let lock = self
            .locks
            .entry(product_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(self.lock_acquire_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                counter!("stock_ledger.movement.lock_timeout", 1);
                warn!(%product_id, "Timed out waiting for product stock lock");
                Err(ServiceError::LockTimeout(product_id))
            }
        }
    }
}
