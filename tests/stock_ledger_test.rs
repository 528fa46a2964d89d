mod common;

use assert_matches::assert_matches;
use common::TestLedger;
use stock_ledger_api::entities::stock_movement::MovementType;
use stock_ledger_api::entities::{stock_audit_log, user};
use stock_ledger_api::errors::ServiceError;
use stock_ledger_api::services::stock_movements::ApplyMovementCommand;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

fn movement(product_id: Uuid, movement_type: MovementType, amount: i32) -> ApplyMovementCommand {
    ApplyMovementCommand {
        product_id,
        movement_type,
        amount,
        actor_id: None,
        request_key: None,
    }
}

#[tokio::test]
async fn in_out_scenario_keeps_ledger_consistent() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Hammer").await;

    let first = ledger
        .service
        .apply_movement(movement(product.id, MovementType::In, 50))
        .await
        .expect("IN(50) should apply");
    assert_eq!(first.previous_quantity, 0);
    assert_eq!(first.new_quantity, 50);
    assert_eq!(ledger.quantity_of(product.id).await, 50);
    assert_eq!(ledger.movement_count(product.id).await, 1);
    assert_eq!(ledger.audit_count(product.id).await, 1);

    let second = ledger
        .service
        .apply_movement(movement(product.id, MovementType::Out, 20))
        .await
        .expect("OUT(20) should apply");
    assert_eq!(second.previous_quantity, 50);
    assert_eq!(second.new_quantity, 30);
    assert_eq!(ledger.quantity_of(product.id).await, 30);

    // Overdraw is rejected and leaves quantity, movements and audit intact.
    let err = ledger
        .service
        .apply_movement(movement(product.id, MovementType::Out, 100))
        .await
        .expect_err("OUT(100) must fail");
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert!(!err.is_retryable());

    assert_eq!(ledger.quantity_of(product.id).await, 30);
    assert_eq!(ledger.movement_count(product.id).await, 2);
    assert_eq!(ledger.audit_count(product.id).await, 2);

    // Cached quantity equals the sum of historical movements.
    assert_eq!(
        i64::from(ledger.quantity_of(product.id).await),
        ledger.ledger_sum(product.id).await
    );
}

#[tokio::test]
async fn malformed_movements_are_rejected_without_writes() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Screwdriver").await;

    for amount in [0, -5] {
        let err = ledger
            .service
            .apply_movement(movement(product.id, MovementType::In, amount))
            .await
            .expect_err("non-positive amount must fail");
        assert_matches!(err, ServiceError::InvalidMovement(_));
    }

    assert_eq!(ledger.quantity_of(product.id).await, 0);
    assert_eq!(ledger.movement_count(product.id).await, 0);
    assert_eq!(ledger.audit_count(product.id).await, 0);
}

#[tokio::test]
async fn movement_against_unknown_product_fails() {
    let ledger = TestLedger::new().await;
    let missing = Uuid::new_v4();

    let err = ledger
        .service
        .apply_movement(movement(missing, MovementType::In, 1))
        .await
        .expect_err("unknown product must fail");
    assert_matches!(err, ServiceError::ProductNotFound(id) if id == missing);
}

#[tokio::test]
async fn audit_entries_attribute_the_actor_and_carry_signed_deltas() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Wrench").await;
    let actor = ledger.seed_user("warehouse-1").await;

    let mut cmd = movement(product.id, MovementType::In, 12);
    cmd.actor_id = Some(actor.id);
    ledger.service.apply_movement(cmd).await.expect("IN(12)");

    let mut cmd = movement(product.id, MovementType::Out, 5);
    cmd.actor_id = Some(actor.id);
    ledger.service.apply_movement(cmd).await.expect("OUT(5)");

    let entries = stock_audit_log::Entity::find()
        .filter(stock_audit_log::Column::ProductId.eq(product.id))
        .all(ledger.db.as_ref())
        .await
        .expect("load audit entries");

    assert_eq!(entries.len(), 2);
    let deltas: Vec<i32> = entries.iter().map(|e| e.delta).collect();
    assert!(deltas.contains(&12));
    assert!(deltas.contains(&-5));
    assert!(entries.iter().all(|e| e.actor_id == Some(actor.id)));
}

#[tokio::test]
async fn replayed_request_key_applies_once() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Drill").await;
    let key = Uuid::new_v4();

    let mut cmd = movement(product.id, MovementType::In, 10);
    cmd.request_key = Some(key);

    let first = ledger
        .service
        .apply_movement(cmd.clone())
        .await
        .expect("first apply");
    let replay = ledger
        .service
        .apply_movement(cmd)
        .await
        .expect("replay must be a no-op");

    assert_eq!(first.id, replay.id);
    assert_eq!(ledger.quantity_of(product.id).await, 10);
    assert_eq!(ledger.movement_count(product.id).await, 1);
    assert_eq!(ledger.audit_count(product.id).await, 1);
}

#[tokio::test]
async fn reversal_restores_quantity_and_links_the_original() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Saw").await;

    ledger
        .service
        .apply_movement(movement(product.id, MovementType::In, 50))
        .await
        .expect("IN(50)");
    let out = ledger
        .service
        .apply_movement(movement(product.id, MovementType::Out, 20))
        .await
        .expect("OUT(20)");
    assert_eq!(ledger.quantity_of(product.id).await, 30);

    let reversal = ledger
        .service
        .reverse_movement(out.id, None)
        .await
        .expect("reversal should apply");
    assert_eq!(reversal.reversal_of, Some(out.id));
    assert_eq!(reversal.movement_type, "IN");
    assert_eq!(reversal.amount, 20);
    assert_eq!(ledger.quantity_of(product.id).await, 50);

    // The compensation is itself a ledger entry with an audit row.
    assert_eq!(ledger.movement_count(product.id).await, 3);
    assert_eq!(ledger.audit_count(product.id).await, 3);
    assert_eq!(
        i64::from(ledger.quantity_of(product.id).await),
        ledger.ledger_sum(product.id).await
    );

    // A movement can only be reversed once, and reversals are final.
    assert_matches!(
        ledger.service.reverse_movement(out.id, None).await,
        Err(ServiceError::InvalidMovement(_))
    );
    assert_matches!(
        ledger.service.reverse_movement(reversal.id, None).await,
        Err(ServiceError::InvalidMovement(_))
    );
}

#[tokio::test]
async fn reversing_an_in_fails_once_the_stock_is_consumed() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Chisel").await;

    let received = ledger
        .service
        .apply_movement(movement(product.id, MovementType::In, 10))
        .await
        .expect("IN(10)");
    ledger
        .service
        .apply_movement(movement(product.id, MovementType::Out, 8))
        .await
        .expect("OUT(8)");

    let err = ledger
        .service
        .reverse_movement(received.id, None)
        .await
        .expect_err("reversing the IN would overdraw");
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(ledger.quantity_of(product.id).await, 2);
    assert_eq!(ledger.movement_count(product.id).await, 2);
}

#[tokio::test]
async fn deleting_an_actor_detaches_but_keeps_audit_entries() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Plane").await;
    let actor = ledger.seed_user("clerk").await;

    let mut cmd = movement(product.id, MovementType::In, 7);
    cmd.actor_id = Some(actor.id);
    ledger.service.apply_movement(cmd).await.expect("IN(7)");

    ledger
        .service
        .delete_actor(actor.id)
        .await
        .expect("actor deletion");

    assert!(user::Entity::find_by_id(actor.id)
        .one(ledger.db.as_ref())
        .await
        .expect("user lookup")
        .is_none());

    let entries = stock_audit_log::Entity::find()
        .filter(stock_audit_log::Column::ProductId.eq(product.id))
        .all(ledger.db.as_ref())
        .await
        .expect("load audit entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor_id, None);
}

#[tokio::test]
async fn preview_is_advisory_and_side_effect_free() {
    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Level").await;

    ledger
        .service
        .apply_movement(movement(product.id, MovementType::In, 3))
        .await
        .expect("IN(3)");

    assert!(ledger
        .service
        .preview_movement(product.id, MovementType::Out, 3)
        .await
        .is_ok());
    assert_matches!(
        ledger
            .service
            .preview_movement(product.id, MovementType::Out, 4)
            .await,
        Err(ServiceError::InsufficientStock(_))
    );

    // Previews never move stock.
    assert_eq!(ledger.quantity_of(product.id).await, 3);
    assert_eq!(ledger.movement_count(product.id).await, 1);
}

#[tokio::test]
async fn dropping_below_threshold_emits_a_low_stock_event() {
    use stock_ledger_api::events::{Event, EventSender};
    use stock_ledger_api::services::stock_movements::StockMovementService;
    use stock_ledger_api::LOW_STOCK_THRESHOLD;
    use tokio::sync::mpsc;

    let ledger = TestLedger::new().await;
    let product = ledger.seed_default_product("Pin").await;

    // A service wired to a channel we hold, so emissions can be observed.
    let (tx, mut rx) = mpsc::channel(16);
    let service = StockMovementService::new(ledger.db.clone(), EventSender::new(tx));

    service
        .apply_movement(movement(product.id, MovementType::In, 3))
        .await
        .expect("IN(3)");

    assert_matches!(
        rx.recv().await.expect("movement event"),
        Event::StockMovementApplied { new_quantity: 3, .. }
    );
    assert_matches!(
        rx.recv().await.expect("low stock event"),
        Event::LowStockDetected { quantity: 3, threshold, .. } if threshold == LOW_STOCK_THRESHOLD
    );

    // Raising the quantity back above the threshold emits no warning.
    service
        .apply_movement(movement(product.id, MovementType::In, 10))
        .await
        .expect("IN(10)");

    assert_matches!(
        rx.recv().await.expect("movement event"),
        Event::StockMovementApplied { new_quantity: 13, .. }
    );
    assert_matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty));
}
