use crate::entities::stock_movement::MovementType;
use crate::errors::ServiceError;

/// Rejects non-positive movement amounts.
pub fn ensure_positive_amount(amount: i32) -> Result<(), ServiceError> {
    if amount <= 0 {
        return Err(ServiceError::InvalidMovement(format!(
            "amount must be a positive integer, got {}",
            amount
        )));
    }
    Ok(())
}

/// Decides whether a proposed movement may be applied against the given
/// current quantity. IN has no upper bound; OUT must not drive the quantity
/// negative.
///
/// Pure and side-effect free, so it is safe to call speculatively (e.g. for a
/// "would this succeed" preview). The stock movement service re-runs it
/// inside its transaction against a freshly read quantity; a speculative
/// result is advisory only.
pub fn check_movement(
    current_quantity: i32,
    movement_type: MovementType,
    amount: i32,
) -> Result<(), ServiceError> {
    ensure_positive_amount(amount)?;

    if movement_type == MovementType::Out && current_quantity < amount {
        return Err(ServiceError::InsufficientStock(format!(
            "requested {} but only {} available",
            amount, current_quantity
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use test_case::test_case;

    #[test_case(0, MovementType::In, 1)]
    #[test_case(0, MovementType::In, i32::MAX)]
    #[test_case(5, MovementType::Out, 5)]
    #[test_case(10, MovementType::Out, 1)]
    fn permitted_movements(current: i32, movement_type: MovementType, amount: i32) {
        assert!(check_movement(current, movement_type, amount).is_ok());
    }

    #[test_case(MovementType::In)]
    #[test_case(MovementType::Out)]
    fn non_positive_amounts_are_invalid(movement_type: MovementType) {
        assert_matches!(
            check_movement(10, movement_type, 0),
            Err(ServiceError::InvalidMovement(_))
        );
        assert_matches!(
            check_movement(10, movement_type, -3),
            Err(ServiceError::InvalidMovement(_))
        );
    }

    #[test_case(0, 1)]
    #[test_case(5, 6)]
    #[test_case(30, 100)]
    fn overdraw_is_insufficient_stock(current: i32, amount: i32) {
        assert_matches!(
            check_movement(current, MovementType::Out, amount),
            Err(ServiceError::InsufficientStock(_))
        );
    }

    #[test]
    fn validation_has_no_side_effects_on_repeat() {
        for _ in 0..3 {
            assert!(check_movement(7, MovementType::Out, 7).is_ok());
            assert_matches!(
                check_movement(7, MovementType::Out, 8),
                Err(ServiceError::InsufficientStock(_))
            );
        }
    }
}
