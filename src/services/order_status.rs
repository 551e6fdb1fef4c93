use crate::entities::OrderStatus;

/// Edges an administrator may move an order along.
///
/// `PendingConfirmation -> Confirmed -> Shipping -> Delivered`, and any
/// non-terminal status may be cancelled. Nothing leaves `Delivered` or
/// `Cancelled`, and re-applying the current status is not a transition.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    match (from, to) {
        (PendingConfirmation, Confirmed) => true,
        (Confirmed, Shipping) => true,
        (Shipping, Delivered) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

/// Statuses reachable from `from` in one step.
pub fn next_statuses(from: OrderStatus) -> Vec<OrderStatus> {
    use sea_orm::Iterable;

    OrderStatus::iter()
        .filter(|to| is_valid_transition(from, *to))
        .collect()
}

/// Shoppers may only cancel orders nobody has acted on yet.
pub fn user_may_cancel(status: OrderStatus) -> bool {
    status == OrderStatus::PendingConfirmation
}
