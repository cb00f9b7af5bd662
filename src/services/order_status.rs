use serde::{Deserialize, Serialize};

use crate::entities::order::OrderStatus;

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Customer(i32),
    Staff,
}

impl Actor {
    pub fn is_staff(self) -> bool {
        matches!(self, Actor::Staff)
    }

    /// Staff may act on any order, customers only on their own.
    pub fn may_access(self, customer_id: i32) -> bool {
        match self {
            Actor::Staff => true,
            Actor::Customer(id) => id == customer_id,
        }
    }
}

/// The transition table for placed orders.
///
/// Staff drive the linear path `Pending → Processing → ToShip → Shipped →
/// Completed`. Cancellation is open to customers while the order is `Pending`
/// and to staff while it is `Pending` or `Processing`.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus, actor: Actor) -> bool {
    use OrderStatus::*;

    match (from, to) {
        (Pending, Processing) | (Processing, ToShip) | (ToShip, Shipped) | (Shipped, Completed) => {
            actor.is_staff()
        }
        (Pending, Cancelled) => true,
        (Processing, Cancelled) => actor.is_staff(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use OrderStatus::*;

    #[rstest]
    #[case(Pending, Processing, Actor::Staff, true)]
    #[case(Processing, ToShip, Actor::Staff, true)]
    #[case(ToShip, Shipped, Actor::Staff, true)]
    #[case(Shipped, Completed, Actor::Staff, true)]
    #[case(Pending, Cancelled, Actor::Staff, true)]
    #[case(Processing, Cancelled, Actor::Staff, true)]
    #[case(Pending, Cancelled, Actor::Customer(1), true)]
    #[case(Processing, Cancelled, Actor::Customer(1), false)]
    #[case(Pending, Processing, Actor::Customer(1), false)]
    #[case(Pending, Completed, Actor::Staff, false)]
    #[case(Pending, ToShip, Actor::Staff, false)]
    #[case(ToShip, Cancelled, Actor::Staff, false)]
    #[case(Shipped, Cancelled, Actor::Staff, false)]
    #[case(Completed, Cancelled, Actor::Staff, false)]
    #[case(Cancelled, Pending, Actor::Staff, false)]
    #[case(Shipped, Processing, Actor::Staff, false)]
    #[case(Pending, Pending, Actor::Staff, false)]
    fn transition_table(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] actor: Actor,
        #[case] allowed: bool,
    ) {
        assert_eq!(is_valid_transition(from, to, actor), allowed);
    }

    #[test]
    fn linear_path_ends_in_completed() {
        let mut status = Pending;
        let mut path = vec![status];
        while let Some(next) = status.next() {
            assert!(is_valid_transition(status, next, Actor::Staff));
            status = next;
            path.push(status);
        }
        assert_eq!(path, vec![Pending, Processing, ToShip, Shipped, Completed]);
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn customers_only_reach_their_own_orders() {
        assert!(Actor::Customer(4).may_access(4));
        assert!(!Actor::Customer(4).may_access(5));
        assert!(Actor::Staff.may_access(5));
    }
}
