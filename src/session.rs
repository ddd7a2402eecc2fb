//! Per-connection session state.

use crate::store::{Account, StagedOrder};

/// Authentication and staged-order state for one connection.
///
/// Owned exclusively by its connection handler, so it needs no locking.
#[derive(Debug, Default)]
pub struct Session {
    pub logged_in: bool,
    pub is_staff: bool,
    pub user_id: Option<i64>,
    staged_order: Option<StagedOrder>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&mut self, account: Account) {
        self.logged_in = true;
        self.is_staff = account.is_staff;
        self.user_id = Some(account.user_id);
    }

    /// Drop authentication and any staged order.
    pub fn sign_out(&mut self) {
        *self = Self::default();
    }

    /// True only for a logged-in staff account.
    pub fn has_staff_access(&self) -> bool {
        self.logged_in && self.is_staff
    }

    /// Stage an order, replacing any earlier unpaid one.
    pub fn stage_order(&mut self, order: StagedOrder) {
        self.staged_order = Some(order);
    }

    pub fn staged_order(&self) -> Option<&StagedOrder> {
        self.staged_order.as_ref()
    }

    pub fn take_staged_order(&mut self) -> Option<StagedOrder> {
        self.staged_order.take()
    }
}
