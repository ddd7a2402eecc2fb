//! Request dispatch.
//!
//! Maps a classified [`Request`] onto the order store and packages the
//! result as a [`Response`]. Staff-only requests go through a single guard
//! that answers with the access-denied message before the store is touched.

use crate::request::{OrderLine, Request};
use crate::session::Session;
use crate::store::{LineEntry, MenuItem, OrderStore, StagedOrder, StoreError, StoredOrder};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Returned to non-staff sessions for staff-only requests
pub const ACCESS_DENIED: &str = "Access Denied: Staff Only Operation";

pub const ORDER_NOT_FOUND: &str = "Order not found";
pub const ITEM_NOT_FOUND: &str = "Menu item not found";

pub const INVALID_REQUEST: &str = "Invalid request";
pub const ITEMS_UNAVAILABLE: &str = "some items unavailable";
pub const NO_STAGED_ORDER: &str = "no order to complete";
pub const STORAGE_FAILURE: &str = "internal storage error";

/// Largest number of units (sum of quantities) accepted in one order.
/// Keeps the per-unit quote well under the default frame limit.
pub const MAX_ORDER_UNITS: usize = 200;

/// Outcome of a login-style request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

impl From<bool> for Status {
    fn from(ok: bool) -> Self {
        if ok {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// Response body, serialized to JSON exactly once per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Quote {
        total_price: f64,
        payment_link: String,
        order_details: Vec<LineEntry>,
    },
    Receipt {
        order_id: i64,
        total_price: f64,
        items_ordered: Vec<LineEntry>,
    },
    Status {
        status: Status,
    },
    MenuItemAdded {
        item_id: i64,
    },
    Orders(Vec<StoredOrder>),
    Menu(Vec<MenuItem>),
    /// Plain string body (access denied, not found)
    Message(String),
    Error {
        error: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Response::Message(message.into())
    }

    pub fn status(ok: bool) -> Self {
        Response::Status { status: ok.into() }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What the connection handler should do next
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reply(Response),
    Close,
}

/// Executes requests against a shared store
pub struct Dispatcher {
    store: Arc<dyn OrderStore>,
    payment_base_url: String,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn OrderStore>, payment_base_url: impl Into<String>) -> Self {
        Self {
            store,
            payment_base_url: payment_base_url.into(),
        }
    }

    /// Execute one request on behalf of `session`.
    pub fn dispatch(&self, request: Request, session: &mut Session) -> Outcome {
        let result = match request {
            Request::Disconnect => return Outcome::Close,
            Request::CreateOrder(lines) => self.create_order(&lines, session),
            Request::PaymentComplete => self.payment_complete(session),
            Request::Login { email, password } => self.login(email, password, session),
            Request::ViewPendingOrders => self.staff_only(session, |store| {
                Ok(Response::Orders(store.list_pending_orders()?))
            }),
            Request::CompleteOrder { order_id, status } => {
                self.staff_only(session, |store| complete_order(store, &order_id, &status))
            }
            Request::Register { email, password } => self.register(email, password),
            Request::DeleteAccount { email, password } => {
                self.delete_account(email, password, session)
            }
            Request::ViewCompletedOrders => self.staff_only(session, |store| {
                Ok(Response::Orders(store.list_completed_orders()?))
            }),
            Request::AddMenuItem {
                name,
                price,
                enabled,
            } => self.staff_only(session, |store| {
                add_menu_item(store, &name, &price, &enabled)
            }),
            Request::SetItemEnabled { item_id, enabled } => {
                self.staff_only(session, |store| set_item_enabled(store, &item_id, &enabled))
            }
            Request::Logout => {
                session.sign_out();
                Ok(Response::status(true))
            }
            Request::GetMenu => self.store.get_menu().map(Response::Menu),
            Request::Invalid => Ok(Response::error(INVALID_REQUEST)),
        };

        Outcome::Reply(result.unwrap_or_else(|e| {
            error!(error = %e, "Store operation failed");
            Response::error(STORAGE_FAILURE)
        }))
    }

    /// Run `operation` only for staff sessions.
    fn staff_only<F>(&self, session: &Session, operation: F) -> Result<Response, StoreError>
    where
        F: FnOnce(&dyn OrderStore) -> Result<Response, StoreError>,
    {
        if !session.has_staff_access() {
            debug!(user_id = ?session.user_id, "Denied staff-only request");
            return Ok(Response::message(ACCESS_DENIED));
        }
        operation(self.store.as_ref())
    }

    fn create_order(
        &self,
        lines: &[OrderLine],
        session: &mut Session,
    ) -> Result<Response, StoreError> {
        if lines.is_empty() {
            return Ok(Response::error("order contains no items"));
        }

        let mut wanted = Vec::with_capacity(lines.len());
        let mut units = 0usize;
        for line in lines {
            let (Some(item_id), Some(quantity)) = (line.item_id.as_i64(), line.quantity.as_u64())
            else {
                return Ok(Response::error(
                    "item_id must be an integer and quantity a non-negative integer",
                ));
            };
            let quantity = usize::try_from(quantity).unwrap_or(usize::MAX);
            units = units.saturating_add(quantity);
            if units > MAX_ORDER_UNITS {
                return Ok(Response::error(format!(
                    "order exceeds {MAX_ORDER_UNITS} units"
                )));
            }
            wanted.push((item_id, quantity));
        }

        let mut ids: Vec<i64> = wanted.iter().map(|&(item_id, _)| item_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let available: HashMap<i64, MenuItem> = self
            .store
            .lookup_enabled_items(&ids)?
            .into_iter()
            .map(|item| (item.item_id, item))
            .collect();

        let mut total_price = 0.0;
        let mut order_details = Vec::new();
        for (item_id, quantity) in wanted {
            let Some(item) = available.get(&item_id) else {
                debug!(item_id, "Ordered item is unknown or disabled");
                return Ok(Response::error(ITEMS_UNAVAILABLE));
            };
            total_price += item.item_price * quantity as f64;
            order_details.extend(std::iter::repeat(LineEntry::from(item)).take(quantity));
        }
        let total_price = round_cents(total_price);

        session.stage_order(StagedOrder {
            total_price,
            order_details: order_details.clone(),
        });

        Ok(Response::Quote {
            total_price,
            payment_link: format!("{}?amount={:.2}", self.payment_base_url, total_price),
            order_details,
        })
    }

    fn payment_complete(&self, session: &mut Session) -> Result<Response, StoreError> {
        let Some(order) = session.staged_order() else {
            return Ok(Response::error(NO_STAGED_ORDER));
        };
        let order_id = self.store.insert_pending_order(session.user_id, order)?;

        // Only drop the staged order once it is safely persisted.
        let Some(order) = session.take_staged_order() else {
            return Ok(Response::error(NO_STAGED_ORDER));
        };
        debug!(order_id, total_price = order.total_price, "Order placed");

        Ok(Response::Receipt {
            order_id,
            total_price: order.total_price,
            items_ordered: order.order_details,
        })
    }

    fn login(
        &self,
        email: Option<String>,
        password: Option<String>,
        session: &mut Session,
    ) -> Result<Response, StoreError> {
        let (Some(email), Some(password)) = (email, password) else {
            return Ok(Response::status(false));
        };
        match self.store.verify_credentials(&email, &password)? {
            Some(account) => {
                session.sign_in(account);
                Ok(Response::status(true))
            }
            None => Ok(Response::status(false)),
        }
    }

    fn register(
        &self,
        email: Option<String>,
        password: Option<String>,
    ) -> Result<Response, StoreError> {
        match (email, password) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Ok(Response::status(self.store.create_account(&email, &password, false)?))
            }
            _ => Ok(Response::status(false)),
        }
    }

    fn delete_account(
        &self,
        email: Option<String>,
        password: Option<String>,
        session: &mut Session,
    ) -> Result<Response, StoreError> {
        let (Some(email), Some(password)) = (email, password) else {
            return Ok(Response::status(false));
        };
        match self.store.delete_account(&email, &password)? {
            Some(account) => {
                if session.user_id == Some(account.user_id) {
                    session.sign_out();
                }
                Ok(Response::status(true))
            }
            None => Ok(Response::status(false)),
        }
    }
}

fn complete_order(
    store: &dyn OrderStore,
    order_id: &Value,
    status: &Value,
) -> Result<Response, StoreError> {
    let (Some(order_id), Some(record)) = (order_id.as_i64(), status.as_bool()) else {
        return Ok(Response::error("order_id must be an integer and status a boolean"));
    };
    if !store.move_to_completed(order_id, record)? {
        return Ok(Response::message(ORDER_NOT_FOUND));
    }
    Ok(Response::Orders(store.list_pending_orders()?))
}

fn add_menu_item(
    store: &dyn OrderStore,
    name: &Value,
    price: &Value,
    enabled: &Value,
) -> Result<Response, StoreError> {
    let name = match name.as_str().map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return Ok(Response::error("item name must be a non-empty string")),
    };
    let price = match price.as_f64() {
        Some(price) if price.is_finite() && price >= 0.0 => price,
        _ => return Ok(Response::error("item price must be a non-negative number")),
    };
    let enabled = match enabled {
        Value::Null => true,
        Value::Bool(enabled) => *enabled,
        _ => return Ok(Response::error("enabled must be a boolean")),
    };
    let item_id = store.add_menu_item(name, price, enabled)?;
    Ok(Response::MenuItemAdded { item_id })
}

fn set_item_enabled(
    store: &dyn OrderStore,
    item_id: &Value,
    enabled: &Value,
) -> Result<Response, StoreError> {
    let (Some(item_id), Some(enabled)) = (item_id.as_i64(), enabled.as_bool()) else {
        return Ok(Response::error("item_id must be an integer and enabled a boolean"));
    };
    if !store.set_menu_item_enabled(item_id, enabled)? {
        return Ok(Response::message(ITEM_NOT_FOUND));
    }
    Ok(Response::Menu(store.get_menu()?))
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
