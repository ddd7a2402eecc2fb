//! Request classification.
//!
//! A payload is decoded as JSON and run through an ordered list of shape
//! rules; the first rule that matches decides the request. Payloads that are
//! not JSON, or match no rule, are compared verbatim against the two plain
//! text commands.
//!
//! Rule order matters: shapes overlap (a mapping can carry both
//! `payment_complete` and `action`), so earlier rules win.

use serde::Serialize;
use serde_json::{Map, Value};

/// Plain text command requesting the menu.
pub const GET_MENU: &str = "Get Menu";

/// Plain text command ending the connection.
pub const DISCONNECT: &str = "!DISCONNECT";

/// One requested menu line, as sent by the client.
///
/// Values are kept as raw JSON; type checks happen at dispatch so that a
/// malformed line still classifies as an order and gets a proper error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLine {
    pub item_id: Value,
    #[serde(rename = "item_quantity")]
    pub quantity: Value,
}

impl OrderLine {
    pub fn new(item_id: i64, quantity: i64) -> Self {
        Self {
            item_id: Value::from(item_id),
            quantity: Value::from(quantity),
        }
    }
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Price and stage an order.
    CreateOrder(Vec<OrderLine>),
    /// Confirm payment for the staged order.
    PaymentComplete,
    Login {
        email: Option<String>,
        password: Option<String>,
    },
    ViewPendingOrders,
    /// Close a pending order; `status == true` records it as completed.
    CompleteOrder { order_id: Value, status: Value },
    Register {
        email: Option<String>,
        password: Option<String>,
    },
    DeleteAccount {
        email: Option<String>,
        password: Option<String>,
    },
    ViewCompletedOrders,
    AddMenuItem {
        name: Value,
        price: Value,
        enabled: Value,
    },
    SetItemEnabled { item_id: Value, enabled: Value },
    Logout,
    GetMenu,
    Disconnect,
    Invalid,
}

impl Request {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::CreateOrder(_) => "create_order",
            Request::PaymentComplete => "payment_complete",
            Request::Login { .. } => "login",
            Request::ViewPendingOrders => "view_pending_orders",
            Request::CompleteOrder { .. } => "complete_order",
            Request::Register { .. } => "register",
            Request::DeleteAccount { .. } => "delete_account",
            Request::ViewCompletedOrders => "view_completed_orders",
            Request::AddMenuItem { .. } => "add_menu_item",
            Request::SetItemEnabled { .. } => "set_item_enabled",
            Request::Logout => "logout",
            Request::GetMenu => "get_menu",
            Request::Disconnect => "disconnect",
            Request::Invalid => "invalid",
        }
    }
}

type Rule = fn(&Value) -> Option<Request>;

/// Shape rules in evaluation order.
const RULES: &[Rule] = &[
    create_order,
    payment_complete,
    login,
    view_pending_orders,
    complete_order,
    register,
    delete_account,
    view_completed_orders,
    add_menu_item,
    set_item_enabled,
    logout,
];

/// Classify a raw payload.
pub fn classify(raw: &str) -> Request {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if let Some(request) = RULES.iter().find_map(|rule| rule(&value)) {
            return request;
        }
    }

    match raw {
        GET_MENU => Request::GetMenu,
        DISCONNECT => Request::Disconnect,
        _ => Request::Invalid,
    }
}

/// A list whose every element is a two-key mapping with one `*_id` and one
/// `*_quantity` key.
fn create_order(value: &Value) -> Option<Request> {
    let lines = value
        .as_array()?
        .iter()
        .map(order_line)
        .collect::<Option<Vec<_>>>()?;
    Some(Request::CreateOrder(lines))
}

fn order_line(value: &Value) -> Option<OrderLine> {
    let fields = value.as_object()?;
    if fields.len() != 2 {
        return None;
    }
    let (_, item_id) = fields.iter().find(|(key, _)| key.ends_with("_id"))?;
    let (_, quantity) = fields.iter().find(|(key, _)| key.ends_with("_quantity"))?;
    Some(OrderLine {
        item_id: item_id.clone(),
        quantity: quantity.clone(),
    })
}

fn payment_complete(value: &Value) -> Option<Request> {
    let fields = value.as_object()?;
    (fields.get("payment_complete") == Some(&Value::Bool(true))).then_some(Request::PaymentComplete)
}

fn login(value: &Value) -> Option<Request> {
    let fields = action(value, "login")?;
    Some(Request::Login {
        email: string_field(fields, "email"),
        password: string_field(fields, "password"),
    })
}

fn view_pending_orders(value: &Value) -> Option<Request> {
    action(value, "view_pending_orders").map(|_| Request::ViewPendingOrders)
}

fn complete_order(value: &Value) -> Option<Request> {
    let fields = value.as_object()?;
    let order_id = fields.get("order_id")?;
    let status = fields.get("status")?;
    Some(Request::CompleteOrder {
        order_id: order_id.clone(),
        status: status.clone(),
    })
}

fn register(value: &Value) -> Option<Request> {
    let fields = action(value, "register")?;
    Some(Request::Register {
        email: string_field(fields, "email"),
        password: string_field(fields, "password"),
    })
}

fn delete_account(value: &Value) -> Option<Request> {
    let fields = action(value, "delete_account")?;
    Some(Request::DeleteAccount {
        email: string_field(fields, "email"),
        password: string_field(fields, "password"),
    })
}

fn view_completed_orders(value: &Value) -> Option<Request> {
    action(value, "view_completed_orders").map(|_| Request::ViewCompletedOrders)
}

fn add_menu_item(value: &Value) -> Option<Request> {
    let fields = action(value, "add_menu_item")?;
    Some(Request::AddMenuItem {
        name: raw_field(fields, "name"),
        price: raw_field(fields, "price"),
        enabled: raw_field(fields, "enabled"),
    })
}

fn set_item_enabled(value: &Value) -> Option<Request> {
    let fields = action(value, "set_item_enabled")?;
    Some(Request::SetItemEnabled {
        item_id: raw_field(fields, "item_id"),
        enabled: raw_field(fields, "enabled"),
    })
}

fn logout(value: &Value) -> Option<Request> {
    action(value, "logout").map(|_| Request::Logout)
}

/// The mapping, if its `action` field equals `name`.
fn action<'a>(value: &'a Value, name: &str) -> Option<&'a Map<String, Value>> {
    let fields = value.as_object()?;
    (fields.get("action")?.as_str()? == name).then_some(fields)
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key)?.as_str().map(str::to_string)
}

fn raw_field(fields: &Map<String, Value>, key: &str) -> Value {
    fields.get(key).cloned().unwrap_or(Value::Null)
}
