//! Wire types for the portal's mobile endpoints.
//!
//! The backend is loose about types: ids and amounts arrive as numbers or
//! strings depending on the endpoint, and lists are sometimes `null`.
//! Everything numeric-looking is kept as a string on our side.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Accept a string, number or null and keep it as an optional string
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Treat `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Standard `{status, message, data}` response wrapper
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("success"))
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
    pub device_name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub client: Option<Client>,
}

/// Client profile as returned by login and /mobile/client
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Client {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ClientData {
    pub client: Client,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct InvoiceSummary {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub total: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub duedate: Option<String>,
    #[serde(default)]
    pub paymentmethod: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub invoices: Vec<InvoiceSummary>,
}

/// One gateway entry under `payment_info.available_payment_methods`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AvailableMethod {
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub va_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PaymentInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub va_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub virtual_account_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub account_number: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub available_payment_methods: Vec<AvailableMethod>,
}

/// Payload of GET /mobile/invoices/{id}
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct InvoiceDetails {
    #[serde(default)]
    pub invoice: Option<InvoiceSummary>,
    #[serde(default)]
    pub payment_info: Option<PaymentInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ClientDirectory {
    pub clients: Vec<Client>,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordRequest<'a> {
    pub email: &'a str,
    pub token: &'a str,
    pub password: &'a str,
    pub password_confirmation: &'a str,
}

/// Payload of GET /mobile/billing/period; any field may be missing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillingPeriodData {
    #[serde(default, rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(default, rename = "dueDate")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub amount: Option<String>,
}
