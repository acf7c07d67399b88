//! Portal backend API.

mod http;
pub mod types;

pub use http::HttpPortal;

use crate::error::{PortalError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use types::{BillingPeriodData, Client, InvoiceDetails, InvoiceSummary, LoginData};

pub const DEFAULT_BASE_URL: &str = "https://portal.relabs.id";

const DEFAULT_BILLING_AMOUNT: &str = "234765";
const DEFAULT_BILLING_WINDOW_DAYS: i64 = 14;
const MIN_PASSWORD_LEN: usize = 6;

/// Current billing period. Missing parts are estimated: today, two weeks
/// out, and the standard plan amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingPeriod {
    pub start_date: String,
    pub due_date: String,
    pub amount: String,
    pub estimated: bool,
}

impl BillingPeriod {
    pub fn fallback(now: DateTime<Utc>) -> Self {
        Self::from_data(BillingPeriodData::default(), now)
    }

    pub fn from_data(data: BillingPeriodData, now: DateTime<Utc>) -> Self {
        let day = |at: DateTime<Utc>| at.format("%Y-%m-%d").to_string();
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let start_date = present(data.start_date);
        let due_date = present(data.due_date);
        let amount = present(data.amount);
        let estimated = start_date.is_none() || due_date.is_none() || amount.is_none();

        Self {
            start_date: start_date.unwrap_or_else(|| day(now)),
            due_date: due_date
                .unwrap_or_else(|| day(now + Duration::days(DEFAULT_BILLING_WINDOW_DAYS))),
            amount: amount.unwrap_or_else(|| DEFAULT_BILLING_AMOUNT.to_string()),
            estimated,
        }
    }
}

/// New password submission, checked locally before it is sent
#[derive(Debug, Clone, Copy)]
pub struct PasswordReset<'a> {
    pub email: &'a str,
    pub token: &'a str,
    pub password: &'a str,
    pub confirmation: &'a str,
}

impl PasswordReset<'_> {
    pub fn validate(&self) -> Result<()> {
        let fields = [self.email, self.token, self.password, self.confirmation];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(PortalError::InvalidInput(
                "All fields are required".to_string(),
            ));
        }
        if self.password != self.confirmation {
            return Err(PortalError::InvalidInput(
                "Password and confirmation do not match".to_string(),
            ));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(PortalError::InvalidInput(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

/// Trait for portal backends to allow mocking and abstraction
pub trait PortalApi {
    fn base_url(&self) -> &str;

    fn login(&self, identifier: &str, password: &str) -> Result<LoginData>;

    fn client_profile(&self) -> Result<Client>;

    fn invoices(&self) -> Result<Vec<InvoiceSummary>>;

    fn invoice(&self, invoice_id: &str) -> Result<InvoiceDetails>;

    /// Raw acknowledgement from /billinginfo/updatepayment
    fn update_payment_method(&self, invoice_id: &str, method_code: &str) -> Result<Value>;

    /// Raw reply from /{gateway}/payNow
    fn pay_now(&self, gateway: &str, invoice_id: &str) -> Result<Value>;

    /// Client directory from /mobile/all-clients (no session needed)
    fn all_clients(&self) -> Result<Vec<Client>>;

    /// Invoices with their hosting and product lines, as sent
    fn detailed_invoices(&self) -> Result<Value>;

    /// Current period; estimated when the backend has nothing usable
    fn billing_period(&self) -> Result<BillingPeriod>;

    /// Ask for a reset code by email. Returns the confirmation message.
    fn forgot_password(&self, email: &str) -> Result<String>;

    fn reset_password(&self, reset: &PasswordReset<'_>) -> Result<String>;
}

impl<T: PortalApi + ?Sized> PortalApi for &T {
    fn base_url(&self) -> &str {
        (**self).base_url()
    }

    fn login(&self, identifier: &str, password: &str) -> Result<LoginData> {
        (**self).login(identifier, password)
    }

    fn client_profile(&self) -> Result<Client> {
        (**self).client_profile()
    }

    fn invoices(&self) -> Result<Vec<InvoiceSummary>> {
        (**self).invoices()
    }

    fn invoice(&self, invoice_id: &str) -> Result<InvoiceDetails> {
        (**self).invoice(invoice_id)
    }

    fn update_payment_method(&self, invoice_id: &str, method_code: &str) -> Result<Value> {
        (**self).update_payment_method(invoice_id, method_code)
    }

    fn pay_now(&self, gateway: &str, invoice_id: &str) -> Result<Value> {
        (**self).pay_now(gateway, invoice_id)
    }

    fn all_clients(&self) -> Result<Vec<Client>> {
        (**self).all_clients()
    }

    fn detailed_invoices(&self) -> Result<Value> {
        (**self).detailed_invoices()
    }

    fn billing_period(&self) -> Result<BillingPeriod> {
        (**self).billing_period()
    }

    fn forgot_password(&self, email: &str) -> Result<String> {
        (**self).forgot_password(email)
    }

    fn reset_password(&self, reset: &PasswordReset<'_>) -> Result<String> {
        (**self).reset_password(reset)
    }
}

/// Portal page that takes payment for any bound method
pub fn hosted_invoice_url(base_url: &str, invoice_id: &str) -> String {
    format!(
        "{}/billinginfo/viewinvoice/web/{}",
        base_url.trim_end_matches('/'),
        invoice_id
    )
}

/// Invoice page for gateways we don't recognise
pub fn direct_invoice_url(base_url: &str, invoice_id: &str) -> String {
    format!(
        "{}/billing/invoices/view/{}",
        base_url.trim_end_matches('/'),
        invoice_id
    )
}
