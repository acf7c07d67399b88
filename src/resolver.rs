//! Payment method resolution.
//!
//! Turns a gateway display name into a bound payment method for an invoice
//! and, for bank virtual accounts, waits for the backend to issue the VA
//! number. Progress is written into a [`PaymentBinding`] behind a
//! [`BindingHandle`]; once the handle is cancelled nothing else is written.
//!
//! One resolution per invoice at a time: starting a second one for the same
//! invoice while the first is still running is the caller's bug.

use crate::api::types::InvoiceDetails;
use crate::api::{direct_invoice_url, hosted_invoice_url, PortalApi};
use crate::error::{PortalError, Result};
use crate::gateway::{self, ack_succeeded, Handler, MethodCode};
use crate::retry::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    Pending,
    Bound,
    VaReady,
    VaPending,
    Redirect,
    Failed,
}

/// State of one payment attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentBinding {
    pub invoice_id: String,
    pub gateway_display_name: String,
    pub resolved_method_code: Option<MethodCode>,
    pub virtual_account_number: Option<String>,
    pub status: BindingStatus,
    pub fetch_attempts: u32,
}

impl PaymentBinding {
    pub fn new(invoice_id: &str, gateway_display_name: &str) -> Self {
        Self {
            invoice_id: invoice_id.to_string(),
            gateway_display_name: gateway_display_name.to_string(),
            resolved_method_code: None,
            virtual_account_number: None,
            status: BindingStatus::Pending,
            fetch_attempts: 0,
        }
    }
}

/// Shared view of a binding, owned by whoever displays it.
/// Cancelling the handle makes every later write a no-op.
#[derive(Debug, Clone)]
pub struct BindingHandle {
    state: Arc<Mutex<PaymentBinding>>,
    cancel: CancelToken,
}

impl BindingHandle {
    pub fn new(binding: PaymentBinding) -> Self {
        Self {
            state: Arc::new(Mutex::new(binding)),
            cancel: CancelToken::new(),
        }
    }

    pub fn snapshot(&self) -> PaymentBinding {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Tear down. Waits out a write in progress, so once this returns the
    /// binding no longer changes.
    pub fn cancel(&self) {
        let _state = self.state.lock();
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Cancel from a watchdog thread once `limit` passes. Cancelling the
    /// returned token disarms the watchdog.
    pub fn cancel_after(&self, limit: Duration) -> CancelToken {
        let disarm = CancelToken::new();
        let watch = disarm.clone();
        let handle = self.clone();
        std::thread::spawn(move || {
            if !watch.wait_timeout(limit) {
                tracing::info!(?limit, "payment deadline reached");
                handle.cancel();
            }
        });
        disarm
    }

    /// Apply `f` unless cancelled. Returns whether it was applied.
    fn update(&self, f: impl FnOnce(&mut PaymentBinding)) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if self.cancel.is_cancelled() {
            return false;
        }
        f(&mut state);
        true
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// VA issued; the user transfers to `number`
    VirtualAccount { code: MethodCode, number: String },
    /// Bound, but the VA did not show up within the retry budget
    VaPending { code: MethodCode, retries: u32 },
    /// Pay on an external page. `url` is absent when none could be obtained.
    Redirect {
        code: Option<MethodCode>,
        url: Option<String>,
        message: Option<String>,
    },
    Cancelled,
}

/// Find the VA number for `code` in an invoice's payment info.
///
/// A matching `available_payment_methods` entry wins; otherwise the first
/// non-empty of `va_number`, `virtual_account_number`, `account_number`.
pub fn find_va_number(details: &InvoiceDetails, code: MethodCode) -> Option<String> {
    let info = details.payment_info.as_ref()?;

    if let Some(keyword) = code.va_lookup_keyword() {
        let listed = info.available_payment_methods.iter().find(|method| {
            method
                .gateway
                .as_deref()
                .is_some_and(|g| g.to_lowercase().contains(keyword))
        });
        let number = listed
            .and_then(|m| m.va_number.clone())
            .filter(|n| !n.trim().is_empty());
        if let Some(number) = number {
            return Some(number);
        }
    }

    [
        &info.va_number,
        &info.virtual_account_number,
        &info.account_number,
    ]
    .into_iter()
    .flatten()
    .find(|n| !n.trim().is_empty())
    .cloned()
}

pub struct PaymentMethodResolver<A, S = ThreadSleeper> {
    api: A,
    sleeper: S,
    policy: RetryPolicy,
}

impl<A: PortalApi, S: Sleeper> PaymentMethodResolver<A, S> {
    pub fn new(api: A, sleeper: S, policy: RetryPolicy) -> Self {
        Self {
            api,
            sleeper,
            policy,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Ask the backend to use `code` for the invoice and check its answer
    pub fn bind_method(&self, invoice_id: &str, code: MethodCode) -> Result<Value> {
        let ack = self.api.update_payment_method(invoice_id, code.as_str())?;
        if ack_succeeded(&ack, code) {
            tracing::debug!(invoice_id, %code, "payment method bound");
            Ok(ack)
        } else {
            tracing::warn!(invoice_id, %code, ack = %ack, "unexpected method binding reply");
            Err(PortalError::BindingFailed {
                code: code.as_str().to_string(),
            })
        }
    }

    /// Resolve the binding's gateway into something the user can pay with
    pub fn resolve(&self, binding: &BindingHandle) -> Result<Resolution> {
        let request = binding.snapshot();
        let invoice_id = request.invoice_id.trim();
        if invoice_id.is_empty() {
            binding.update(|b| b.status = BindingStatus::Failed);
            return Err(PortalError::InvoiceNotFound);
        }
        if binding.is_cancelled() {
            return Ok(Resolution::Cancelled);
        }

        let Some(code) = gateway::classify(&request.gateway_display_name) else {
            tracing::info!(
                invoice_id,
                gateway = %request.gateway_display_name,
                "unrecognised gateway, sending to invoice page"
            );
            let url = direct_invoice_url(self.api.base_url(), invoice_id);
            if !binding.update(|b| b.status = BindingStatus::Redirect) {
                return Ok(Resolution::Cancelled);
            }
            return Ok(Resolution::Redirect {
                code: None,
                url: Some(url),
                message: None,
            });
        };

        if !binding.update(|b| b.resolved_method_code = Some(code)) {
            return Ok(Resolution::Cancelled);
        }

        if let Err(err) = self.bind_method(invoice_id, code) {
            if binding.is_cancelled() {
                return Ok(Resolution::Cancelled);
            }
            binding.update(|b| b.status = BindingStatus::Failed);
            return Err(err);
        }
        if !binding.update(|b| b.status = BindingStatus::Bound) {
            return Ok(Resolution::Cancelled);
        }

        match code.handler() {
            Handler::VirtualAccount => self.await_virtual_account(invoice_id, code, binding),
            Handler::HostedInvoice => {
                let url = hosted_invoice_url(self.api.base_url(), invoice_id);
                Ok(self.redirect(binding, code, Some(url), None))
            }
            Handler::PayNowEndpoint => self.request_pay_now(invoice_id, code, binding),
        }
    }

    fn redirect(
        &self,
        binding: &BindingHandle,
        code: MethodCode,
        url: Option<String>,
        message: Option<String>,
    ) -> Resolution {
        if !binding.update(|b| b.status = BindingStatus::Redirect) {
            return Resolution::Cancelled;
        }
        Resolution::Redirect {
            code: Some(code),
            url,
            message,
        }
    }

    fn request_pay_now(
        &self,
        invoice_id: &str,
        code: MethodCode,
        binding: &BindingHandle,
    ) -> Result<Resolution> {
        let gateway = code.pay_now_gateway().unwrap_or(code.as_str());
        let reply = match self.api.pay_now(gateway, invoice_id) {
            Ok(reply) => reply,
            Err(err) if err.is_auth() => return Err(err),
            Err(err) => {
                tracing::warn!(invoice_id, %code, error = %err, "payNow request failed");
                return Ok(self.redirect(binding, code, None, Some(err.to_string())));
            }
        };

        let succeeded = reply
            .get("result")
            .and_then(Value::as_str)
            .is_some_and(|r| r.eq_ignore_ascii_case("success"));
        let url = reply
            .get("redirect_url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty());

        match url {
            Some(url) if succeeded => Ok(self.redirect(binding, code, Some(url.to_string()), None)),
            _ => {
                let message = reply
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Failed to get a payment link")
                    .to_string();
                Ok(self.redirect(binding, code, None, Some(message)))
            }
        }
    }

    /// Fetch the invoice once and look for the VA. Fetch errors only cost the attempt.
    fn poll_once(
        &self,
        invoice_id: &str,
        code: MethodCode,
        binding: &BindingHandle,
    ) -> Option<String> {
        if !binding.update(|b| b.fetch_attempts += 1) {
            return None;
        }
        match self.api.invoice(invoice_id) {
            Ok(details) => find_va_number(&details, code),
            Err(err) => {
                tracing::warn!(invoice_id, error = %err, "invoice fetch failed");
                None
            }
        }
    }

    fn va_ready(&self, binding: &BindingHandle, code: MethodCode, number: String) -> Resolution {
        let stored = binding.update(|b| {
            b.virtual_account_number = Some(number.clone());
            b.status = BindingStatus::VaReady;
        });
        if !stored {
            return Resolution::Cancelled;
        }
        tracing::info!(%code, "virtual account issued");
        Resolution::VirtualAccount { code, number }
    }

    fn await_virtual_account(
        &self,
        invoice_id: &str,
        code: MethodCode,
        binding: &BindingHandle,
    ) -> Result<Resolution> {
        if let Some(number) = self.poll_once(invoice_id, code, binding) {
            return Ok(self.va_ready(binding, code, number));
        }

        for attempt in 1..=self.policy.max_retries {
            if binding.is_cancelled() {
                return Ok(Resolution::Cancelled);
            }

            if let Err(err) = self.bind_method(invoice_id, code) {
                if err.is_auth() {
                    return Err(err);
                }
                tracing::warn!(invoice_id, attempt, error = %err, "re-bind failed");
            }

            if !self.sleeper.pause(self.policy.delay, binding.cancel_token()) {
                return Ok(Resolution::Cancelled);
            }

            tracing::debug!(invoice_id, attempt, "polling for virtual account");
            if let Some(number) = self.poll_once(invoice_id, code, binding) {
                return Ok(self.va_ready(binding, code, number));
            }
        }

        if binding.is_cancelled()
            || !binding.update(|b| b.status = BindingStatus::VaPending)
        {
            return Ok(Resolution::Cancelled);
        }
        tracing::info!(invoice_id, %code, retries = self.policy.max_retries, "virtual account not yet available");
        Ok(Resolution::VaPending {
            code,
            retries: self.policy.max_retries,
        })
    }
}
