use super::types::{
    BillingPeriodData, Client, ClientData, ClientDirectory, Envelope, ForgotPasswordRequest,
    InvoiceDetails, InvoiceList, InvoiceSummary, LoginData, LoginRequest, ResetPasswordRequest,
};
use super::{BillingPeriod, PasswordReset, PortalApi};
use crate::error::{PortalError, Result};
use crate::session::SessionStore;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Portal client over HTTPS. Authenticated calls check the session locally
/// before anything goes on the wire.
pub struct HttpPortal {
    base_url: String,
    device_name: String,
    agent: ureq::Agent,
    session: Arc<SessionStore>,
}

impl HttpPortal {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        device_name: &str,
        session: Arc<SessionStore>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            device_name: device_name.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            session,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str, authed: bool) -> Result<Value> {
        let token = if authed {
            Some(self.session.require_valid()?)
        } else {
            None
        };
        let url = self.url(path);
        tracing::debug!(%url, authed, "GET");

        let mut req = self.agent.get(&url).set("Accept", "application/json");
        if let Some(token) = token {
            req = req.set("Authorization", &format!("Bearer {}", token));
        }
        read_reply(req.call(), authed)
    }

    fn post(&self, path: &str, body: Value, authed: bool) -> Result<Value> {
        let token = if authed {
            Some(self.session.require_valid()?)
        } else {
            None
        };
        let url = self.url(path);
        tracing::debug!(%url, authed, "POST");

        let mut req = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        if let Some(token) = token {
            req = req.set("Authorization", &format!("Bearer {}", token));
        }
        read_reply(req.send_json(body), authed)
    }
}

/// JSON when it parses, otherwise the trimmed text as a JSON string.
/// The method-update endpoint sometimes answers with a bare code.
fn parse_body(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn status_error(code: u16, body: &str, authed: bool) -> PortalError {
    if code == 401 && authed {
        return PortalError::SessionExpired;
    }
    let parsed = parse_body(body);
    let message = parsed.get("message").and_then(Value::as_str);
    PortalError::backend(
        Some(code),
        message,
        &format!("Request failed with status {}", code),
    )
}

fn read_reply(resp: std::result::Result<ureq::Response, ureq::Error>, authed: bool) -> Result<Value> {
    match resp {
        Ok(r) => {
            let text = r
                .into_string()
                .map_err(|e| PortalError::Transport(e.to_string()))?;
            Ok(parse_body(&text))
        }
        Err(ureq::Error::Status(code, r)) => {
            let body = r.into_string().unwrap_or_default();
            tracing::warn!(status = code, "portal returned an error status");
            Err(status_error(code, &body, authed))
        }
        Err(e) => {
            tracing::warn!(error = %e, "portal request failed");
            Err(PortalError::Transport(e.to_string()))
        }
    }
}

/// Pull `data` out of a response envelope
fn unwrap_data<T: DeserializeOwned>(value: Value, default_message: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_value(value)?;
    match envelope.data {
        Some(data) => Ok(data),
        None => Err(PortalError::backend(
            None,
            envelope.message.as_deref(),
            default_message,
        )),
    }
}

fn login_data(value: Value) -> Result<LoginData> {
    let envelope: Envelope<LoginData> = serde_json::from_value(value)?;
    match envelope.data {
        Some(data) if envelope.is_success() && !data.token.is_empty() => Ok(data),
        _ => Err(PortalError::backend(
            None,
            envelope.message.as_deref(),
            "Login failed",
        )),
    }
}

fn message_of(value: &Value) -> Option<&str> {
    value.get("message").and_then(Value::as_str)
}

fn forgot_password_reply(reply: Result<Value>) -> Result<String> {
    let value = match reply {
        Err(PortalError::Backend {
            status: Some(404), ..
        }) => return Err(PortalError::backend(Some(404), None, "Email not found")),
        other => other?,
    };
    if value.get("success").and_then(Value::as_bool) == Some(true) {
        Ok(message_of(&value)
            .unwrap_or("Verification code sent to your email")
            .to_string())
    } else {
        Err(PortalError::backend(
            None,
            message_of(&value),
            "Failed to send verification code",
        ))
    }
}

fn reset_password_reply(value: Value) -> Result<String> {
    let succeeded = value
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("success"));
    if succeeded {
        Ok(message_of(&value)
            .unwrap_or("Password has been reset")
            .to_string())
    } else {
        Err(PortalError::backend(
            None,
            message_of(&value),
            "Failed to reset password",
        ))
    }
}

fn billing_period_from(value: Value, now: DateTime<Utc>) -> BillingPeriod {
    match serde_json::from_value::<Envelope<BillingPeriodData>>(value) {
        Ok(envelope) if envelope.is_success() => match envelope.data {
            Some(data) => BillingPeriod::from_data(data, now),
            None => BillingPeriod::fallback(now),
        },
        _ => BillingPeriod::fallback(now),
    }
}

impl PortalApi for HttpPortal {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn login(&self, identifier: &str, password: &str) -> Result<LoginData> {
        let request = LoginRequest {
            identifier,
            password,
            device_name: &self.device_name,
        };
        let reply = self.post("/mobile/login", serde_json::to_value(&request)?, false)?;
        login_data(reply)
    }

    fn client_profile(&self) -> Result<Client> {
        let reply = self.get("/mobile/client", true)?;
        let data: ClientData = unwrap_data(reply, "Failed to load profile")?;
        Ok(data.client)
    }

    fn invoices(&self) -> Result<Vec<InvoiceSummary>> {
        let reply = self.get("/mobile/invoices", true)?;
        let data: InvoiceList = unwrap_data(reply, "Failed to load invoices")?;
        Ok(data.invoices)
    }

    fn invoice(&self, invoice_id: &str) -> Result<InvoiceDetails> {
        let reply = self.get(&format!("/mobile/invoices/{}", invoice_id), true)?;
        unwrap_data(reply, "Failed to load invoice details")
    }

    fn update_payment_method(&self, invoice_id: &str, method_code: &str) -> Result<Value> {
        self.post(
            "/billinginfo/updatepayment",
            json!({ "id": invoice_id, "paymentmethod": method_code }),
            true,
        )
    }

    fn pay_now(&self, gateway: &str, invoice_id: &str) -> Result<Value> {
        self.post(
            &format!("/{}/payNow", gateway),
            json!({ "invoiceid": invoice_id }),
            true,
        )
    }

    fn all_clients(&self) -> Result<Vec<Client>> {
        let reply = self.get("/mobile/all-clients", false)?;
        let data: ClientDirectory = unwrap_data(reply, "Failed to load clients")?;
        Ok(data.clients)
    }

    fn detailed_invoices(&self) -> Result<Value> {
        let reply = self.get("/mobile/invoice-details", true)?;
        unwrap_data(reply, "Failed to load invoice details")
    }

    fn billing_period(&self) -> Result<BillingPeriod> {
        let now = Utc::now();
        match self.get("/mobile/billing/period", true) {
            Ok(reply) => Ok(billing_period_from(reply, now)),
            Err(err) if err.is_auth() => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "billing period unavailable, using estimate");
                Ok(BillingPeriod::fallback(now))
            }
        }
    }

    fn forgot_password(&self, email: &str) -> Result<String> {
        let email = email.trim();
        if email.is_empty() {
            return Err(PortalError::InvalidInput(
                "Enter a valid email".to_string(),
            ));
        }
        let body = serde_json::to_value(ForgotPasswordRequest { email })?;
        forgot_password_reply(self.post("/mobile/forgot-password", body, false))
    }

    fn reset_password(&self, reset: &PasswordReset<'_>) -> Result<String> {
        reset.validate()?;
        let body = serde_json::to_value(ResetPasswordRequest {
            email: reset.email.trim(),
            token: reset.token.trim(),
            password: reset.password,
            password_confirmation: reset.confirmation,
        })?;
        reset_password_reply(self.post("/mobile/reset-password", body, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn portal() -> HttpPortal {
        let session = SessionStore::with_system_clock(Arc::new(MemoryStore::new()));
        // Port 9 (discard) is never contacted by these tests
        HttpPortal::new(
            "http://127.0.0.1:9/",
            Duration::from_millis(200),
            "mobile_app",
            Arc::new(session),
        )
    }

    #[test]
    fn test_parse_body_shapes() {
        assert_eq!(parse_body("  bcavaxendit\n"), json!("bcavaxendit"));
        assert_eq!(parse_body(r#"{"result":"success"}"#), json!({"result": "success"}));
        assert_eq!(parse_body(r#""DANA""#), json!("DANA"));
        assert_eq!(parse_body(""), Value::Null);
    }

    #[test]
    fn test_status_errors() {
        assert!(matches!(
            status_error(401, "", true),
            PortalError::SessionExpired
        ));

        // A 401 from login is a credentials problem, not an expired session
        let err = status_error(401, r#"{"message":"Password salah"}"#, false);
        assert!(matches!(err, PortalError::Backend { status: Some(401), .. }));
        assert_eq!(err.to_string(), "Password salah");

        let err = status_error(500, "<html>oops</html>", true);
        assert_eq!(err.to_string(), "Request failed with status 500");
    }

    #[test]
    fn test_unwrap_data() {
        let profile: ClientData =
            unwrap_data(json!({"data": {"client": {"id": 3}}}), "fallback").unwrap();
        assert_eq!(profile.client.id.as_deref(), Some("3"));

        let err = unwrap_data::<ClientData>(json!({"message": "Token invalid"}), "fallback")
            .unwrap_err();
        assert_eq!(err.to_string(), "Token invalid");

        let err = unwrap_data::<ClientData>(json!("not an envelope"), "fallback").unwrap_err();
        assert!(matches!(err, PortalError::Decode(_)));
    }

    #[test]
    fn test_login_data() {
        let ok = login_data(json!({
            "status": "success",
            "data": {"token": "tok", "expires_at": "2125-01-01T00:00:00+07:00"}
        }))
        .unwrap();
        assert_eq!(ok.token, "tok");

        let err = login_data(json!({"status": "error", "message": "Email tidak ditemukan"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Email tidak ditemukan");

        let err = login_data(json!({"status": "success", "data": {"token": ""}})).unwrap_err();
        assert_eq!(err.to_string(), "Login failed");
    }

    #[test]
    fn test_authenticated_calls_need_a_session() {
        let portal = portal();
        assert_eq!(portal.base_url(), "http://127.0.0.1:9");
        assert!(matches!(
            portal.invoice("1042"),
            Err(PortalError::NotAuthenticated)
        ));
        assert!(matches!(
            portal.update_payment_method("1042", "bcavaxendit"),
            Err(PortalError::NotAuthenticated)
        ));

        portal.session().set_token("tok", None).unwrap();
        assert!(matches!(
            portal.invoices(),
            Err(PortalError::SessionExpired)
        ));
    }

    #[test]
    fn test_forgot_password_replies() {
        let sent = forgot_password_reply(Ok(json!({
            "success": true,
            "message": "Kode verifikasi telah dikirim"
        })))
        .unwrap();
        assert_eq!(sent, "Kode verifikasi telah dikirim");

        let sent = forgot_password_reply(Ok(json!({"success": true}))).unwrap();
        assert_eq!(sent, "Verification code sent to your email");

        let err = forgot_password_reply(Ok(json!({"success": false, "message": "Terlalu sering"})))
            .unwrap_err();
        assert_eq!(err.to_string(), "Terlalu sering");

        let err = forgot_password_reply(Ok(json!({"success": "yes"}))).unwrap_err();
        assert_eq!(err.to_string(), "Failed to send verification code");
    }

    #[test]
    fn test_forgot_password_unknown_email() {
        let not_found = status_error(404, r#"{"message":"Not Found"}"#, false);
        let err = forgot_password_reply(Err(not_found)).unwrap_err();
        assert!(matches!(err, PortalError::Backend { status: Some(404), .. }));
        assert_eq!(err.to_string(), "Email not found");

        // Other failures keep the backend's own message
        let err = forgot_password_reply(Err(status_error(
            422,
            r#"{"message":"Format email salah"}"#,
            false,
        )))
        .unwrap_err();
        assert_eq!(err.to_string(), "Format email salah");
    }

    #[test]
    fn test_reset_password_replies() {
        let done = reset_password_reply(json!({
            "status": "success",
            "message": "Password berhasil diubah"
        }))
        .unwrap();
        assert_eq!(done, "Password berhasil diubah");

        let err = reset_password_reply(json!({"status": "error", "message": "Token kedaluwarsa"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Token kedaluwarsa");

        let err = reset_password_reply(json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Failed to reset password");
    }

    #[test]
    fn test_billing_period_envelopes() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let period = billing_period_from(
            json!({
                "status": "success",
                "data": {"startDate": "2026-02-25", "dueDate": "2026-03-10", "amount": "199000"}
            }),
            now,
        );
        assert_eq!(period.due_date, "2026-03-10");
        assert_eq!(period.amount, "199000");
        assert!(!period.estimated);

        for reply in [
            json!({"status": "error", "message": "No active service"}),
            json!({"status": "success", "data": null}),
            json!("<html>"),
        ] {
            assert_eq!(billing_period_from(reply, now), BillingPeriod::fallback(now));
        }
    }

    #[test]
    fn test_client_directory_envelope() {
        let data: ClientDirectory = unwrap_data(
            json!({"data": {"clients": [{"id": 1, "name": "Budi"}, {"id": "2"}]}}),
            "Failed to load clients",
        )
        .unwrap();
        assert_eq!(data.clients.len(), 2);
        assert_eq!(data.clients[1].id.as_deref(), Some("2"));

        let err = unwrap_data::<ClientDirectory>(json!({"data": {"rows": []}}), "Failed to load clients")
            .unwrap_err();
        assert!(matches!(err, PortalError::Decode(_)));

        let err = unwrap_data::<ClientDirectory>(json!({}), "Failed to load clients").unwrap_err();
        assert_eq!(err.to_string(), "Failed to load clients");
    }

    #[test]
    fn test_password_calls_validate_before_sending() {
        let portal = portal();
        let err = portal.forgot_password("   ").unwrap_err();
        assert_eq!(err.to_string(), "Enter a valid email");

        let reset = PasswordReset {
            email: "budi@example.com",
            token: "123456",
            password: "abc",
            confirmation: "abc",
        };
        assert!(matches!(
            portal.reset_password(&reset),
            Err(PortalError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_session_bound_extras_need_a_session() {
        let portal = portal();
        assert!(matches!(
            portal.billing_period(),
            Err(PortalError::NotAuthenticated)
        ));
        assert!(matches!(
            portal.detailed_invoices(),
            Err(PortalError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_url_join() {
        let portal = portal();
        assert_eq!(portal.url("/mobile/client"), "http://127.0.0.1:9/mobile/client");
        assert_eq!(portal.url("danaxendit/payNow"), "http://127.0.0.1:9/danaxendit/payNow");
    }
}
