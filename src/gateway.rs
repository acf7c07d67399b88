//! Gateway display names, method codes and how each code is paid.
//!
//! [`GATEWAY_TABLE`] is ordered; the first row with a matching pattern wins.
//! A row's patterns double as the family keywords used when reading the
//! backend's acknowledgement of a method change.

use serde::Serialize;
use serde_json::Value;

/// How a bound method is completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Bank transfer to a per-invoice virtual account
    VirtualAccount,
    /// Pay on the portal's hosted invoice page
    HostedInvoice,
    /// Ask the gateway's payNow endpoint for a redirect URL
    PayNowEndpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "&'static str")]
pub enum MethodCode {
    BniVa,
    SampoernaVa,
    BriVa,
    MandiriVa,
    BcaVa,
    CimbVa,
    PermataBankVa,
    AtmBersama,
    Alfamart,
    CashPayment,
    CreditCard,
    Dana,
    Gopay,
    Ovo,
    ShopeePay,
    LinkAja,
}

impl From<MethodCode> for &'static str {
    fn from(code: MethodCode) -> Self {
        code.as_str()
    }
}

impl std::fmt::Display for MethodCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    Contains(&'static str),
    /// Matches with all whitespace removed from both sides
    ContainsIgnoringSpaces(&'static str),
}

impl Pattern {
    fn matches(&self, lowered: &str, compact: &str) -> bool {
        match self {
            Pattern::Contains(p) => lowered.contains(*p),
            Pattern::ContainsIgnoringSpaces(p) => compact.contains(strip_spaces(p).as_str()),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Pattern::Contains(p) | Pattern::ContainsIgnoringSpaces(p) => *p,
        }
    }
}

pub struct GatewayRule {
    pub patterns: &'static [Pattern],
    pub code: MethodCode,
    pub handler: Handler,
}

use Handler::{HostedInvoice, PayNowEndpoint, VirtualAccount};
use Pattern::{Contains, ContainsIgnoringSpaces};

#[rustfmt::skip]
pub static GATEWAY_TABLE: &[GatewayRule] = &[
    GatewayRule { patterns: &[Contains("bni")], code: MethodCode::BniVa, handler: VirtualAccount },
    GatewayRule { patterns: &[Contains("sampoerna")], code: MethodCode::SampoernaVa, handler: VirtualAccount },
    GatewayRule { patterns: &[Contains("bri")], code: MethodCode::BriVa, handler: VirtualAccount },
    GatewayRule { patterns: &[Contains("mandiri")], code: MethodCode::MandiriVa, handler: VirtualAccount },
    GatewayRule { patterns: &[Contains("bca")], code: MethodCode::BcaVa, handler: VirtualAccount },
    GatewayRule { patterns: &[Contains("cimb")], code: MethodCode::CimbVa, handler: VirtualAccount },
    GatewayRule { patterns: &[Contains("permatabank")], code: MethodCode::PermataBankVa, handler: VirtualAccount },
    GatewayRule { patterns: &[ContainsIgnoringSpaces("atm bersama")], code: MethodCode::AtmBersama, handler: HostedInvoice },
    GatewayRule { patterns: &[Contains("alfamart")], code: MethodCode::Alfamart, handler: HostedInvoice },
    GatewayRule { patterns: &[Contains("cash payment")], code: MethodCode::CashPayment, handler: HostedInvoice },
    GatewayRule {
        patterns: &[
            Contains("credit card"),
            Contains("ccmidtrans"),
            Contains("visa"),
            Contains("mastercard"),
            Contains("jbc"),
            Contains("american express"),
        ],
        code: MethodCode::CreditCard,
        handler: HostedInvoice,
    },
    GatewayRule { patterns: &[Contains("dana")], code: MethodCode::Dana, handler: PayNowEndpoint },
    GatewayRule { patterns: &[Contains("gopay")], code: MethodCode::Gopay, handler: HostedInvoice },
    GatewayRule { patterns: &[Contains("ovo")], code: MethodCode::Ovo, handler: HostedInvoice },
    GatewayRule { patterns: &[Contains("shopeepay")], code: MethodCode::ShopeePay, handler: HostedInvoice },
    GatewayRule { patterns: &[Contains("linkaja")], code: MethodCode::LinkAja, handler: HostedInvoice },
];

fn strip_spaces(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

impl MethodCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodCode::BniVa => "bnivaxendit",
            MethodCode::SampoernaVa => "sampoernavaxendit",
            MethodCode::BriVa => "brivaxendit",
            MethodCode::MandiriVa => "mandirivaxendit",
            MethodCode::BcaVa => "bcavaxendit",
            MethodCode::CimbVa => "cimbvaxendit",
            MethodCode::PermataBankVa => "permatabankvaxendit",
            MethodCode::AtmBersama => "atmbersamaxendit",
            MethodCode::Alfamart => "alfamartxendit",
            MethodCode::CashPayment => "cashpayment",
            MethodCode::CreditCard => "ccmidtrans",
            MethodCode::Dana => "danaxendit",
            MethodCode::Gopay => "gopaymidtrans",
            MethodCode::Ovo => "ovoxendit",
            MethodCode::ShopeePay => "shopeepayxendit",
            MethodCode::LinkAja => "linkajaxendit",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        GATEWAY_TABLE
            .iter()
            .map(|rule| rule.code)
            .find(|c| c.as_str().eq_ignore_ascii_case(code))
    }

    fn rule(&self) -> Option<&'static GatewayRule> {
        GATEWAY_TABLE.iter().find(|rule| rule.code == *self)
    }

    fn patterns(&self) -> &'static [Pattern] {
        self.rule().map(|rule| rule.patterns).unwrap_or(&[])
    }

    pub fn handler(&self) -> Handler {
        self.rule()
            .map(|rule| rule.handler)
            .unwrap_or(Handler::HostedInvoice)
    }

    /// Family keywords, the display-name patterns of this code's row
    pub fn keywords(&self) -> impl Iterator<Item = &'static str> {
        self.patterns().iter().map(Pattern::keyword)
    }

    /// Substring identifying this method's entry in `available_payment_methods`
    pub fn va_lookup_keyword(&self) -> Option<&'static str> {
        match self {
            MethodCode::BniVa => Some("bniva"),
            MethodCode::SampoernaVa => Some("sampoerna"),
            MethodCode::BriVa => Some("briva"),
            MethodCode::MandiriVa => Some("mandiriva"),
            MethodCode::BcaVa => Some("bcava"),
            MethodCode::CimbVa => Some("cimbva"),
            MethodCode::PermataBankVa => Some("permatabankva"),
            _ => None,
        }
    }

    /// Gateway path segment for the payNow endpoint
    pub fn pay_now_gateway(&self) -> Option<&'static str> {
        match self.handler() {
            Handler::PayNowEndpoint => Some(self.as_str()),
            _ => None,
        }
    }
}

/// Map a gateway display name to its method code
pub fn classify(display_name: &str) -> Option<MethodCode> {
    let lowered = display_name.to_lowercase();
    let compact = strip_spaces(&lowered);
    GATEWAY_TABLE
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| p.matches(&lowered, &compact)))
        .map(|rule| rule.code)
}

fn is_success_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("success") || s.eq_ignore_ascii_case("true")
        }
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Whether the backend accepted a payment method change.
///
/// The endpoint answers with the code itself, a display label containing
/// the family name, or a `{result|status|success}` object.
pub fn ack_succeeded(ack: &Value, code: MethodCode) -> bool {
    match ack {
        Value::String(reply) => {
            let lowered = reply.trim().to_lowercase();
            if lowered.is_empty() {
                return false;
            }
            let compact = strip_spaces(&lowered);
            lowered.contains(code.as_str())
                || code
                    .patterns()
                    .iter()
                    .any(|p| p.matches(&lowered, &compact))
        }
        Value::Object(map) => {
            is_success_flag(map.get("result"))
                || is_success_flag(map.get("status"))
                || is_success_flag(map.get("success"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification_table() {
        let cases: &[(&str, Option<MethodCode>)] = &[
            ("BNI Virtual Account", Some(MethodCode::BniVa)),
            ("bni", Some(MethodCode::BniVa)),
            ("Bank Sahabat Sampoerna", Some(MethodCode::SampoernaVa)),
            ("BRI Virtual Account", Some(MethodCode::BriVa)),
            ("Mandiri VA", Some(MethodCode::MandiriVa)),
            ("BCA Virtual Account", Some(MethodCode::BcaVa)),
            ("  bCa  ", Some(MethodCode::BcaVa)),
            ("CIMB Niaga VA", Some(MethodCode::CimbVa)),
            ("PermataBank Virtual Account", Some(MethodCode::PermataBankVa)),
            ("ATM Bersama", Some(MethodCode::AtmBersama)),
            ("ATMBersama", Some(MethodCode::AtmBersama)),
            ("atm  bersama", Some(MethodCode::AtmBersama)),
            ("Alfamart", Some(MethodCode::Alfamart)),
            ("Cash Payment", Some(MethodCode::CashPayment)),
            ("Credit Card", Some(MethodCode::CreditCard)),
            ("ccmidtrans", Some(MethodCode::CreditCard)),
            ("VISA", Some(MethodCode::CreditCard)),
            ("Mastercard", Some(MethodCode::CreditCard)),
            ("JBC", Some(MethodCode::CreditCard)),
            ("American Express", Some(MethodCode::CreditCard)),
            ("DANA", Some(MethodCode::Dana)),
            ("GoPay", Some(MethodCode::Gopay)),
            ("OVO", Some(MethodCode::Ovo)),
            ("ShopeePay", Some(MethodCode::ShopeePay)),
            ("LinkAja", Some(MethodCode::LinkAja)),
            ("Bank Transfer Manual", None),
            ("", None),
        ];

        for (name, expected) in cases {
            assert_eq!(classify(name), *expected, "display name {:?}", name);
        }
    }

    #[test]
    fn test_first_match_wins() {
        // Both "bni" and "bca" appear; bni is earlier in the table
        assert_eq!(classify("BNI / BCA transfer"), Some(MethodCode::BniVa));
        // Whitespace only relaxed for ATM Bersama
        assert_eq!(classify("Permata Bank"), None);
        assert_eq!(classify("cashpayment"), None);
    }

    #[test]
    fn test_every_row_classifies_its_own_code() {
        for rule in GATEWAY_TABLE {
            for pattern in rule.patterns {
                let upper = pattern.keyword().to_uppercase();
                assert_eq!(classify(&upper), Some(rule.code), "pattern {:?}", pattern);
            }
        }
    }

    #[test]
    fn test_code_round_trip_and_handlers() {
        for rule in GATEWAY_TABLE {
            assert_eq!(MethodCode::from_code(rule.code.as_str()), Some(rule.code));
            assert_eq!(rule.code.handler(), rule.handler);
            assert_eq!(
                rule.code.va_lookup_keyword().is_some(),
                rule.handler == Handler::VirtualAccount
            );
        }
        assert_eq!(MethodCode::from_code("BCAVAXENDIT"), Some(MethodCode::BcaVa));
        assert_eq!(MethodCode::from_code("paypal"), None);
        assert_eq!(MethodCode::Dana.pay_now_gateway(), Some("danaxendit"));
        assert_eq!(MethodCode::Gopay.pay_now_gateway(), None);
        assert_eq!(MethodCode::AtmBersama.handler(), Handler::HostedInvoice);
    }

    #[test]
    fn test_ack_code_any_case() {
        for rule in GATEWAY_TABLE {
            let code = rule.code;
            assert!(ack_succeeded(&json!(code.as_str()), code));
            assert!(ack_succeeded(&json!(code.as_str().to_uppercase()), code));
        }
    }

    #[test]
    fn test_ack_family_labels() {
        assert!(ack_succeeded(&json!("DANA"), MethodCode::Dana));
        assert!(ack_succeeded(&json!("LINKAJA"), MethodCode::LinkAja));
        assert!(ack_succeeded(&json!("Cash Payment"), MethodCode::CashPayment));
        assert!(ack_succeeded(&json!("Credit Card"), MethodCode::CreditCard));
        assert!(ack_succeeded(&json!("ATM Bersama"), MethodCode::AtmBersama));
        assert!(ack_succeeded(&json!("Payment via GoPay"), MethodCode::Gopay));

        assert!(!ack_succeeded(&json!("OVO"), MethodCode::Dana));
        assert!(!ack_succeeded(&json!(""), MethodCode::Dana));
    }

    #[test]
    fn test_ack_objects() {
        let code = MethodCode::BcaVa;
        assert!(ack_succeeded(&json!({"result": "success"}), code));
        assert!(ack_succeeded(&json!({"result": "SUCCESS"}), code));
        assert!(ack_succeeded(&json!({"status": "success"}), code));
        assert!(ack_succeeded(&json!({"success": true}), code));

        assert!(!ack_succeeded(&json!({"result": "failure"}), code));
        assert!(!ack_succeeded(&json!({"success": false}), code));
        assert!(!ack_succeeded(&json!({"message": "Invoice not found"}), code));
        assert!(!ack_succeeded(&json!(null), code));
        assert!(!ack_succeeded(&json!(42), code));
    }

    #[test]
    fn test_serializes_as_code() {
        assert_eq!(
            serde_json::to_value(MethodCode::ShopeePay).unwrap(),
            json!("shopeepayxendit")
        );
    }
}
