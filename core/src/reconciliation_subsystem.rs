//! Reconciliation layer: gateway webhooks and the inquiry fallback.
//!
//! Both payment entry points converge on `settle_contract` /
//! `cancel_pending_contract`, which are no-ops once a contract has left
//! Pending. The gateway delivers at least once, so every recognised,
//! duplicate, unknown or malformed delivery is answered with the success
//! envelope. Only a database failure is surfaced as an error, leaving the
//! gateway free to retry a delivery that changed nothing.

use crate::{
    clock::Clock,
    config::PlatformConfig,
    error::{LedgerError, LedgerResult},
    event::SettlementSource,
    gateway::{InquiryKind, InquiryStatus, PaymentGateway},
    investment_subsystem::{cancel_pending_contract, expire_payment, settle_contract},
    money::Money,
    rate_limit::RateLimiter,
    store::{LedgerStore, PaymentRow},
    types::{OrderId, PaymentMethod, PaymentStatus, UserId},
    withdrawal_subsystem::{apply_payout_status, PayoutOutcome},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const PAYMENT_ACK_CODE: &str = "2002800";
pub const PAYOUT_ACK_CODE: &str = "2004400";

/// Gateway-specific success envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub response_code: &'static str,
    pub response_message: &'static str,
}

impl WebhookAck {
    fn new(response_code: &'static str) -> Self {
        Self {
            response_code,
            response_message: "Successful",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State changed.
    Applied,
    /// The target already left Pending.
    Duplicate,
    /// Recognised but informational (settlement callback, unknown status).
    Ignored,
    UnknownOrder,
    Malformed,
    /// The gateway reported something that contradicts our final state.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub ack: WebhookAck,
    pub outcome: WebhookOutcome,
}

// ── Payloads ──────────────────────────────────────────────────────

/// VA callbacks nest their fields under `transactionData`; QR callbacks
/// carry them at the root.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentCallback {
    transaction_data: Option<CallbackFields>,
    #[serde(flatten)]
    root: CallbackFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackFields {
    partner_reference_no: Option<String>,
    original_partner_reference_no: Option<String>,
    callback_type: Option<String>,
    payment_flag_status: Option<String>,
    latest_transaction_status: Option<String>,
}

impl CallbackFields {
    fn order_id(&self) -> Option<&str> {
        first_present(&[&self.partner_reference_no, &self.original_partner_reference_no])
    }

    fn status(&self) -> Option<&str> {
        first_present(&[&self.payment_flag_status, &self.latest_transaction_status])
    }
}

fn first_present<'a>(fields: &[&'a Option<String>]) -> Option<&'a str> {
    fields
        .iter()
        .copied()
        .filter_map(Option::as_deref)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayoutCallback {
    transaction_data: Option<CallbackFields>,
}

/// What the user sees for one purchase payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentDetails {
    pub order_id: OrderId,
    pub product: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub channel: Option<String>,
    pub code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
}

pub struct ReconciliationSubsystem {
    store: LedgerStore,
    config: Arc<PlatformConfig>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
}

impl ReconciliationSubsystem {
    pub fn new(
        store: LedgerStore,
        config: Arc<PlatformConfig>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::from_config(&config.webhook);
        Self {
            store,
            config,
            gateway,
            clock,
            limiter,
        }
    }

    // ── Payment webhook ───────────────────────────────────────────

    pub fn handle_payment_webhook(&self, source_ip: &str, body: &str) -> LedgerResult<WebhookReply> {
        let now = self.clock.now();
        self.limiter.check(source_ip, now)?;
        let reply = |outcome| WebhookReply {
            ack: WebhookAck::new(PAYMENT_ACK_CODE),
            outcome,
        };

        let payload: PaymentCallback = match serde_json::from_str(body) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("payment webhook from {source_ip}: malformed payload: {e}");
                return Ok(reply(WebhookOutcome::Malformed));
            }
        };
        let fields = payload.transaction_data.as_ref().unwrap_or(&payload.root);
        let callback_type = fields
            .callback_type
            .as_deref()
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if callback_type != "payment" {
            log::debug!("payment webhook: '{callback_type}' callback acknowledged");
            return Ok(reply(WebhookOutcome::Ignored));
        }
        let (Some(order_id), Some(status)) = (fields.order_id(), fields.status()) else {
            log::warn!("payment webhook from {source_ip}: missing reference or status");
            return Ok(reply(WebhookOutcome::Malformed));
        };

        let outcome = self.store.unit_of_work(|uow| {
            if uow.contract_by_order(order_id)?.is_none() {
                return Ok(WebhookOutcome::UnknownOrder);
            }
            let changed = match InquiryStatus::from_code(status) {
                InquiryStatus::Settled => {
                    settle_contract(uow, &self.config, order_id, SettlementSource::Webhook, now)?
                }
                InquiryStatus::Failed => cancel_pending_contract(
                    uow,
                    order_id,
                    PaymentStatus::Failed,
                    "gateway reported payment failure",
                    now,
                )?,
                InquiryStatus::Pending => return Ok(WebhookOutcome::Ignored),
            };
            Ok(if changed {
                WebhookOutcome::Applied
            } else {
                WebhookOutcome::Duplicate
            })
        })?;

        if outcome == WebhookOutcome::UnknownOrder {
            log::warn!("payment webhook: unknown order {order_id}");
        }
        Ok(reply(outcome))
    }

    // ── Payout webhook ────────────────────────────────────────────

    pub fn handle_payout_webhook(&self, source_ip: &str, body: &str) -> LedgerResult<WebhookReply> {
        let now = self.clock.now();
        self.limiter.check(source_ip, now)?;
        let reply = |outcome| WebhookReply {
            ack: WebhookAck::new(PAYOUT_ACK_CODE),
            outcome,
        };

        let fields = match serde_json::from_str::<PayoutCallback>(body) {
            Ok(PayoutCallback {
                transaction_data: Some(fields),
            }) => fields,
            Ok(_) | Err(_) => {
                log::warn!("payout webhook from {source_ip}: malformed payload");
                return Ok(reply(WebhookOutcome::Malformed));
            }
        };
        let (Some(order_id), Some(status)) = (fields.order_id(), fields.status()) else {
            return Ok(reply(WebhookOutcome::Malformed));
        };

        let result = self
            .store
            .unit_of_work(|uow| apply_payout_status(uow, order_id, status, now))?;
        let outcome = match result {
            PayoutOutcome::Succeeded | PayoutOutcome::ReturnedForReview => WebhookOutcome::Applied,
            PayoutOutcome::AlreadyFinal => WebhookOutcome::Duplicate,
            PayoutOutcome::Ignored => WebhookOutcome::Ignored,
            PayoutOutcome::UnknownOrder => WebhookOutcome::UnknownOrder,
            PayoutOutcome::Conflict => WebhookOutcome::Conflict,
        };
        Ok(reply(outcome))
    }

    // ── Payment details + inquiry fallback ────────────────────────

    /// Payment details for the owner of `order_id`. A Pending payment is
    /// expired if overdue, otherwise checked against the gateway and
    /// reconciled inline when the gateway already has the money.
    pub fn payment_details(&self, user_id: UserId, order_id: &str) -> LedgerResult<PaymentDetails> {
        let now = self.clock.now();
        let payment = self.owned_payment(user_id, order_id)?;

        if payment.status == PaymentStatus::Pending {
            let overdue = payment.expires_at.is_some_and(|at| at < now);
            if overdue {
                self.store.unit_of_work(|uow| expire_payment(uow, order_id, now))?;
            } else {
                self.inquire(&payment, now)?;
            }
        }
        self.details(user_id, order_id)
    }

    /// Gateway inquiry with no unit of work open across the call. A failed
    /// inquiry leaves everything as it was.
    fn inquire(&self, payment: &PaymentRow, now: DateTime<Utc>) -> LedgerResult<()> {
        let kind = match payment.method {
            PaymentMethod::Qris => InquiryKind::Qr,
            PaymentMethod::Bank => InquiryKind::VirtualAccount,
        };
        let status = match self
            .gateway
            .access_token()
            .and_then(|token| self.gateway.inquiry(&token, kind, &payment.order_id))
        {
            Ok(status) => status,
            Err(e) => {
                log::warn!("inquiry {}: gateway unavailable: {e}", payment.order_id);
                return Ok(());
            }
        };

        let order_id = payment.order_id.as_str();
        self.store.unit_of_work(|uow| match status {
            InquiryStatus::Settled => {
                settle_contract(uow, &self.config, order_id, SettlementSource::Inquiry, now)
            }
            InquiryStatus::Failed => cancel_pending_contract(
                uow,
                order_id,
                PaymentStatus::Failed,
                "gateway reported payment failure",
                now,
            ),
            InquiryStatus::Pending => Ok(false),
        })?;
        Ok(())
    }

    fn owned_payment(&self, user_id: UserId, order_id: &str) -> LedgerResult<PaymentRow> {
        self.store.read(|uow| {
            let payment = uow
                .payment_by_order(order_id)?
                .ok_or_else(|| LedgerError::not_found("payment", order_id))?;
            let contract = uow.contract(payment.contract_id)?;
            if contract.user_id != user_id {
                return Err(LedgerError::not_found("payment", order_id));
            }
            Ok(payment)
        })
    }

    fn details(&self, user_id: UserId, order_id: &str) -> LedgerResult<PaymentDetails> {
        let payment = self.owned_payment(user_id, order_id)?;
        self.store.read(|uow| {
            let contract = uow.contract(payment.contract_id)?;
            let product = uow.product(contract.product_id)?;
            Ok(PaymentDetails {
                order_id: payment.order_id,
                product: product.name,
                amount: contract.amount,
                method: payment.method,
                channel: payment.channel,
                code: payment.code,
                expires_at: payment.expires_at,
                status: payment.status,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serialises_in_gateway_shape() {
        let json = serde_json::to_string(&WebhookAck::new(PAYMENT_ACK_CODE)).unwrap();
        assert_eq!(json, r#"{"responseCode":"2002800","responseMessage":"Successful"}"#);
    }

    #[test]
    fn va_fields_take_precedence_over_root() {
        let body = r#"{
            "transactionData": {"partnerReferenceNo": "INV-1", "callbackType": "payment", "paymentFlagStatus": "00"},
            "callbackType": "settlement"
        }"#;
        let p: PaymentCallback = serde_json::from_str(body).unwrap();
        let fields = p.transaction_data.as_ref().unwrap();
        assert_eq!(fields.order_id(), Some("INV-1"));
        assert_eq!(fields.status(), Some("00"));
    }

    #[test]
    fn qr_fields_are_read_from_root() {
        let body = r#"{"originalPartnerReferenceNo": " INV-2 ", "callbackType": "payment", "latestTransactionStatus": "00"}"#;
        let p: PaymentCallback = serde_json::from_str(body).unwrap();
        assert!(p.transaction_data.is_none());
        assert_eq!(p.root.order_id(), Some("INV-2"));
        assert_eq!(p.root.status(), Some("00"));
    }
}
