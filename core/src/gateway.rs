//! Payment gateway collaborator.
//!
//! The core depends only on this trait. Request signing, TLS and the HTTP
//! transport live in the client that implements it. Every client is wrapped
//! in a [`TimeoutGateway`] that bounds each call by the configured timeout;
//! the core never holds a database lock while a call is in flight.

use crate::{money::Money, types::BankKind};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway call timed out")]
    Timeout,

    #[error("gateway rejected request: {code} {message}")]
    Rejected { code: String, message: String },

    #[error("gateway transport failure: {0}")]
    Transport(String),

    #[error("gateway disabled")]
    Disabled,
}

impl GatewayError {
    /// The gateway answered and did not act on the request. Timeouts and
    /// transport failures leave the outcome unknown.
    pub fn is_definitive(&self) -> bool {
        matches!(self, GatewayError::Rejected { .. } | GatewayError::Disabled)
    }
}

/// A payment code minted by the gateway (QR content or VA number).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCode {
    pub code: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryStatus {
    Settled,
    Pending,
    Failed,
}

impl InquiryStatus {
    /// Maps a gateway `latestTransactionStatus` code.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "00" => InquiryStatus::Settled,
            "06" | "05" | "07" => InquiryStatus::Failed,
            _ => InquiryStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryKind {
    Qr,
    VirtualAccount,
}

/// A payout to a bank account or e-wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    pub order_id: String,
    pub destination_account: String,
    /// Bank code for transfers, product code for e-wallet top-ups.
    pub code: String,
    pub rail: BankKind,
    pub amount: Money,
    pub callback_url: String,
}

/// Gateway acknowledgement of a payout; final status arrives by webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutAck {
    pub response_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualAccountRequest {
    pub order_id: String,
    pub customer_ref: String,
    pub name: String,
    pub amount: Money,
    pub bank_code: String,
}

pub trait PaymentGateway: Send + Sync {
    fn access_token(&self) -> Result<String, GatewayError>;

    fn create_qr(&self, token: &str, order_id: &str, amount: Money)
        -> Result<PaymentCode, GatewayError>;

    fn create_virtual_account(
        &self,
        token: &str,
        request: &VirtualAccountRequest,
    ) -> Result<PaymentCode, GatewayError>;

    fn inquiry(
        &self,
        token: &str,
        kind: InquiryKind,
        order_id: &str,
    ) -> Result<InquiryStatus, GatewayError>;

    fn payout(&self, token: &str, request: &PayoutRequest) -> Result<PayoutAck, GatewayError>;
}

/// Bounds every call to `inner` by `timeout`.
///
/// The call runs on its own thread. When the budget runs out the caller gets
/// `GatewayError::Timeout` and the thread is left to finish, so its outcome
/// is unknown to the core.
pub struct TimeoutGateway {
    inner: Arc<dyn PaymentGateway>,
    timeout: Duration,
}

impl TimeoutGateway {
    pub fn new(inner: Arc<dyn PaymentGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn bounded<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PaymentGateway) -> Result<T, GatewayError> + Send + 'static,
    {
        let inner = self.inner.clone();
        let (tx, rx) = mpsc::sync_channel(1);
        thread::spawn(move || {
            let _ = tx.send(call(inner.as_ref()));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!("gateway call exceeded {:?}", self.timeout);
                Err(GatewayError::Timeout)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(GatewayError::Transport("gateway call aborted".into()))
            }
        }
    }
}

impl PaymentGateway for TimeoutGateway {
    fn access_token(&self) -> Result<String, GatewayError> {
        self.bounded(|g| g.access_token())
    }

    fn create_qr(
        &self,
        token: &str,
        order_id: &str,
        amount: Money,
    ) -> Result<PaymentCode, GatewayError> {
        let (token, order_id) = (token.to_string(), order_id.to_string());
        self.bounded(move |g| g.create_qr(&token, &order_id, amount))
    }

    fn create_virtual_account(
        &self,
        token: &str,
        request: &VirtualAccountRequest,
    ) -> Result<PaymentCode, GatewayError> {
        let (token, request) = (token.to_string(), request.clone());
        self.bounded(move |g| g.create_virtual_account(&token, &request))
    }

    fn inquiry(
        &self,
        token: &str,
        kind: InquiryKind,
        order_id: &str,
    ) -> Result<InquiryStatus, GatewayError> {
        let (token, order_id) = (token.to_string(), order_id.to_string());
        self.bounded(move |g| g.inquiry(&token, kind, &order_id))
    }

    fn payout(&self, token: &str, request: &PayoutRequest) -> Result<PayoutAck, GatewayError> {
        let (token, request) = (token.to_string(), request.clone());
        self.bounded(move |g| g.payout(&token, &request))
    }
}

/// Refuses every call. Wired where no outbound gateway is configured, so
/// webhook and scheduler paths still run.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGateway;

impl PaymentGateway for OfflineGateway {
    fn access_token(&self) -> Result<String, GatewayError> {
        Err(GatewayError::Disabled)
    }

    fn create_qr(&self, _: &str, _: &str, _: Money) -> Result<PaymentCode, GatewayError> {
        Err(GatewayError::Disabled)
    }

    fn create_virtual_account(
        &self,
        _: &str,
        _: &VirtualAccountRequest,
    ) -> Result<PaymentCode, GatewayError> {
        Err(GatewayError::Disabled)
    }

    fn inquiry(&self, _: &str, _: InquiryKind, _: &str) -> Result<InquiryStatus, GatewayError> {
        Err(GatewayError::Disabled)
    }

    fn payout(&self, _: &str, _: &PayoutRequest) -> Result<PayoutAck, GatewayError> {
        Err(GatewayError::Disabled)
    }
}

/// In-process gateway whose answers are scripted by the caller.
/// Records every outbound request for assertions.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    state: Mutex<ScriptState>,
}

#[derive(Debug, Default)]
struct ScriptState {
    fail_next: VecDeque<GatewayError>,
    inquiry: HashMap<String, InquiryStatus>,
    expires_at: Option<DateTime<Utc>>,
    issued_codes: u64,
    qr_requests: Vec<(String, Money)>,
    va_requests: Vec<VirtualAccountRequest>,
    inquiries: Vec<String>,
    payouts: Vec<PayoutRequest>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next gateway call (of any kind) fails with `err`.
    pub fn fail_next(&self, err: GatewayError) {
        self.lock().fail_next.push_back(err);
    }

    pub fn set_inquiry(&self, order_id: &str, status: InquiryStatus) {
        self.lock().inquiry.insert(order_id.to_string(), status);
    }

    /// Expiry reported for subsequently minted payment codes.
    pub fn set_expiry(&self, at: Option<DateTime<Utc>>) {
        self.lock().expires_at = at;
    }

    pub fn qr_requests(&self) -> Vec<(String, Money)> {
        self.lock().qr_requests.clone()
    }

    pub fn va_requests(&self) -> Vec<VirtualAccountRequest> {
        self.lock().va_requests.clone()
    }

    pub fn inquiries(&self) -> Vec<String> {
        self.lock().inquiries.clone()
    }

    pub fn payouts(&self) -> Vec<PayoutRequest> {
        self.lock().payouts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn take_failure(state: &mut ScriptState) -> Result<(), GatewayError> {
        match state.fail_next.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl PaymentGateway for ScriptedGateway {
    fn access_token(&self) -> Result<String, GatewayError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        Ok("scripted-token".into())
    }

    fn create_qr(
        &self,
        _token: &str,
        order_id: &str,
        amount: Money,
    ) -> Result<PaymentCode, GatewayError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        state.qr_requests.push((order_id.to_string(), amount));
        state.issued_codes += 1;
        Ok(PaymentCode {
            code: format!("QR-{order_id}-{}", state.issued_codes),
            expires_at: state.expires_at,
        })
    }

    fn create_virtual_account(
        &self,
        _token: &str,
        request: &VirtualAccountRequest,
    ) -> Result<PaymentCode, GatewayError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        state.va_requests.push(request.clone());
        state.issued_codes += 1;
        Ok(PaymentCode {
            code: format!("8808{:012}", state.issued_codes),
            expires_at: state.expires_at,
        })
    }

    fn inquiry(
        &self,
        _token: &str,
        _kind: InquiryKind,
        order_id: &str,
    ) -> Result<InquiryStatus, GatewayError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        state.inquiries.push(order_id.to_string());
        Ok(state
            .inquiry
            .get(order_id)
            .copied()
            .unwrap_or(InquiryStatus::Pending))
    }

    fn payout(&self, _token: &str, request: &PayoutRequest) -> Result<PayoutAck, GatewayError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        state.payouts.push(request.clone());
        Ok(PayoutAck {
            response_code: "2004300".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every call after `delay`.
    struct SlowGateway {
        delay: Duration,
    }

    impl SlowGateway {
        fn wait(&self) {
            thread::sleep(self.delay);
        }
    }

    impl PaymentGateway for SlowGateway {
        fn access_token(&self) -> Result<String, GatewayError> {
            self.wait();
            Ok("slow-token".into())
        }

        fn create_qr(&self, _: &str, order_id: &str, _: Money) -> Result<PaymentCode, GatewayError> {
            self.wait();
            Ok(PaymentCode {
                code: format!("QR-{order_id}"),
                expires_at: None,
            })
        }

        fn create_virtual_account(
            &self,
            _: &str,
            _: &VirtualAccountRequest,
        ) -> Result<PaymentCode, GatewayError> {
            self.wait();
            Err(GatewayError::Disabled)
        }

        fn inquiry(&self, _: &str, _: InquiryKind, _: &str) -> Result<InquiryStatus, GatewayError> {
            self.wait();
            Ok(InquiryStatus::Settled)
        }

        fn payout(&self, _: &str, _: &PayoutRequest) -> Result<PayoutAck, GatewayError> {
            self.wait();
            Ok(PayoutAck {
                response_code: "2004300".into(),
            })
        }
    }

    #[test]
    fn slow_calls_time_out() {
        let slow = Arc::new(SlowGateway {
            delay: Duration::from_millis(500),
        });
        let bounded = TimeoutGateway::new(slow, Duration::from_millis(20));
        assert_eq!(bounded.access_token(), Err(GatewayError::Timeout));
        assert_eq!(
            bounded.inquiry("t", InquiryKind::Qr, "INV-1"),
            Err(GatewayError::Timeout)
        );
    }

    #[test]
    fn fast_calls_pass_through() {
        let slow = Arc::new(SlowGateway {
            delay: Duration::ZERO,
        });
        let bounded = TimeoutGateway::new(slow, Duration::from_secs(5));
        assert_eq!(bounded.access_token().unwrap(), "slow-token");
        assert_eq!(
            bounded.create_qr("t", "INV-2", Money::from_major(1)).unwrap().code,
            "QR-INV-2"
        );
        assert_eq!(
            bounded.create_virtual_account(
                "t",
                &VirtualAccountRequest {
                    order_id: "INV-3".into(),
                    customer_ref: "1".into(),
                    name: "A".into(),
                    amount: Money::from_major(1),
                    bank_code: "014".into(),
                }
            ),
            Err(GatewayError::Disabled)
        );
    }

    #[test]
    fn definitive_errors() {
        assert!(GatewayError::Disabled.is_definitive());
        assert!(!GatewayError::Timeout.is_definitive());
        assert!(!GatewayError::Transport("reset".into()).is_definitive());
    }
}
