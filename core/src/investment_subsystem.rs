//! Investment contract state machine.
//!
//! States: pending → running → {completed, suspended, cancelled};
//! pending → cancelled on expiry or gateway failure report.
//!
//! Promotor accounts settle synchronously against their balance in one
//! unit of work. Everyone else pays through the gateway: the contract and
//! payment are written Pending, the gateway mints a payment code with no
//! database lock held, and the contract stays Pending until a webhook or
//! an inquiry converges on `settle_contract`.

use crate::{
    clock::Clock,
    config::PlatformConfig,
    error::{LedgerError, LedgerResult},
    event::{LedgerEvent, SettlementSource},
    gateway::{PaymentCode, PaymentGateway, VirtualAccountRequest},
    ledger::{apply_ledger_mutation, record_entry},
    money::Money,
    order_id,
    referral_subsystem,
    store::{ContractRow, LedgerStore, NewContract, UnitOfWork, UserRow},
    types::{
        AccountStatus, CatalogStatus, CategoryId, ContractId, ContractStatus, EntryKind,
        EntryStatus, Flow, OrderId, PaymentMethod, PaymentStatus, ProductId, ProfitType, UserId,
    },
    vip,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

const SOURCE: &str = "investment";

/// What the purchaser gets back.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub contract_id: ContractId,
    pub order_id: OrderId,
    pub amount: Money,
    pub product: String,
    pub category: String,
    pub category_id: CategoryId,
    pub duration: u32,
    pub daily_profit: Money,
    pub status: ContractStatus,
    /// None for synchronously settled purchases.
    pub payment: Option<PaymentInstruction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInstruction {
    pub method: PaymentMethod,
    pub channel: Option<String>,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

pub struct InvestmentSubsystem {
    store: LedgerStore,
    config: Arc<PlatformConfig>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl InvestmentSubsystem {
    pub fn new(
        store: LedgerStore,
        config: Arc<PlatformConfig>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            gateway,
            clock,
        }
    }

    // ── Purchase ──────────────────────────────────────────────────

    /// Buy one unit of `product_id`. `channel` names the VA bank for
    /// `PaymentMethod::Bank` and is ignored for QR.
    pub fn create_contract(
        &self,
        user_id: UserId,
        product_id: ProductId,
        method: PaymentMethod,
        channel: Option<&str>,
    ) -> LedgerResult<PurchaseReceipt> {
        let now = self.clock.now();
        let bank_code = match method {
            PaymentMethod::Qris => None,
            PaymentMethod::Bank => {
                let channel = channel.unwrap_or_default().trim();
                let code = self.config.va_bank_code(channel).ok_or_else(|| {
                    LedgerError::InvalidPaymentChannel {
                        channel: channel.to_string(),
                    }
                })?;
                Some((channel.to_ascii_uppercase(), code.to_string()))
            }
        };
        let order_id = order_id::generate(order_id::INVESTMENT_PREFIX);

        let staged = self.store.unit_of_work(|uow| {
            let user = uow.lock_user(user_id)?;
            let offer = validate_purchase(uow, &user, product_id)?;

            if user.is_promotor() {
                return self
                    .settle_promotor(uow, &user, &offer, &order_id, method, now)
                    .map(Staged::Settled);
            }

            self.check_gateway_limits(method, offer.amount)?;
            let contract_id = uow.insert_contract(&offer.new_contract(user_id, &order_id), now)?;
            let fallback_expiry = now + Duration::hours(self.config.payment.payment_ttl_hours);
            uow.insert_payment(
                contract_id,
                &order_id,
                method,
                bank_code.as_ref().map(|(c, _)| c.as_str()),
                PaymentStatus::Pending,
                Some(fallback_expiry),
                now,
            )?;
            record_entry(
                uow,
                user_id,
                offer.amount,
                Flow::Outbound,
                EntryKind::Investment,
                &order_id,
                &format!("Investment {}", offer.product_name),
                now,
            )?;
            uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::ContractCreated {
                    contract_id,
                    user_id,
                    order_id: order_id.clone(),
                    amount: offer.amount,
                    synchronous: false,
                },
            )?;
            Ok(Staged::AwaitingPayment {
                contract_id,
                offer,
                user_name: user.name,
                fallback_expiry,
            })
        })?;

        let (contract_id, offer, user_name, fallback_expiry) = match staged {
            Staged::Settled(receipt) => return Ok(receipt),
            Staged::AwaitingPayment {
                contract_id,
                offer,
                user_name,
                fallback_expiry,
            } => (contract_id, offer, user_name, fallback_expiry),
        };

        // No unit of work is open across the gateway call.
        let minted = self.mint_payment_code(
            user_id,
            &user_name,
            &order_id,
            offer.amount,
            bank_code.as_ref().map(|(_, code)| code.as_str()),
        );
        let PaymentCode { code, expires_at } = match minted {
            Ok(code) => code,
            Err(e) => {
                log::warn!("purchase {order_id}: gateway refused payment code: {e}");
                return Err(e.into());
            }
        };
        let expires_at = expires_at.unwrap_or(fallback_expiry);

        let attached = self
            .store
            .unit_of_work(|uow| uow.attach_payment_code(&order_id, &code, expires_at, now))?;
        if !attached {
            log::warn!("purchase {order_id}: payment left pending before its code was stored");
        }
        log::info!("purchase {order_id}: contract {contract_id} awaiting {method} payment");

        Ok(PurchaseReceipt {
            contract_id,
            order_id,
            amount: offer.amount,
            product: offer.product_name,
            category: offer.category_name,
            category_id: offer.category_id,
            duration: offer.duration,
            daily_profit: offer.daily_profit,
            status: ContractStatus::Pending,
            payment: Some(PaymentInstruction {
                method,
                channel: bank_code.map(|(channel, _)| channel),
                code,
                expires_at,
            }),
        })
    }

    fn check_gateway_limits(&self, method: PaymentMethod, amount: Money) -> LedgerResult<()> {
        let p = &self.config.payment;
        match method {
            PaymentMethod::Qris if amount > p.qris_max_amount => {
                Err(LedgerError::PaymentAmountRejected {
                    amount,
                    reason: "Amount exceeds the QR payment maximum, use another payment method",
                })
            }
            PaymentMethod::Bank if amount < p.bank_min_amount => {
                Err(LedgerError::PaymentAmountRejected {
                    amount,
                    reason: "Amount is below the bank transfer minimum, use another payment method",
                })
            }
            _ => Ok(()),
        }
    }

    fn mint_payment_code(
        &self,
        user_id: UserId,
        user_name: &str,
        order_id: &str,
        amount: Money,
        bank_code: Option<&str>,
    ) -> LedgerResult<PaymentCode> {
        let token = self.gateway.access_token()?;
        let code = match bank_code {
            None => self.gateway.create_qr(&token, order_id, amount)?,
            Some(bank_code) => {
                let name = match user_name.trim() {
                    "" => "Customer",
                    n => n,
                };
                let suffix: u64 = rand::thread_rng().gen_range(0..10_000_000_000);
                self.gateway.create_virtual_account(
                    &token,
                    &VirtualAccountRequest {
                        order_id: order_id.to_string(),
                        customer_ref: format!("{user_id}{suffix:010}"),
                        name: format!("{name} - {}", self.config.payment.merchant_label),
                        amount,
                        bank_code: bank_code.to_string(),
                    },
                )?
            }
        };
        Ok(code)
    }

    /// Promotor purchase: debit, create and start in one unit of work.
    /// No gateway call and no referral bonus.
    fn settle_promotor(
        &self,
        uow: &UnitOfWork<'_>,
        user: &UserRow,
        offer: &Offer,
        order_id: &str,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<PurchaseReceipt> {
        if user.balance < offer.amount {
            return Err(LedgerError::InsufficientBalance {
                available: user.balance,
                required: offer.amount,
            });
        }
        let contract_id = uow.insert_contract(&offer.new_contract(user.id, order_id), now)?;
        apply_ledger_mutation(
            uow,
            user.id,
            -offer.amount,
            EntryKind::Investment,
            order_id,
            &format!("Investment {}", offer.product_name),
            now,
        )?;
        uow.insert_payment(contract_id, order_id, method, None, PaymentStatus::Success, None, now)?;
        uow.start_contract(contract_id, now + self.config.accrual_period())?;
        uow.append_event(
            SOURCE,
            now,
            &LedgerEvent::ContractCreated {
                contract_id,
                user_id: user.id,
                order_id: order_id.to_string(),
                amount: offer.amount,
                synchronous: true,
            },
        )?;
        let contract = uow.contract(contract_id)?;
        record_investment(uow, &self.config, &contract, now)?;
        uow.append_event(
            SOURCE,
            now,
            &LedgerEvent::ContractSettled {
                contract_id,
                order_id: order_id.to_string(),
                source: SettlementSource::Synchronous,
            },
        )?;
        log::info!("purchase {order_id}: promotor contract {contract_id} running");

        Ok(PurchaseReceipt {
            contract_id,
            order_id: order_id.to_string(),
            amount: offer.amount,
            product: offer.product_name.clone(),
            category: offer.category_name.clone(),
            category_id: offer.category_id,
            duration: offer.duration,
            daily_profit: offer.daily_profit,
            status: ContractStatus::Running,
            payment: None,
        })
    }

    // ── Administration ────────────────────────────────────────────

    /// Running → Suspended. A suspended contract accrues nothing.
    pub fn suspend_contract(&self, contract_id: ContractId) -> LedgerResult<()> {
        let now = self.clock.now();
        self.store.unit_of_work(|uow| {
            let c = uow.contract(contract_id)?;
            if !uow.transition_contract(contract_id, ContractStatus::Running, ContractStatus::Suspended)? {
                return Err(invalid_transition(&c, ContractStatus::Suspended));
            }
            uow.append_event(SOURCE, now, &LedgerEvent::ContractSuspended { contract_id })?;
            log::info!("contract {contract_id} suspended");
            Ok(())
        })
    }

    /// Suspended → Running. The next period is due one period from now.
    pub fn resume_contract(&self, contract_id: ContractId) -> LedgerResult<()> {
        let now = self.clock.now();
        self.store.unit_of_work(|uow| {
            let c = uow.contract(contract_id)?;
            if !uow.transition_contract(contract_id, ContractStatus::Suspended, ContractStatus::Running)? {
                return Err(invalid_transition(&c, ContractStatus::Running));
            }
            uow.set_next_accrual(contract_id, now + self.config.accrual_period())?;
            uow.append_event(SOURCE, now, &LedgerEvent::ContractResumed { contract_id })?;
            log::info!("contract {contract_id} resumed");
            Ok(())
        })
    }

    /// Settle a Pending contract by hand, for payments confirmed out of band.
    pub fn confirm_payment(&self, contract_id: ContractId) -> LedgerResult<bool> {
        let now = self.clock.now();
        self.store.unit_of_work(|uow| {
            let c = uow.contract(contract_id)?;
            settle_contract(uow, &self.config, &c.order_id, SettlementSource::Admin, now)
        })
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn active_contracts(&self, user_id: UserId) -> LedgerResult<Vec<ContractRow>> {
        self.store
            .read(|uow| uow.contracts_for_user(user_id, Some(ContractStatus::Running)))
    }

    pub fn contracts_for_user(&self, user_id: UserId) -> LedgerResult<Vec<ContractRow>> {
        self.store.read(|uow| uow.contracts_for_user(user_id, None))
    }

    pub fn contract(&self, contract_id: ContractId) -> LedgerResult<ContractRow> {
        self.store.read(|uow| uow.contract(contract_id))
    }

    pub fn contract_by_order(&self, order_id: &str) -> LedgerResult<ContractRow> {
        self.store.read(|uow| {
            uow.contract_by_order(order_id)?
                .ok_or_else(|| LedgerError::not_found("contract", order_id))
        })
    }
}

enum Staged {
    Settled(PurchaseReceipt),
    AwaitingPayment {
        contract_id: ContractId,
        offer: Offer,
        user_name: String,
        fallback_expiry: DateTime<Utc>,
    },
}

/// Product terms captured at purchase time.
struct Offer {
    product_id: ProductId,
    product_name: String,
    category_id: CategoryId,
    category_name: String,
    profit_type: ProfitType,
    amount: Money,
    daily_profit: Money,
    duration: u32,
}

impl Offer {
    fn new_contract(&self, user_id: UserId, order_id: &str) -> NewContract {
        NewContract {
            user_id,
            product_id: self.product_id,
            category_id: self.category_id,
            profit_type: self.profit_type,
            amount: self.amount,
            daily_profit: self.daily_profit,
            duration: self.duration,
            order_id: order_id.to_string(),
        }
    }
}

fn validate_purchase(
    uow: &UnitOfWork<'_>,
    user: &UserRow,
    product_id: ProductId,
) -> LedgerResult<Offer> {
    if user.status != AccountStatus::Active {
        return Err(LedgerError::AccountInactive { user_id: user.id });
    }
    let product = match uow.product(product_id) {
        Ok(p) => p,
        Err(LedgerError::NotFound { .. }) => {
            return Err(LedgerError::ProductInactive { product_id });
        }
        Err(e) => return Err(e),
    };
    let category = uow.category(product.category_id)?;
    if product.status != CatalogStatus::Active || category.status != CatalogStatus::Active {
        return Err(LedgerError::ProductInactive { product_id });
    }
    if user.vip_level < product.required_vip {
        return Err(LedgerError::VipLevelTooLow {
            required: product.required_vip,
            current: user.vip_level,
        });
    }
    if product.purchase_limit > 0
        && uow.count_paid_purchases(user.id, product_id)? >= product.purchase_limit
    {
        return Err(LedgerError::PurchaseLimitReached {
            product_id,
            limit: product.purchase_limit,
        });
    }
    Ok(Offer {
        product_id,
        product_name: product.name,
        category_id: category.id,
        category_name: category.name,
        profit_type: category.profit_type,
        amount: product.amount,
        daily_profit: product.daily_profit,
        duration: product.duration,
    })
}

fn invalid_transition(c: &ContractRow, to: ContractStatus) -> LedgerError {
    LedgerError::InvalidTransition {
        entity: "contract",
        key: c.id.to_string(),
        from: c.status.to_string(),
        to: to.to_string(),
    }
}

/// Add a now-running contract to the owner's totals and recompute VIP.
fn record_investment(
    uow: &UnitOfWork<'_>,
    config: &PlatformConfig,
    contract: &ContractRow,
    now: DateTime<Utc>,
) -> LedgerResult<UserRow> {
    let locked = contract.profit_type == ProfitType::Locked;
    uow.add_invested(contract.user_id, contract.amount, locked)?;
    let user = uow.lock_user(contract.user_id)?;
    if locked {
        let level = vip::level_for(user.total_invested_vip, &config.vip.thresholds);
        if level != user.vip_level {
            uow.set_vip_level(user.id, level)?;
            uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::VipLevelChanged {
                    user_id: user.id,
                    from: user.vip_level,
                    to: level,
                },
            )?;
            log::info!("user {}: VIP {} -> {level}", user.id, user.vip_level);
        }
    }
    Ok(user)
}

// ── Settlement (shared by webhook, inquiry and admin paths) ───────

/// Pending → Running for the contract with `order_id`.
///
/// Returns `Ok(false)` without touching anything when the order is unknown
/// or the contract already left Pending, so replays are no-ops.
pub fn settle_contract(
    uow: &UnitOfWork<'_>,
    config: &PlatformConfig,
    order_id: &str,
    source: SettlementSource,
    now: DateTime<Utc>,
) -> LedgerResult<bool> {
    let Some(contract) = uow.contract_by_order(order_id)? else {
        return Ok(false);
    };
    if contract.status != ContractStatus::Pending {
        return Ok(false);
    }
    uow.finish_payment(order_id, PaymentStatus::Success, now)?;
    uow.set_entry_status(order_id, EntryStatus::Success)?;
    if !uow.start_contract(contract.id, now + config.accrual_period())? {
        return Ok(false);
    }
    let investor = record_investment(uow, config, &contract, now)?;
    if !investor.is_promotor() {
        referral_subsystem::pay_referral_bonus(uow, &config.referral, &contract, &investor, now)?;
    }
    uow.append_event(
        SOURCE,
        now,
        &LedgerEvent::ContractSettled {
            contract_id: contract.id,
            order_id: order_id.to_string(),
            source,
        },
    )?;
    log::info!("contract {} settled via {source:?}", contract.id);
    Ok(true)
}

/// Pending → Cancelled, with the payment moved to `payment_status`
/// (Failed or Expired) and the purchase entry marked Failed. No balance
/// was held, so nothing is refunded. Returns false if already resolved.
pub fn cancel_pending_contract(
    uow: &UnitOfWork<'_>,
    order_id: &str,
    payment_status: PaymentStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> LedgerResult<bool> {
    let Some(contract) = uow.contract_by_order(order_id)? else {
        return Ok(false);
    };
    if contract.status != ContractStatus::Pending {
        return Ok(false);
    }
    uow.finish_payment(order_id, payment_status, now)?;
    uow.set_entry_status(order_id, EntryStatus::Failed)?;
    uow.transition_contract(contract.id, ContractStatus::Pending, ContractStatus::Cancelled)?;
    uow.append_event(
        SOURCE,
        now,
        &LedgerEvent::ContractCancelled {
            contract_id: contract.id,
            order_id: order_id.to_string(),
            reason: reason.to_string(),
        },
    )?;
    log::info!("contract {} cancelled: {reason}", contract.id);
    Ok(true)
}

/// Cancel the contract if its payment is Pending and past expiry.
pub fn expire_payment(uow: &UnitOfWork<'_>, order_id: &str, now: DateTime<Utc>) -> LedgerResult<bool> {
    let Some(payment) = uow.payment_by_order(order_id)? else {
        return Ok(false);
    };
    match payment.expires_at {
        Some(at) if payment.status == PaymentStatus::Pending && at < now => {
            cancel_pending_contract(uow, order_id, PaymentStatus::Expired, "payment expired", now)
        }
        _ => Ok(false),
    }
}
