//! Balance transfer between two users: one `transfer` debit on the
//! sender and one `receive` credit on the receiver in a single unit of work.

use crate::{
    clock::Clock,
    config::PlatformConfig,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    ledger::apply_ledger_mutation,
    money::Money,
    order_id,
    store::LedgerStore,
    types::{AccountStatus, EntryKind, OrderId, UserId},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub order_id: OrderId,
    pub amount: Money,
    pub recipient: String,
    pub sender_balance: Money,
}

pub struct TransferSubsystem {
    store: LedgerStore,
    config: Arc<PlatformConfig>,
    clock: Arc<dyn Clock>,
}

impl TransferSubsystem {
    pub fn new(store: LedgerStore, config: Arc<PlatformConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn transfer(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        amount: Money,
    ) -> LedgerResult<TransferReceipt> {
        let cfg = &self.config.transfer;
        if amount < cfg.min_amount || amount > cfg.max_amount {
            return Err(LedgerError::AmountOutOfRange {
                amount,
                min: cfg.min_amount,
                max: cfg.max_amount,
            });
        }
        if sender_id == receiver_id {
            return Err(LedgerError::TransferNotAllowed {
                reason: "Cannot transfer to yourself",
            });
        }
        let now = self.clock.now();

        self.store.unit_of_work(|uow| {
            let sender = uow.lock_user(sender_id)?;
            let receiver = uow.lock_user(receiver_id)?;
            if sender.status != AccountStatus::Active {
                return Err(LedgerError::AccountInactive { user_id: sender_id });
            }
            if receiver.status != AccountStatus::Active {
                return Err(LedgerError::TransferNotAllowed {
                    reason: "Recipient account is not active",
                });
            }
            if sender.vip_level < cfg.required_vip_level {
                return Err(LedgerError::VipLevelTooLow {
                    required: cfg.required_vip_level,
                    current: sender.vip_level,
                });
            }
            if sender.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    available: sender.balance,
                    required: amount,
                });
            }

            let order_id = order_id::generate(order_id::TRANSFER_PREFIX);
            let (sender_balance, _) = apply_ledger_mutation(
                uow,
                sender_id,
                -amount,
                EntryKind::Transfer,
                &order_id,
                &format!("Transfer to {}", receiver.name),
                now,
            )?;
            apply_ledger_mutation(
                uow,
                receiver_id,
                amount,
                EntryKind::Receive,
                &order_id::transfer_receipt(&order_id),
                &format!("Transfer from {}", sender.name),
                now,
            )?;
            uow.append_event(
                "transfer",
                now,
                &LedgerEvent::BalanceTransferred {
                    sender_id,
                    receiver_id,
                    order_id: order_id.clone(),
                    amount,
                },
            )?;
            log::info!("transfer {order_id}: {amount} from user {sender_id} to user {receiver_id}");

            Ok(TransferReceipt {
                order_id,
                amount,
                recipient: receiver.name,
                sender_balance,
            })
        })
    }
}
