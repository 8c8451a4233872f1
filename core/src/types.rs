//! Shared primitive types used across the ledger.

use serde::{Deserialize, Serialize};

/// A platform user (balance holder).
pub type UserId = i64;

/// Row identifiers for catalog and ledger tables.
pub type ProductId = i64;
pub type CategoryId = i64;
pub type ContractId = i64;
pub type WithdrawalId = i64;
pub type BankAccountId = i64;
pub type BankId = i64;

/// A globally unique order identifier. Doubles as the idempotency key
/// for ledger entries and as the gateway's partner reference.
pub type OrderId = String;

/// Declares a closed set of states stored as TEXT.
///
/// Each variant maps to one lowercase label used in SQL, JSON and logs.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{other}'", stringify!($name))),
                }
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| rusqlite::types::FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(
    /// Real customers settle through the gateway; promotor (internal/test)
    /// accounts settle synchronously against their balance.
    UserMode { Real => "real", Promotor => "promotor" }
);

text_enum!(AccountStatus { Active => "active", Inactive => "inactive", Suspended => "suspended" });

text_enum!(CatalogStatus { Active => "active", Inactive => "inactive" });

text_enum!(
    /// Category-level accrual policy.
    ProfitType { Locked => "locked", Unlocked => "unlocked" }
);

text_enum!(ContractStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Suspended => "suspended",
    Cancelled => "cancelled",
});

text_enum!(PaymentStatus {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
    Expired => "expired",
});

text_enum!(PaymentMethod { Qris => "qris", Bank => "bank" });

text_enum!(WithdrawalStatus { Pending => "pending", Success => "success", Failed => "failed" });

text_enum!(
    /// Where the withdrawal's gateway payout stands. Independent of the
    /// withdrawal status, which only the webhook or an admin finalises.
    PayoutState {
        NotSent => "not_sent",
        Dispatched => "dispatched",
        GatewayFailed => "gateway_failed",
    }
);

text_enum!(BankKind { Bank => "bank", Ewallet => "ewallet" });

text_enum!(
    /// Direction of a ledger entry relative to the user's platform balance.
    Flow { Inbound => "in", Outbound => "out" }
);

text_enum!(EntryKind {
    Investment => "investment",
    Return => "return",
    CapitalReturn => "capital_return",
    Withdrawal => "withdrawal",
    TeamBonus => "team_bonus",
    Transfer => "transfer",
    Receive => "receive",
    Refund => "refund",
});

text_enum!(EntryStatus { Pending => "pending", Success => "success", Failed => "failed" });

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}
