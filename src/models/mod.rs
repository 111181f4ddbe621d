pub mod credential;
pub mod order;
pub mod plan;
pub mod transaction;
pub mod wallet;

pub use credential::SavedCredential;
pub use order::{Order, OrderStatus};
pub use plan::{InstallmentPlan, PlanStatus};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
pub use wallet::{Wallet, WalletLedgerEntry};
