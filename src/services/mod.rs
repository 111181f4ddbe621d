pub mod metrics;
pub mod notifier;
pub mod paymob;
pub mod reconciler;
pub mod repository;

pub use metrics::{get_metrics, init_metrics};
pub use notifier::{HttpNotifier, Notifier};
pub use paymob::{PaymentGateway, PaymobClient};
pub use reconciler::Reconciler;
pub use repository::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
