//! Sales orders domain module (event-sourced) with price recomputation.
//!
//! Business rules for sales orders and the "recompute price" action,
//! implemented as deterministic domain logic. Persistence is reached only
//! through the [`SalesOrderStore`] trait.

pub mod order;
pub mod recompute;
pub mod session;
pub mod store;
pub mod wizard;

pub use order::{
    AddLine, CancelOrder, ConfirmOrder, CreateSalesOrder, LineAdded, LineKind, LinesRepriced,
    OrderCancelled, OrderConfirmed, OrderLine, OrderQuoted, OrderReturnedToDraft, PriceWrite,
    Quote, RepriceLines, ReturnToDraft, SalesOrder, SalesOrderCommand, SalesOrderCreated,
    SalesOrderEvent, SalesOrderId, SalesOrderStatus,
};
pub use recompute::{PriceRecompute, RecomputeMethod};
pub use session::{PendingRecompute, RecomputePriceAction};
pub use store::{InMemorySalesOrderStore, SalesOrderStore, StreamAppend};
pub use wizard::{
    RecomputeMethodKind, RecomputePriceStart, RecomputePriceWizard, SessionContext, StartField,
    WizardState,
};
