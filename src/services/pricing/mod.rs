//! The pricing engine proper: pure discount evaluation, cart-time
//! orchestration, the order-validation trust boundary, usage-limit
//! enforcement, and tax calculation.

pub mod cart;
pub mod evaluator;
pub mod orchestrator;
pub mod tax;
pub mod usage;
pub mod validation;

pub use cart::{
    CartLine, CartSnapshot, CustomerContext, EvaluationResult, LineAdjustment,
};
pub use evaluator::evaluate;
pub use orchestrator::{
    AppliedPromotion, AutomaticApplication, CartPricingService, DiscountTotals,
};
pub use tax::{TaxAddress, TaxResult, TaxService};
pub use usage::MemoryUsageLedger;
pub use validation::{
    OrderValidationService, SubmittedLine, SubmittedOrder, VerifiedItem, VerifiedOrder,
};
