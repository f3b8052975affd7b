pub mod checkout;
pub mod orders;
pub mod pricing;
pub mod settlement;
