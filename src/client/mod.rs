//! Client side of checkout: the three-step flow a storefront UI drives, plus
//! HTTP implementations of its collaborators.

pub mod cart;
pub mod http;
pub mod orchestrator;

use thiserror::Error;

pub use cart::MemoryCart;
pub use http::{HttpCheckoutApi, StripeConfirmer};
pub use orchestrator::{
    CartStore, CheckoutApi, CheckoutFlow, ConfirmOutcome, FlowError, PaymentConfirmer, ResultKind,
    Step,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The server answered with an error body
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}
