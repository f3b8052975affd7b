use super::ClientError;
use crate::services::{
    checkout::{CheckoutCustomerInfo, CheckoutRequest, CheckoutSession},
    pricing::LineRequest,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};
use validator::Validate;

/// Server-side checkout initialization
#[async_trait]
pub trait CheckoutApi: Send + Sync {
    async fn init_checkout(&self, request: &CheckoutRequest)
        -> Result<CheckoutSession, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Succeeded,
    /// Declined or otherwise failed; the message comes from the processor
    Failed(String),
    /// Still in flight or needs further action; the webhook decides the final state
    Processing,
}

/// Confirms a payment intent with the processor from the client side
#[async_trait]
pub trait PaymentConfirmer: Send + Sync {
    async fn confirm(
        &self,
        client_secret: &str,
        payment_method: &str,
    ) -> Result<ConfirmOutcome, ClientError>;
}

/// Locally persisted cart
pub trait CartStore: Send + Sync {
    fn items(&self) -> Vec<LineRequest>;
    fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Succeeded,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Shipping,
    Payment,
    Result(ResultKind),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("a checkout request is already in flight")]
    Busy,
    #[error("action not available in step {actual:?}")]
    WrongStep { actual: Step },
    #[error("{0}")]
    InvalidForm(String),
    #[error("cart is empty")]
    EmptyCart,
    #[error("could not start checkout: {0}")]
    Checkout(ClientError),
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("payment confirmation failed: {0}")]
    Confirmation(ClientError),
}

#[derive(Debug, Clone)]
struct FlowState {
    step: Step,
    form: Option<CheckoutCustomerInfo>,
    session: Option<CheckoutSession>,
    error: Option<String>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            step: Step::Shipping,
            form: None,
            session: None,
            error: None,
        }
    }
}

/// Clears the in-flight flag when a call finishes or its future is dropped
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shipping → Payment → Result.
///
/// Each call fails fast with [`FlowError::Busy`] while another is awaiting the
/// server or the processor. Nothing here cancels server-side state; an
/// abandoned flow leaves its order pending.
pub struct CheckoutFlow<A, P, C> {
    api: A,
    confirmer: P,
    cart: C,
    loading: AtomicBool,
    state: Mutex<FlowState>,
}

impl<A, P, C> CheckoutFlow<A, P, C>
where
    A: CheckoutApi,
    P: PaymentConfirmer,
    C: CartStore,
{
    pub fn new(api: A, confirmer: P, cart: C) -> Self {
        Self {
            api,
            confirmer,
            cart,
            loading: AtomicBool::new(false),
            state: Mutex::new(FlowState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FlowState> {
        // State is plain data; a panic elsewhere cannot leave it half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, expected: Step) -> Result<LoadingGuard<'_>, FlowError> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FlowError::Busy);
        }
        let guard = LoadingGuard(&self.loading);

        let actual = self.state().step;
        if actual != expected {
            return Err(FlowError::WrongStep { actual });
        }
        Ok(guard)
    }

    pub fn step(&self) -> Step {
        self.state().step
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Last user-facing error, cleared on the next successful transition
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Shipping details as last submitted
    pub fn form(&self) -> Option<CheckoutCustomerInfo> {
        self.state().form.clone()
    }

    pub fn session(&self) -> Option<CheckoutSession> {
        self.state().session.clone()
    }

    fn fail(&self, err: FlowError) -> FlowError {
        let message = match &err {
            FlowError::Checkout(ClientError::Api { message, .. }) => message.clone(),
            FlowError::PaymentFailed(message) => message.clone(),
            other => other.to_string(),
        };
        self.state().error = Some(message);
        err
    }

    /// Validates the form and starts checkout on the server
    pub async fn submit_shipping(&self, form: CheckoutCustomerInfo) -> Result<(), FlowError> {
        let _guard = self.begin(Step::Shipping)?;
        self.state().form = Some(form.clone());

        if let Err(e) = form.validate() {
            return Err(self.fail(FlowError::InvalidForm(e.to_string())));
        }

        let items = self.cart.items();
        if items.is_empty() {
            return Err(self.fail(FlowError::EmptyCart));
        }

        let request = CheckoutRequest {
            customer: form,
            items,
        };
        match self.api.init_checkout(&request).await {
            Ok(session) => {
                debug!(order_id = %session.order_id, "checkout started");
                let mut state = self.state();
                state.session = Some(session);
                state.step = Step::Payment;
                state.error = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "checkout initialization failed");
                Err(self.fail(FlowError::Checkout(e)))
            }
        }
    }

    /// Confirms the intent; a failure keeps the flow in Payment for a retry
    pub async fn confirm_payment(&self, payment_method: &str) -> Result<ResultKind, FlowError> {
        let _guard = self.begin(Step::Payment)?;
        let client_secret = match self.state().session.as_ref() {
            Some(session) => session.client_secret.clone(),
            None => return Err(FlowError::WrongStep { actual: Step::Payment }),
        };

        match self.confirmer.confirm(&client_secret, payment_method).await {
            Ok(ConfirmOutcome::Succeeded) => {
                self.cart.clear();
                self.finish(ResultKind::Succeeded);
                Ok(ResultKind::Succeeded)
            }
            Ok(ConfirmOutcome::Processing) => {
                self.finish(ResultKind::Processing);
                Ok(ResultKind::Processing)
            }
            Ok(ConfirmOutcome::Failed(message)) => Err(self.fail(FlowError::PaymentFailed(message))),
            Err(e) => Err(self.fail(FlowError::Confirmation(e))),
        }
    }

    fn finish(&self, kind: ResultKind) {
        let mut state = self.state();
        state.step = Step::Result(kind);
        state.error = None;
    }

    /// Drops everything and returns to the shipping step
    pub fn start_over(&self) -> Result<(), FlowError> {
        if self.is_loading() {
            return Err(FlowError::Busy);
        }
        *self.state() = FlowState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryCart;
    use crate::services::checkout::Address;
    use crate::services::pricing::ShippingTier;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::Notify;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeApi {
        calls: AtomicUsize,
        fail_with: Option<ClientError>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl CheckoutApi for FakeApi {
        async fn init_checkout(
            &self,
            _request: &CheckoutRequest,
        ) -> Result<CheckoutSession, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            Ok(CheckoutSession {
                client_secret: "pi_1_secret_abc".into(),
                order_id: Uuid::new_v4(),
                amount: dec!(95),
                currency: "usd".into(),
                subtotal: dec!(80),
                shipping: dec!(15),
                expires_at: Utc::now(),
            })
        }
    }

    struct FakeConfirmer {
        outcomes: Mutex<Vec<Result<ConfirmOutcome, ClientError>>>,
    }

    impl FakeConfirmer {
        fn new(mut outcomes: Vec<Result<ConfirmOutcome, ClientError>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl PaymentConfirmer for FakeConfirmer {
        async fn confirm(
            &self,
            client_secret: &str,
            _payment_method: &str,
        ) -> Result<ConfirmOutcome, ClientError> {
            assert_eq!(client_secret, "pi_1_secret_abc");
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(ConfirmOutcome::Succeeded))
        }
    }

    fn form() -> CheckoutCustomerInfo {
        CheckoutCustomerInfo {
            full_name: "Ana Ruiz".into(),
            email: "ana@example.com".into(),
            phone: "+51 999 000 111".into(),
            address: Address {
                country: "PE".into(),
                city: "Lima".into(),
                address_line1: "Av. Larco 123".into(),
                address_line2: None,
                postal_code: None,
            },
            shipping_type: ShippingTier::Normal,
        }
    }

    fn cart() -> MemoryCart {
        let cart = MemoryCart::new();
        cart.add(Uuid::new_v4(), 1);
        cart
    }

    fn flow(
        api: FakeApi,
        confirmer: FakeConfirmer,
    ) -> CheckoutFlow<FakeApi, FakeConfirmer, MemoryCart> {
        CheckoutFlow::new(api, confirmer, cart())
    }

    #[tokio::test]
    async fn happy_path_clears_cart() {
        let flow = flow(FakeApi::default(), FakeConfirmer::new(vec![]));
        flow.submit_shipping(form()).await.unwrap();
        assert_eq!(flow.step(), Step::Payment);
        assert!(flow.session().is_some());

        let kind = flow.confirm_payment("pm_card_visa").await.unwrap();
        assert_eq!(kind, ResultKind::Succeeded);
        assert_eq!(flow.step(), Step::Result(ResultKind::Succeeded));
        assert!(flow.cart.items().is_empty());
    }

    #[tokio::test]
    async fn checkout_failure_stays_on_shipping_and_keeps_form() {
        let api = FakeApi {
            fail_with: Some(ClientError::Api {
                status: 404,
                message: "a product in your cart is no longer available".into(),
            }),
            ..Default::default()
        };
        let flow = flow(api, FakeConfirmer::new(vec![]));

        let err = flow.submit_shipping(form()).await.unwrap_err();
        assert_matches!(err, FlowError::Checkout(_));
        assert_eq!(flow.step(), Step::Shipping);
        assert_eq!(flow.form().unwrap().full_name, "Ana Ruiz");
        assert_eq!(
            flow.error().as_deref(),
            Some("a product in your cart is no longer available")
        );
        assert!(!flow.is_loading());
    }

    #[tokio::test]
    async fn invalid_form_never_reaches_server() {
        let flow = flow(FakeApi::default(), FakeConfirmer::new(vec![]));
        let mut bad = form();
        bad.email = "nope".into();

        assert_matches!(flow.submit_shipping(bad).await, Err(FlowError::InvalidForm(_)));
        assert_eq!(flow.api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(flow.step(), Step::Shipping);
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let flow = CheckoutFlow::new(
            FakeApi::default(),
            FakeConfirmer::new(vec![]),
            MemoryCart::new(),
        );
        assert_matches!(flow.submit_shipping(form()).await, Err(FlowError::EmptyCart));
    }

    #[tokio::test]
    async fn declined_payment_allows_retry() {
        let confirmer = FakeConfirmer::new(vec![
            Ok(ConfirmOutcome::Failed("Your card was declined.".into())),
            Ok(ConfirmOutcome::Succeeded),
        ]);
        let flow = flow(FakeApi::default(), confirmer);
        flow.submit_shipping(form()).await.unwrap();

        let err = flow.confirm_payment("pm_card_declined").await.unwrap_err();
        assert_eq!(err, FlowError::PaymentFailed("Your card was declined.".into()));
        assert_eq!(flow.step(), Step::Payment);
        assert_eq!(flow.error().as_deref(), Some("Your card was declined."));
        assert!(!flow.cart.items().is_empty());

        flow.confirm_payment("pm_card_visa").await.unwrap();
        assert_eq!(flow.step(), Step::Result(ResultKind::Succeeded));
        assert!(flow.error().is_none());
    }

    #[tokio::test]
    async fn processing_keeps_cart() {
        let confirmer = FakeConfirmer::new(vec![Ok(ConfirmOutcome::Processing)]);
        let flow = flow(FakeApi::default(), confirmer);
        flow.submit_shipping(form()).await.unwrap();

        assert_eq!(
            flow.confirm_payment("pm_sepa").await.unwrap(),
            ResultKind::Processing
        );
        assert_eq!(flow.step(), Step::Result(ResultKind::Processing));
        assert!(!flow.cart.items().is_empty());
    }

    #[tokio::test]
    async fn wrong_step_and_start_over() {
        let flow = flow(FakeApi::default(), FakeConfirmer::new(vec![]));
        assert_matches!(
            flow.confirm_payment("pm").await,
            Err(FlowError::WrongStep {
                actual: Step::Shipping
            })
        );

        flow.submit_shipping(form()).await.unwrap();
        flow.confirm_payment("pm").await.unwrap();
        assert_matches!(
            flow.submit_shipping(form()).await,
            Err(FlowError::WrongStep { .. })
        );

        flow.start_over().unwrap();
        assert_eq!(flow.step(), Step::Shipping);
        assert!(flow.session().is_none());
        assert!(flow.form().is_none());
    }

    #[tokio::test]
    async fn second_submit_while_loading_is_busy() {
        let gate = Arc::new(Notify::new());
        let api = FakeApi {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let flow = flow(api, FakeConfirmer::new(vec![]));

        let first = flow.submit_shipping(form());
        let second = async {
            tokio::task::yield_now().await;
            assert!(flow.is_loading());
            let result = flow.submit_shipping(form()).await;
            assert!(flow.start_over().is_err());
            gate.notify_one();
            result
        };

        let (first, second) = tokio::join!(first, second);
        first.unwrap();
        assert_eq!(second, Err(FlowError::Busy));
        assert_eq!(flow.api.calls.load(Ordering::SeqCst), 1);
        assert!(!flow.is_loading());
    }
}
