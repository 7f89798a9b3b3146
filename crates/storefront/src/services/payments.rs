//! Payment reconciler.
//!
//! Card payments settle through two paths that race freely: the customer's
//! synchronous confirmation call and the gateway's webhook, which may be
//! delivered more than once. Both funnel into one idempotent apply step, and
//! the repository's compare-and-set on `is_paid` decides the single winner.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use guardline_core::{Actor, CurrencyCode, Money, OrderId, OrderStatus, PaymentMethod};

use super::notifications::{NotificationDispatcher, OrderEvent};
use crate::db::OrderRepository;
use crate::error::{AppError, ConflictKind, Result};
use crate::gateway::{
    CreateIntent, EventKind, GatewayError, IntentStatus, PaymentGateway, PaymentIntent,
    WebhookEvent,
};
use crate::models::{Order, PaymentResult, TransitionError};

/// Attempts at the payment compare-and-set before giving up.
const MAX_APPLY_ATTEMPTS: usize = 3;

/// What the client needs to complete a card payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSession {
    pub order_id: OrderId,
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
}

/// Result of handling one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "order_id", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Payment recorded by this delivery.
    Applied(OrderId),
    /// Payment had already been recorded.
    AlreadyPaid(OrderId),
    /// Gateway reported a failed attempt; nothing changed.
    PaymentFailed(OrderId),
    /// Payment cannot be applied (amount mismatch, cancelled order); logged
    /// for manual follow-up.
    Rejected(OrderId),
    /// Event type not handled, or no matching order.
    Ignored,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    orders: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    currency: CurrencyCode,
    timeout: Duration,
    notifications: NotificationDispatcher,
}

impl PaymentReconciler {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        currency: CurrencyCode,
        timeout: Duration,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            orders,
            gateway,
            currency,
            timeout,
            notifications,
        }
    }

    /// Bound a gateway call by the configured timeout.
    async fn call_gateway<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, GatewayError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::Timeout.into()),
        }
    }

    async fn load(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {id}")))
    }

    fn total_minor(order: &Order) -> Result<i64> {
        order.totals.total_price.to_minor_units().ok_or_else(|| {
            AppError::Internal(format!(
                "order {} total does not fit in minor units",
                order.id
            ))
        })
    }

    /// Create (or reuse) the gateway intent for a card order.
    ///
    /// Stock is never touched here; a gateway failure leaves the order
    /// pending and the call can be retried.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `Unauthorized` for a missing or foreign order
    /// - `Validation` for a cash-on-delivery order
    /// - `Conflict` if the order is already paid or no longer pending
    /// - `ExternalService` if the gateway fails or times out
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub async fn start_payment(&self, order_id: OrderId, actor: &Actor) -> Result<PaymentSession> {
        let order = self.load(order_id).await?;
        if !order.is_visible_to(actor) {
            return Err(AppError::Unauthorized(format!(
                "order {order_id} belongs to another customer"
            )));
        }
        if order.is_paid {
            return Err(ConflictKind::AlreadyPaid.into());
        }
        if !order.payment_method.uses_gateway() {
            return Err(AppError::Validation(
                "order is paid on delivery".to_string(),
            ));
        }
        if order.status != OrderStatus::Pending {
            return Err(ConflictKind::OrderNotPayable {
                status: order.status,
            }
            .into());
        }
        let amount_minor = Self::total_minor(&order)?;

        if let Some(existing) = order.payment_intent_id.as_deref() {
            let intent = self.call_gateway(self.gateway.retrieve_intent(existing)).await?;
            if intent.status.is_open() && intent.amount == amount_minor {
                debug!(intent_id = %intent.id, "Reusing open payment intent");
                return Ok(self.session(order_id, intent));
            }
        }

        let request = CreateIntent {
            amount_minor,
            currency: self.currency,
            order_id,
            order_number: order.order_number.clone(),
        };
        let intent = self.call_gateway(self.gateway.create_intent(&request)).await?;
        self.orders.set_payment_intent(order_id, &intent.id).await?;

        info!(intent_id = %intent.id, amount_minor, "Payment intent created");
        Ok(self.session(order_id, intent))
    }

    fn session(&self, order_id: OrderId, intent: PaymentIntent) -> PaymentSession {
        PaymentSession {
            order_id,
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount_minor: intent.amount,
            currency: self.currency,
        }
    }

    /// Confirm a card payment on the customer's return from the gateway.
    ///
    /// Returns the order unchanged if it is already paid.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `Unauthorized` for a missing or foreign order
    /// - `Validation` if the intent belongs to another order
    /// - `Conflict` if the payment has not completed, the amount does not
    ///   match, or the order can no longer be paid
    /// - `ExternalService` if the gateway fails or times out
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub async fn confirm_synchronously(
        &self,
        order_id: OrderId,
        payment_intent_id: &str,
        actor: &Actor,
    ) -> Result<Order> {
        let order = self.load(order_id).await?;
        if !order.is_visible_to(actor) {
            return Err(AppError::Unauthorized(format!(
                "order {order_id} belongs to another customer"
            )));
        }
        if order.is_paid {
            debug!("Order already paid");
            return Ok(order);
        }
        if order
            .payment_intent_id
            .as_deref()
            .is_some_and(|known| known != payment_intent_id)
        {
            return Err(AppError::Validation(
                "payment intent does not belong to this order".to_string(),
            ));
        }

        let intent = self
            .call_gateway(self.gateway.retrieve_intent(payment_intent_id))
            .await?;
        if intent.order_id() != Some(order_id) {
            return Err(AppError::Validation(
                "payment intent does not belong to this order".to_string(),
            ));
        }
        if intent.status != IntentStatus::Succeeded {
            return Err(ConflictKind::PaymentNotCompleted.into());
        }

        let (order, _) = self.apply_success(order, &intent).await?;
        Ok(order)
    }

    /// Authenticate a raw webhook delivery and apply it.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a bad signature or payload, and `Database`
    /// if the order store fails (the gateway will redeliver).
    pub async fn handle_webhook(&self, payload: &str, signature: &str) -> Result<WebhookOutcome> {
        let event = self
            .gateway
            .verify_webhook(payload, signature)
            .map_err(|e| match e {
                GatewayError::InvalidSignature(_) | GatewayError::InvalidPayload(_) => {
                    warn!(error = %e, "Rejected webhook delivery");
                    AppError::Validation(e.to_string())
                }
                other => AppError::ExternalService(other),
            })?;
        self.apply_webhook_event(&event).await
    }

    /// Apply a verified gateway event. Safe to call any number of times for
    /// the same event.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the order store fails.
    #[instrument(skip(self, event), fields(event_id = %event.id, kind = %event.kind))]
    pub async fn apply_webhook_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let kind = event.event_kind();
        if kind == EventKind::Other {
            debug!("Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        let intent = event.intent();
        let Some(order) = self.find_order(intent).await? else {
            warn!(intent_id = %intent.id, "Webhook for unknown order");
            return Ok(WebhookOutcome::Ignored);
        };

        match kind {
            EventKind::PaymentFailed => {
                let (code, message) = intent
                    .last_payment_error
                    .as_ref()
                    .map_or((None, None), |e| (e.code.as_deref(), e.message.as_deref()));
                warn!(
                    order_id = %order.id,
                    intent_id = %intent.id,
                    code = code.unwrap_or("unknown"),
                    message = message.unwrap_or(""),
                    "Payment attempt failed"
                );
                Ok(WebhookOutcome::PaymentFailed(order.id))
            }
            EventKind::PaymentSucceeded => {
                let id = order.id;
                if order.is_paid {
                    debug!(order_id = %id, "Duplicate payment delivery");
                    return Ok(WebhookOutcome::AlreadyPaid(id));
                }
                match self.apply_success(order, intent).await {
                    Ok((_, true)) => Ok(WebhookOutcome::Applied(id)),
                    Ok((_, false)) => Ok(WebhookOutcome::AlreadyPaid(id)),
                    Err(AppError::Conflict(_)) => Ok(WebhookOutcome::Rejected(id)),
                    Err(e) => Err(e),
                }
            }
            EventKind::Other => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn find_order(&self, intent: &PaymentIntent) -> Result<Option<Order>> {
        if let Some(id) = intent.order_id()
            && let Some(order) = self.orders.get(id).await?
        {
            return Ok(Some(order));
        }
        Ok(self.orders.find_by_payment_intent(&intent.id).await?)
    }

    /// Record a succeeded intent on the order, exactly once.
    async fn apply_success(&self, order: Order, intent: &PaymentIntent) -> Result<(Order, bool)> {
        let expected = Self::total_minor(&order)?;
        let received = intent.collected_amount();
        if received != expected {
            error!(
                order_id = %order.id,
                intent_id = %intent.id,
                expected,
                received,
                "Payment amount does not match order total"
            );
            return Err(ConflictKind::PaymentAmountMismatch {
                expected: order.totals.total_price,
                received: Money::from_cents(received),
            }
            .into());
        }

        let intent_id = intent.id.clone();
        let status = intent.status.as_str();
        self.record(order, &Actor::System, |now| PaymentResult {
            gateway_id: intent_id.clone(),
            status: status.to_string(),
            amount_minor: received,
            recorded_at: now,
        })
        .await
    }

    /// Plan and persist a first payment, retrying the compare-and-set
    /// against fresh state when a concurrent writer gets there first.
    ///
    /// Returns the current order and whether this call recorded the payment.
    async fn record(
        &self,
        mut order: Order,
        actor: &Actor,
        result: impl Fn(chrono::DateTime<Utc>) -> PaymentResult,
    ) -> Result<(Order, bool)> {
        for _ in 0..MAX_APPLY_ATTEMPTS {
            let now = Utc::now();
            let change = match order.plan_payment(result(now), actor.clone(), now) {
                Ok(change) => change,
                Err(TransitionError::AlreadyPaid) => return Ok((order, false)),
                Err(TransitionError::Illegal { from, .. }) => {
                    error!(
                        order_id = %order.id,
                        status = %from,
                        amount = %order.totals.total_price,
                        "Payment received for an order that cannot be paid, refund required"
                    );
                    return Err(ConflictKind::OrderNotPayable { status: from }.into());
                }
                Err(e) => return Err(e.into()),
            };

            if self.orders.record_payment(order.id, &change).await? {
                order.apply_payment(change);
                info!(
                    order_id = %order.id,
                    amount = %order.totals.total_price,
                    "Payment recorded"
                );
                self.notifications.dispatch(OrderEvent::paid(&order));
                return Ok((order, true));
            }

            // Someone else paid or moved the order; re-plan against fresh state.
            order = self.load(order.id).await?;
        }

        warn!(order_id = %order.id, "Payment kept losing to concurrent updates");
        Err(ConflictKind::ConcurrentUpdate.into())
    }

    /// Record cash collected by the carrier for a cash-on-delivery order.
    ///
    /// Returns the order unchanged if it is already paid.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` unless the actor is staff or the system
    /// - `NotFound` if the order does not exist
    /// - `Validation` for a card order
    /// - `Conflict` if the order was cancelled or refunded
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub async fn record_cash_payment(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        if !actor.is_privileged() {
            return Err(AppError::Unauthorized(
                "only staff can record cash payments".to_string(),
            ));
        }
        let order = self.load(order_id).await?;
        if order.payment_method != PaymentMethod::CashOnDelivery {
            return Err(AppError::Validation(
                "card orders are paid through the gateway".to_string(),
            ));
        }
        if order.is_paid {
            return Ok(order);
        }

        let amount_minor = Self::total_minor(&order)?;
        let (order, _) = self
            .record(order, actor, |now| PaymentResult {
                gateway_id: format!("cash-{order_id}"),
                status: "collected".to_string(),
                amount_minor,
                recorded_at: now,
            })
            .await?;
        Ok(order)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use guardline_core::{AdminId, Owner, UserId};

    use super::*;
    use crate::services::CheckoutRequest;
    use crate::testing::{TestHarness, product, shipping};

    fn customer() -> Owner {
        Owner::User(UserId::new(11))
    }

    async fn placed_order(h: &TestHarness, method: PaymentMethod) -> Order {
        h.store.put_product(product(1, 10, 2500)).await;
        h.put_cart(&customer(), &[(1, 2)]).await;
        h.services
            .orders
            .create_order(
                &customer(),
                CheckoutRequest {
                    shipping: shipping(),
                    payment_method: method,
                    coupon_code: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_payment_reuses_open_intent() {
        let h = TestHarness::new();
        let order = placed_order(&h, PaymentMethod::Card).await;
        let actor = Actor::Customer(customer());

        let first = h.services.payments.start_payment(order.id, &actor).await.unwrap();
        let second = h.services.payments.start_payment(order.id, &actor).await.unwrap();

        assert_eq!(first.payment_intent_id, second.payment_intent_id);
        assert_eq!(first.amount_minor, order.totals.total_price.to_minor_units().unwrap());
        assert_eq!(h.gateway.created_count(), 1);
    }

    #[tokio::test]
    async fn test_start_payment_cash_on_delivery() {
        let h = TestHarness::new();
        let order = placed_order(&h, PaymentMethod::CashOnDelivery).await;

        let err = h
            .services
            .payments
            .start_payment(order.id, &Actor::Customer(customer()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_gateway_timeout_leaves_stock_alone() {
        let h = TestHarness::with_gateway_timeout(Duration::from_millis(20));
        let order = placed_order(&h, PaymentMethod::Card).await;
        h.gateway.set_delay(Duration::from_millis(500));

        let err = h
            .services
            .payments
            .start_payment(order.id, &Actor::Customer(customer()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalService(GatewayError::Timeout)));

        let p = h.store.product(guardline_core::ProductId::new(1)).await.unwrap();
        assert_eq!(p.stock, 8);
    }

    #[tokio::test]
    async fn test_confirm_requires_succeeded_intent() {
        let h = TestHarness::new();
        let order = placed_order(&h, PaymentMethod::Card).await;
        let actor = Actor::Customer(customer());
        let session = h.services.payments.start_payment(order.id, &actor).await.unwrap();

        let err = h
            .services
            .payments
            .confirm_synchronously(order.id, &session.payment_intent_id, &actor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Conflict(ConflictKind::PaymentNotCompleted)
        ));
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_rejected() {
        let h = TestHarness::new();
        let order = placed_order(&h, PaymentMethod::Card).await;
        let actor = Actor::Customer(customer());
        let session = h.services.payments.start_payment(order.id, &actor).await.unwrap();
        h.gateway.succeed_with_amount(&session.payment_intent_id, 100);

        let err = h
            .services
            .payments
            .confirm_synchronously(order.id, &session.payment_intent_id, &actor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Conflict(ConflictKind::PaymentAmountMismatch { .. })
        ));
        let stored = h.services.orders.get_order(order.id, &actor).await.unwrap();
        assert!(!stored.is_paid);
    }

    #[tokio::test]
    async fn test_declined_webhook_changes_nothing() {
        let h = TestHarness::new();
        let order = placed_order(&h, PaymentMethod::Card).await;
        let actor = Actor::Customer(customer());
        let session = h.services.payments.start_payment(order.id, &actor).await.unwrap();
        h.gateway.decline(&session.payment_intent_id);

        let (payload, signature) = h.gateway.webhook(
            "evt_1",
            "payment_intent.payment_failed",
            &session.payment_intent_id,
        );
        let outcome = h
            .services
            .payments
            .handle_webhook(&payload, &signature)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::PaymentFailed(order.id));

        let stored = h.services.orders.get_order(order.id, &actor).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.status_history.len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature() {
        let h = TestHarness::new();
        let err = h
            .services
            .payments
            .handle_webhook(r#"{"id":"evt_x"}"#, "t=1,v1=00")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_payment_for_cancelled_order_is_rejected() {
        let h = TestHarness::new();
        let order = placed_order(&h, PaymentMethod::Card).await;
        let actor = Actor::Customer(customer());
        let session = h.services.payments.start_payment(order.id, &actor).await.unwrap();
        h.services.orders.cancel(order.id, &actor, None).await.unwrap();
        h.gateway.succeed(&session.payment_intent_id);

        let (payload, signature) = h.gateway.webhook(
            "evt_2",
            "payment_intent.succeeded",
            &session.payment_intent_id,
        );
        let outcome = h
            .services
            .payments
            .handle_webhook(&payload, &signature)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Rejected(order.id));
    }

    #[tokio::test]
    async fn test_record_cash_payment() {
        let h = TestHarness::new();
        let order = placed_order(&h, PaymentMethod::CashOnDelivery).await;

        let err = h
            .services
            .payments
            .record_cash_payment(order.id, &Actor::Customer(customer()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let admin = Actor::Admin(AdminId::new(1));
        let paid = h
            .services
            .payments
            .record_cash_payment(order.id, &admin)
            .await
            .unwrap();
        assert!(paid.is_paid);
        assert_eq!(paid.status, OrderStatus::Confirmed);

        let again = h
            .services
            .payments
            .record_cash_payment(order.id, &admin)
            .await
            .unwrap();
        assert_eq!(again.status_history.len(), paid.status_history.len());
    }
}
