//! Test support: a scriptable payment gateway, a recording notifier and
//! fixtures for wiring the services over [`MemoryStore`].

#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use guardline_core::{
    CouponId, CurrencyCode, DiscountKind, LineQuantity, Money, Owner, ProductId, ProductStatus,
    ShippingInfo,
};

use crate::config::StoreConfig;
use crate::db::{CartRepository, MemoryStore, Repositories};
use crate::gateway::{
    CreateIntent, GatewayError, IntentStatus, PaymentError, PaymentGateway, PaymentIntent,
    WebhookEvent, sign_payload, verify_signature,
};
use crate::models::{Cart, Coupon, PricingRules, Product};
use crate::services::{Notifier, NotifyError, OrderEvent, Services};
use crate::state::AppState;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Gateway
// =============================================================================

/// In-process payment gateway with the same signature scheme as the real one.
#[derive(Default)]
pub struct FakeGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    created: Mutex<u32>,
    delay: Mutex<Option<Duration>>,
}

impl FakeGateway {
    /// Secret used to sign and verify webhook payloads.
    pub const WEBHOOK_SECRET: &'static str = "whsec_t3stQ9vLx2KmP7rZ";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of intents created so far.
    #[must_use]
    pub fn created_count(&self) -> u32 {
        *lock(&self.created)
    }

    /// Make every gateway call take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Look up an intent.
    #[must_use]
    pub fn intent(&self, id: &str) -> Option<PaymentIntent> {
        lock(&self.intents).get(id).cloned()
    }

    /// Mark an intent as paid in full.
    pub fn succeed(&self, id: &str) {
        if let Some(intent) = lock(&self.intents).get_mut(id) {
            intent.status = IntentStatus::Succeeded;
            intent.amount_received = Some(intent.amount);
        }
    }

    /// Mark an intent as paid with a specific collected amount.
    pub fn succeed_with_amount(&self, id: &str, amount_minor: i64) {
        if let Some(intent) = lock(&self.intents).get_mut(id) {
            intent.status = IntentStatus::Succeeded;
            intent.amount_received = Some(amount_minor);
        }
    }

    /// Record a declined attempt on an intent.
    pub fn decline(&self, id: &str) {
        if let Some(intent) = lock(&self.intents).get_mut(id) {
            intent.status = IntentStatus::RequiresPaymentMethod;
            intent.last_payment_error = Some(PaymentError {
                code: Some("card_declined".to_string()),
                message: Some("Your card was declined.".to_string()),
            });
        }
    }

    /// Build a signed webhook delivery for the current state of an intent.
    ///
    /// Returns `(payload, signature header)`. An unknown `intent_id` yields a
    /// succeeded intent with no order metadata.
    #[must_use]
    pub fn webhook(&self, event_id: &str, kind: &str, intent_id: &str) -> (String, String) {
        let intent = self.intent(intent_id).unwrap_or_else(|| PaymentIntent {
            id: intent_id.to_string(),
            client_secret: None,
            status: IntentStatus::Succeeded,
            amount: 0,
            amount_received: None,
            currency: CurrencyCode::USD.gateway_code().to_string(),
            metadata: HashMap::new(),
            last_payment_error: None,
        });
        let payload = serde_json::json!({
            "id": event_id,
            "type": kind,
            "data": { "object": intent },
        })
        .to_string();
        let signature = sign_payload(Self::WEBHOOK_SECRET, &payload, Utc::now().timestamp());
        (payload, signature)
    }

    async fn pause(&self) {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayError> {
        self.pause().await;
        let n = {
            let mut created = lock(&self.created);
            *created += 1;
            *created
        };
        let id = format!("pi_test_{n}");
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: Some(format!("{id}_secret")),
            status: IntentStatus::RequiresPaymentMethod,
            amount: request.amount_minor,
            amount_received: None,
            currency: request.currency.gateway_code().to_string(),
            metadata: HashMap::from([
                ("order_id".to_string(), request.order_id.to_string()),
                ("order_number".to_string(), request.order_number.clone()),
            ]),
            last_payment_error: None,
        };
        lock(&self.intents).insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.pause().await;
        self.intent(intent_id).ok_or_else(|| GatewayError::Api {
            status: 404,
            message: format!("No such payment_intent: '{intent_id}'"),
        })
    }

    fn verify_webhook(&self, payload: &str, signature: &str) -> Result<WebhookEvent, GatewayError> {
        verify_signature(
            Self::WEBHOOK_SECRET,
            payload,
            signature,
            Utc::now().timestamp(),
        )?;
        serde_json::from_str(payload).map_err(|e| GatewayError::InvalidPayload(e.to_string()))
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Notifier that keeps every event it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<OrderEvent>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<OrderEvent> {
        lock(&self.events).clone()
    }

    /// Wait until at least `count` events arrived (or a second passed) and
    /// return them.
    pub async fn wait_for(&self, count: usize) -> Vec<OrderEvent> {
        for _ in 0..200 {
            if lock(&self.events).len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<(), NotifyError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// An active product priced at `cents`.
#[must_use]
pub fn product(id: i32, stock: u32, cents: i64) -> Product {
    Product {
        id: ProductId::new(id),
        name: format!("Product {id}"),
        sku: format!("GL-SKU-{id:04}"),
        image_url: None,
        price: Money::from_cents(cents),
        sale_price: None,
        sale_window: None,
        stock,
        low_stock_threshold: 2,
        status: ProductStatus::Active,
        total_sold: 0,
        updated_at: Utc::now(),
    }
}

/// A percentage coupon valid for a day either side of now.
#[must_use]
pub fn percentage_coupon(id: i32, code: &str, percent: i64, minimum_cents: i64) -> Coupon {
    let now = Utc::now();
    Coupon {
        id: CouponId::new(id),
        code: code.to_uppercase(),
        kind: DiscountKind::Percentage,
        value: Decimal::new(percent, 0),
        maximum_discount: None,
        minimum_order_amount: Money::from_cents(minimum_cents),
        starts_at: now - chrono::Duration::days(1),
        ends_at: now + chrono::Duration::days(1),
        usage_limit: None,
        usage_count: 0,
        is_active: true,
    }
}

/// Valid shipping details.
#[must_use]
pub fn shipping() -> ShippingInfo {
    ShippingInfo {
        full_name: "Dana Whitfield".to_string(),
        phone: "+1 412 555 0134".to_string(),
        line1: "12 Foundry Road".to_string(),
        line2: None,
        city: "Pittsburgh".to_string(),
        region: Some("PA".to_string()),
        postal_code: "15201".to_string(),
        country: "US".to_string(),
    }
}

/// Store rules used by the fixtures: $9.99 shipping under $100, 8% tax.
#[must_use]
pub fn store_config() -> StoreConfig {
    StoreConfig {
        currency: CurrencyCode::USD,
        pricing: PricingRules {
            flat_shipping: Money::from_cents(999),
            free_shipping_threshold: Money::from_cents(10_000),
            tax_rate: Decimal::new(8, 2),
        },
        cart_ttl: chrono::Duration::days(7),
        pending_order_ttl: chrono::Duration::hours(24),
    }
}

/// Every service wired over one in-memory store.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
}

impl TestHarness {
    /// Build with a 2 second gateway timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_gateway_timeout(Duration::from_secs(2))
    }

    #[must_use]
    pub fn with_gateway_timeout(timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let services = Services::new(
            &Repositories::memory(&store),
            gateway.clone(),
            notifier.clone(),
            &store_config(),
            timeout,
        );
        Self {
            store,
            gateway,
            notifier,
            services,
        }
    }

    /// Application state over the same services.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState::new(self.services.clone(), None)
    }

    /// Store a cart for `owner` with `(product id, quantity)` lines priced
    /// from the stored products.
    pub async fn put_cart(&self, owner: &Owner, lines: &[(i32, u32)]) {
        let now = Utc::now();
        let mut cart = Cart::new(owner.clone(), now, chrono::Duration::days(7));
        for &(id, quantity) in lines {
            let pid = ProductId::new(id);
            let price = self
                .store
                .product(pid)
                .await
                .map_or(Money::ZERO, |p| p.price);
            let quantity =
                LineQuantity::new(quantity).unwrap_or_else(|e| panic!("bad test quantity: {e}"));
            cart.add(pid, quantity, price);
        }
        CartRepository::save(self.store.as_ref(), &cart)
            .await
            .unwrap_or_else(|e| panic!("saving test cart failed: {e}"));
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
