//! In-memory doubles and fixtures shared by the unit tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use charging_core::{round_money, ChargePeriod, ChargingError, Money, Result};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::api::AppState;
use crate::billing::{BillState, BillingClient, CustomerBill, AppliedRate};
use crate::charging::{Engine, LocalEngine, PricingBackend};
use crate::clients::{
    BillingAccount, BillingApi, CatalogApi, ContactMedium, InventoryApi, MediumCharacteristic, OrderingApi,
    PartyApi,
};
use crate::orders::{MemoryOrderStore, OrderService};
use crate::payment::{GatewayError, PaymentGateway, PaymentReceipt, PaymentRequest, Redirection};
use crate::pricing::{
    ComponentPrice, PriceEngine, PriceType, ProductOffering, ProductOfferingPrice, ResourceRef, TaxResolver,
};
use crate::config::WorkerConfig;
use crate::queue::{CbWorker, CbWorkersService, MemoryQueueStore};
use crate::types::{Contract, Order, OrderState};

pub fn fixed_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Catalog price component in EUR
pub fn pop(id: &str, price_type: &str, value: Option<Decimal>) -> ProductOfferingPrice {
    ProductOfferingPrice {
        id: id.to_string(),
        name: id.to_string(),
        price_type: price_type.parse().unwrap(),
        price: value.map(|v| Money::new(v, "EUR")),
        percentage: None,
        recurring_charge_period_type: None,
        recurring_charge_period_length: None,
        unit_of_measure: None,
        is_bundle: false,
        bundled_pop_relationship: Vec::new(),
        prod_spec_char_value_use: Vec::new(),
    }
}

/// Priced EUR component; recurring ones are monthly, usage ones per call
pub fn component(id: &str, price_type: PriceType, unit_price: Decimal, tax_rate: Decimal) -> ComponentPrice {
    ComponentPrice {
        component_id: id.to_string(),
        name: id.to_string(),
        price_type,
        period: price_type.is_recurring().then(ChargePeriod::monthly),
        unit_of_measure: (price_type == PriceType::Usage).then(|| "call".to_string()),
        unit_price,
        quantity: 1,
        duty_free: round_money(unit_price),
        tax_rate,
        tax_included: round_money(unit_price * (Decimal::ONE + tax_rate / Decimal::ONE_HUNDRED)),
        currency: "EUR".to_string(),
    }
}

/// Active order of `ba-1` with one monthly contract for `prod-1`
pub fn sample_order(id: &str) -> Order {
    let start = fixed_date();
    let period = ChargePeriod::monthly();
    Order {
        id: id.to_string(),
        customer_id: "cust-1".to_string(),
        billing_account_id: Some("ba-1".to_string()),
        state: OrderState::Completed,
        contracts: vec![Contract {
            item_id: "item-1".to_string(),
            product_id: "prod-1".to_string(),
            offering_id: "po-1".to_string(),
            components: vec![component("fee", PriceType::Recurring, Decimal::TEN, Decimal::from(20))],
            period: Some(period),
            last_charge: Some(start),
            next_charge: Some(period.advance(start, 1)),
            charges: Vec::new(),
            bills: Vec::new(),
        }],
        pending_payment: None,
        created_at: start,
        updated_at: start,
    }
}

pub fn sample_bill(id: &str, billing_account_id: &str, product_ids: &[&str]) -> CustomerBill {
    CustomerBill {
        id: id.to_string(),
        billing_account_id: billing_account_id.to_string(),
        bill_date: Utc::now(),
        state: BillState::New,
        amount_due: Money::new(Decimal::from(12), "EUR"),
        tax_excluded: Money::new(Decimal::TEN, "EUR"),
        tax_items: Vec::new(),
        billing_period: None,
        rate_ids: Vec::new(),
        product_ids: product_ids.iter().map(|p| p.to_string()).collect(),
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    offerings: HashMap<String, ProductOffering>,
    prices: HashMap<String, ProductOfferingPrice>,
}

impl FakeCatalog {
    pub fn with_offering(mut self, id: &str, price_ids: &[&str]) -> Self {
        self.offerings.insert(
            id.to_string(),
            ProductOffering {
                id: id.to_string(),
                name: id.to_string(),
                product_offering_price: price_ids
                    .iter()
                    .map(|p| ResourceRef {
                        id: p.to_string(),
                        href: None,
                    })
                    .collect(),
            },
        );
        self
    }

    pub fn with_price(mut self, price: ProductOfferingPrice) -> Self {
        self.prices.insert(price.id.clone(), price);
        self
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn get_offering(&self, id: &str) -> Result<ProductOffering> {
        self.offerings
            .get(id)
            .cloned()
            .ok_or_else(|| ChargingError::NotFound(format!("product offering {}", id)))
    }

    async fn get_price(&self, id: &str) -> Result<ProductOfferingPrice> {
        self.prices
            .get(id)
            .cloned()
            .ok_or_else(|| ChargingError::NotFound(format!("product offering price {}", id)))
    }
}

#[derive(Default)]
pub struct FakeParty {
    accounts: HashMap<String, BillingAccount>,
}

impl FakeParty {
    pub fn with_account(mut self, id: &str, country: Option<&str>) -> Self {
        let contact_medium = country
            .map(|c| {
                vec![ContactMedium {
                    medium_type: "PostalAddress".to_string(),
                    characteristic: MediumCharacteristic {
                        country: Some(c.to_string()),
                    },
                }]
            })
            .unwrap_or_default();
        self.accounts.insert(
            id.to_string(),
            BillingAccount {
                id: id.to_string(),
                name: id.to_string(),
                contact_medium,
            },
        );
        self
    }
}

#[async_trait]
impl PartyApi for FakeParty {
    async fn get_billing_account(&self, id: &str) -> Result<BillingAccount> {
        self.accounts
            .get(id)
            .cloned()
            .ok_or_else(|| ChargingError::NotFound(format!("billing account {}", id)))
    }
}

/// Billing API keeping rates and bills in memory
#[derive(Default)]
pub struct MemoryBillingApi {
    rates: Mutex<Vec<AppliedRate>>,
    bills: Mutex<HashMap<String, CustomerBill>>,
    next_id: AtomicUsize,
    /// Customer bills still accepted; unlimited when `None`
    bill_budget: Mutex<Option<usize>>,
    fail_lookups: AtomicBool,
}

impl MemoryBillingApi {
    /// Reject every customer bill from now on
    pub fn fail_bills(&self) {
        self.fail_bills_after(0);
    }

    /// Accept `n` more customer bills, then reject the rest
    pub fn fail_bills_after(&self, n: usize) {
        *self.bill_budget.lock() = Some(n);
    }

    /// Make `get_customer_bill` fail as if the billing API were down
    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn rates(&self) -> Vec<AppliedRate> {
        self.rates.lock().clone()
    }

    pub fn bill(&self, id: &str) -> Option<CustomerBill> {
        self.bills.lock().get(id).cloned()
    }

    pub fn bills(&self) -> Vec<CustomerBill> {
        self.bills.lock().values().cloned().collect()
    }

    pub fn insert_bill(&self, bill: CustomerBill) {
        self.bills.lock().insert(bill.id.clone(), bill);
    }

    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl BillingApi for MemoryBillingApi {
    async fn create_applied_rate(&self, rate: &AppliedRate) -> Result<AppliedRate> {
        let mut stored = rate.clone();
        stored.id = self.id("acbr");
        self.rates.lock().push(stored.clone());
        Ok(stored)
    }

    async fn update_applied_rate(&self, rate: &AppliedRate) -> Result<()> {
        let mut rates = self.rates.lock();
        let existing = rates
            .iter_mut()
            .find(|r| r.id == rate.id)
            .ok_or_else(|| ChargingError::NotFound(format!("applied rate {}", rate.id)))?;
        *existing = rate.clone();
        Ok(())
    }

    async fn create_customer_bill(&self, bill: &CustomerBill) -> Result<CustomerBill> {
        match self.bill_budget.lock().as_mut() {
            Some(0) => return Err(ChargingError::Upstream("billing API unavailable".into())),
            Some(left) => *left -= 1,
            None => {}
        }
        let mut stored = bill.clone();
        stored.id = self.id("cb");
        self.insert_bill(stored.clone());
        Ok(stored)
    }

    async fn set_bill_state(&self, id: &str, state: BillState) -> Result<()> {
        let mut bills = self.bills.lock();
        let bill = bills
            .get_mut(id)
            .ok_or_else(|| ChargingError::NotFound(format!("customer bill {}", id)))?;
        bill.state = state;
        Ok(())
    }

    async fn get_customer_bill(&self, id: &str) -> Result<Option<CustomerBill>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(ChargingError::Upstream("billing API unavailable".into()));
        }
        Ok(self.bill(id))
    }
}

#[derive(Default)]
pub struct RecordingInventory {
    activated: Mutex<Vec<String>>,
}

impl RecordingInventory {
    pub fn activated(&self) -> Vec<String> {
        self.activated.lock().clone()
    }
}

#[async_trait]
impl InventoryApi for RecordingInventory {
    async fn activate_product(&self, product_id: &str) -> Result<()> {
        self.activated.lock().push(product_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingOrdering {
    states: Mutex<Vec<(String, String, String)>>,
}

impl RecordingOrdering {
    /// `(order, item, state)` updates in call order
    pub fn states(&self) -> Vec<(String, String, String)> {
        self.states.lock().clone()
    }
}

#[async_trait]
impl OrderingApi for RecordingOrdering {
    async fn set_item_state(&self, order_id: &str, item_id: &str, state: &str) -> Result<()> {
        self.states
            .lock()
            .push((order_id.to_string(), item_id.to_string(), state.to_string()));
        Ok(())
    }
}

/// Gateway approving every payment; payer `intruder` is rejected at capture
#[derive(Default)]
pub struct FakeGateway {
    started: Mutex<Vec<PaymentRequest>>,
    captured: Mutex<Vec<String>>,
    refunded: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl FakeGateway {
    pub fn started(&self) -> Vec<PaymentRequest> {
        self.started.lock().clone()
    }

    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().clone()
    }

    pub fn refunded(&self) -> Vec<String> {
        self.refunded.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn gateway_id(&self) -> &'static str {
        "fake"
    }

    async fn start_redirection_payment(&self, request: &PaymentRequest) -> std::result::Result<Redirection, GatewayError> {
        let reference = format!("PAY-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.started.lock().push(request.clone());
        Ok(Redirection {
            url: format!("https://pay.test/approve/{}", reference),
            reference,
        })
    }

    async fn end_payment(
        &self,
        reference: &str,
        payer_id: Option<&str>,
    ) -> std::result::Result<PaymentReceipt, GatewayError> {
        if payer_id == Some("intruder") {
            return Err(GatewayError::Rejected("payer does not match".into()));
        }
        self.captured.lock().push(reference.to_string());
        Ok(PaymentReceipt {
            reference: reference.to_string(),
            payer_id: payer_id.map(str::to_string),
            amount: None,
            captured_at: Utc::now(),
        })
    }

    async fn refund(&self, reference: &str) -> std::result::Result<String, GatewayError> {
        self.refunded.lock().push(reference.to_string());
        Ok(format!("REF-{}", reference))
    }
}

/// Engine and services wired over the in-memory doubles
pub struct Harness {
    pub orders: MemoryOrderStore,
    pub queue: MemoryQueueStore,
    pub billing: Arc<MemoryBillingApi>,
    pub inventory: Arc<RecordingInventory>,
    pub ordering: Arc<RecordingOrdering>,
    pub gateway: Arc<FakeGateway>,
    pub prices: Arc<PriceEngine>,
    pub engine: Arc<Engine>,
    pub order_service: Arc<OrderService>,
    pub workers: Arc<CbWorkersService>,
}

impl Harness {
    /// Billing account `ba-1` has no country, so the 20% default applies
    pub fn new(catalog: FakeCatalog) -> Self {
        Self::with_backend(catalog, Arc::new(LocalEngine::new()))
    }

    pub fn with_backend(catalog: FakeCatalog, backend: Arc<dyn PricingBackend>) -> Self {
        let orders = MemoryOrderStore::new();
        let queue = MemoryQueueStore::new();
        let billing = Arc::new(MemoryBillingApi::default());
        let inventory = Arc::new(RecordingInventory::default());
        let ordering = Arc::new(RecordingOrdering::default());
        let gateway = Arc::new(FakeGateway::default());

        let party = FakeParty::default().with_account("ba-1", None);
        let tax = TaxResolver::new(Arc::new(party), Decimal::from(20), HashMap::new());
        let prices = Arc::new(PriceEngine::new(Arc::new(catalog), tax));

        let engine = Arc::new(Engine::new(
            Arc::new(orders.clone()),
            backend,
            gateway.clone(),
            BillingClient::new(billing.clone()),
            inventory.clone(),
            ordering.clone(),
            "https://market.test/",
        ));
        let order_service = Arc::new(OrderService::new(
            Arc::new(orders.clone()),
            prices.clone(),
            engine.clone(),
        ));
        let workers = Arc::new(CbWorkersService::new(CbWorker::new(
            Arc::new(queue.clone()),
            Arc::new(orders.clone()),
            billing.clone(),
            WorkerConfig::default(),
        )));

        Self {
            orders,
            queue,
            billing,
            inventory,
            ordering,
            gateway,
            prices,
            engine,
            order_service,
            workers,
        }
    }

    pub fn state(&self, webhook_secret: Option<&str>) -> AppState {
        AppState {
            prices: self.prices.clone(),
            orders: self.order_service.clone(),
            engine: self.engine.clone(),
            queue: Arc::new(self.queue.clone()),
            webhook_secret: webhook_secret.map(Arc::from),
            store_backend: "memory",
            workers: self.workers.clone(),
            pool: None,
        }
    }
}
