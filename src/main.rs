//! Bookstore Commerce - checkout demo runner
//!
//! Seeds an in-memory catalog, runs a cash and a gateway checkout and prints
//! the outcomes. A background task sweeps expired stock reservations.

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bookstore_commerce::application::{CheckoutItem, CheckoutRequest, CheckoutService, PaymentService, Stores, VariantListing};
use bookstore_commerce::config::AppConfig;
use bookstore_commerce::domain::aggregates::{DiscountType, Inventory, NewVoucher, PaymentMethod, ShippingAddress, Voucher};
use bookstore_commerce::domain::value_objects::{AddressId, Money, UserId, VariantId, VoucherId};
use bookstore_commerce::gateway::GatewayClient;
use bookstore_commerce::infrastructure::InMemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let store = Arc::new(InMemoryStore::new());
    seed(&store, &config.checkout.currency).await?;

    let stores = Stores {
        addresses: store.clone(),
        catalog: store.clone(),
        inventory: store.clone(),
        vouchers: store.clone(),
        orders: store.clone(),
    };
    let payments = PaymentService::new(GatewayClient::new(config.gateway.clone())?);
    let service = Arc::new(CheckoutService::new(stores, payments, config.checkout.clone()));

    let sweeper = service.clone();
    let period = std::time::Duration::from_secs(config.reservation_sweep_seconds.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match sweeper.sweep_expired_reservations(Utc::now()).await {
                Ok((_, events)) => {
                    for event in events { debug!(event = ?event, "inventory event"); }
                }
                Err(err) => warn!(error = %err, "reservation sweep failed"),
            }
        }
    });

    let user_id = UserId::new(1);
    let cash = service.checkout(CheckoutRequest {
        user_id,
        items: vec![
            CheckoutItem { variant_id: VariantId::new(1), quantity: 1 },
            CheckoutItem { variant_id: VariantId::new(2), quantity: 2 },
        ],
        address_id: None,
        voucher_code: Some("WELCOME10".into()),
        notes: Some("Call before delivery".into()),
        payment_method: PaymentMethod::Cash,
        return_url: None,
        client_ip: None,
        bank_code: None,
    }).await;
    println!("{}", serde_json::to_string_pretty(&cash)?);

    let gateway = service.checkout(CheckoutRequest {
        user_id,
        items: vec![CheckoutItem { variant_id: VariantId::new(3), quantity: 1 }],
        address_id: Some(AddressId::new(1)),
        voucher_code: None,
        notes: None,
        payment_method: PaymentMethod::Gateway,
        return_url: Some("https://books.example.com/checkout/return".into()),
        client_ip: Some("127.0.0.1".into()),
        bank_code: None,
    }).await;
    println!("{}", serde_json::to_string_pretty(&gateway)?);

    info!("demo finished");
    Ok(())
}

async fn seed(store: &InMemoryStore, currency: &str) -> Result<()> {
    store.add_address(UserId::new(1), AddressId::new(1), ShippingAddress {
        recipient_name: "Nguyen Van An".into(),
        phone: "0901234567".into(),
        street: "12 Le Loi".into(),
        ward: Some("Ben Nghe".into()),
        district: "District 1".into(),
        city: "Ho Chi Minh City".into(),
    }, true).await;

    let books = [
        (1, "The Little Prince", "Hardcover", 120_000, 25),
        (2, "Sapiens", "Paperback", 185_000, 40),
        (3, "Clean Code", "Paperback", 320_000, 5),
    ];
    for (id, title, variant, price, stock) in books {
        store.add_variant(VariantListing {
            variant_id: VariantId::new(id),
            book_title: title.into(),
            variant_name: variant.into(),
            price: Money::new(Decimal::from(price), currency)?,
        }).await;
        store.put_inventory(Inventory::create(VariantId::new(id), stock, 3)).await;
    }

    let now = Utc::now();
    store.put_voucher(Voucher::create(VoucherId::new(1), NewVoucher {
        code: "WELCOME10".into(),
        name: "10% off your first order".into(),
        discount_type: DiscountType::Percent,
        discount_value: Decimal::from(10),
        currency: currency.into(),
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(90),
        min_order_amount: Some(Decimal::from(200_000)),
        max_discount_amount: Some(Decimal::from(50_000)),
        usage_limit: 1000,
        owner_id: None,
    })?).await;
    Ok(())
}
