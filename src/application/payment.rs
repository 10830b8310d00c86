//! Payment step of checkout: cash on delivery or the signed gateway redirect.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::domain::value_objects::{OrderId, PaymentId};
use crate::gateway::{txn_ref, GatewayCallback, GatewayClient, PaymentRequest, PaymentRequestParams, TIMESTAMP_FORMAT};
use crate::{BookstoreError, Result};

const CASH_REFERENCE_PREFIX: &str = "COD";

/// Request data the gateway path needs; cash ignores it.
#[derive(Clone, Debug, Default)]
pub struct PaymentContext {
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    pub bank_code: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "method")]
pub enum PaymentInitiation {
    /// Collected by the courier; the payment stays pending until delivery.
    Cash { payment_id: PaymentId, reference: String },
    /// Customer must be redirected to `url`.
    Redirect { payment_id: PaymentId, url: String, txn_ref: String, expires_at: DateTime<Utc> },
}

impl PaymentInitiation {
    pub fn payment_id(&self) -> PaymentId {
        match self {
            Self::Cash { payment_id, .. } | Self::Redirect { payment_id, .. } => *payment_id,
        }
    }
}

/// What a verified callback did to the order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallbackResult {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub payment_status: PaymentStatus,
    pub order_confirmed: bool,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct PaymentService {
    gateway: GatewayClient,
}

impl PaymentService {
    pub fn new(gateway: GatewayClient) -> Self { Self { gateway } }

    pub fn gateway(&self) -> &GatewayClient { &self.gateway }

    /// Starts a payment attempt for the order's final amount.
    pub fn start_payment(&self, order: &mut Order, method: PaymentMethod, context: &PaymentContext) -> Result<PaymentInitiation> {
        match method {
            PaymentMethod::Cash => {
                let (payment_id, reference) = self.process_cash(order)?;
                Ok(PaymentInitiation::Cash { payment_id, reference })
            }
            PaymentMethod::Gateway => {
                let return_url = context.return_url.as_deref().ok_or_else(|| BookstoreError::InvalidRequest("return URL is required for gateway payments".into()))?;
                let client_ip = context.client_ip.as_deref().unwrap_or("127.0.0.1");
                let (payment_id, request) = self.create_payment_url(order, return_url, client_ip, context.bank_code.as_deref())?;
                Ok(PaymentInitiation::Redirect { payment_id, url: request.url, txn_ref: request.txn_ref, expires_at: request.expires_at })
            }
        }
    }

    /// Records a cash-on-delivery payment under a synthetic reference. The
    /// order is left pending; delivery drives completion.
    #[instrument(skip(self, order), fields(order_id = %order.id()))]
    pub fn process_cash(&self, order: &mut Order) -> Result<(PaymentId, String)> {
        let now = Utc::now().with_timezone(&self.gateway.offset());
        let reference = format!("{}_{}_{}", CASH_REFERENCE_PREFIX, order.id(), now.format(TIMESTAMP_FORMAT));
        let payment_id = order.add_payment(order.final_amount().clone(), PaymentMethod::Cash)?;
        order.payment_mut(payment_id)?.assign_reference(reference.clone())?;
        info!(%payment_id, %reference, "cash payment registered");
        Ok((payment_id, reference))
    }

    pub fn create_payment_url(&self, order: &mut Order, return_url: &str, client_ip: &str, bank_code: Option<&str>) -> Result<(PaymentId, PaymentRequest)> {
        self.create_payment_url_at(order, return_url, client_ip, bank_code, Utc::now())
    }

    /// Adds a gateway payment, moves it to processing and returns the signed
    /// redirect for it.
    #[instrument(skip(self, order), fields(order_id = %order.id()))]
    pub fn create_payment_url_at(&self, order: &mut Order, return_url: &str, client_ip: &str, bank_code: Option<&str>, now: DateTime<Utc>) -> Result<(PaymentId, PaymentRequest)> {
        // References have one-second resolution and must be unique per order.
        let mut now = now;
        while order.payment_by_reference(&txn_ref::format(order.id(), &now.with_timezone(&self.gateway.offset()))).is_some() {
            now += Duration::seconds(1);
        }
        let amount = order.final_amount().clone();
        let request = self.gateway.create_payment_request_at(PaymentRequestParams {
            order_id: order.id(),
            amount: &amount,
            order_info: format!("Payment for order {}", order.id()),
            return_url,
            client_ip,
            bank_code,
        }, now)?;
        let payment_id = order.add_payment(amount, PaymentMethod::Gateway)?;
        let payment = order.payment_mut(payment_id)?;
        payment.assign_reference(request.txn_ref.clone())?;
        payment.start_processing()?;
        info!(%payment_id, txn_ref = %request.txn_ref, "gateway payment started");
        Ok((payment_id, request))
    }

    /// Applies a verified callback to its payment. Success completes the
    /// payment and confirms a still-pending order; anything else fails the
    /// payment with the gateway's reason. A payment that already reached a
    /// terminal state rejects the callback.
    #[instrument(skip(self, order, callback), fields(order_id = %order.id(), txn_ref = %callback.txn_ref))]
    pub fn apply_callback(&self, order: &mut Order, callback: &GatewayCallback) -> Result<CallbackResult> {
        let payment_id = order
            .payment_by_reference(&callback.txn_ref)
            .or_else(|| order.processing_gateway_payment())
            .map(|p| p.id())
            .ok_or_else(|| BookstoreError::not_found("gateway payment", &callback.txn_ref))?;
        let payment = order.payment_mut(payment_id)?;
        let expected = payment.amount().minor_units()?;
        if expected != callback.amount_minor {
            warn!(expected, received = callback.amount_minor, "callback amount mismatch");
            return Err(BookstoreError::Security(format!("callback amount {} does not match payment amount {}", callback.amount_minor, expected)));
        }

        if callback.is_success() {
            let transaction_id = callback.transaction_no.clone().unwrap_or_else(|| callback.txn_ref.clone());
            payment.complete(transaction_id)?;
            let order_confirmed = order.status() == OrderStatus::Pending && !order.items().is_empty();
            if order_confirmed { order.confirm()?; }
            info!(%payment_id, order_confirmed, "gateway payment completed");
            Ok(CallbackResult { order_id: order.id(), payment_id, payment_status: PaymentStatus::Completed, order_confirmed, message: "Payment successful".to_string() })
        } else {
            let message = callback.failure_message();
            payment.fail(message)?;
            warn!(%payment_id, code = %callback.response_code, reason = message, "gateway payment failed");
            Ok(CallbackResult { order_id: order.id(), payment_id, payment_status: PaymentStatus::Failed, order_confirmed: false, message: message.to_string() })
        }
    }

    /// Completes the outstanding cash payments of a delivered order.
    pub fn collect_cash(&self, order: &mut Order) -> Result<Vec<PaymentId>> {
        let pending: Vec<PaymentId> = order
            .payments()
            .iter()
            .filter(|p| p.method() == PaymentMethod::Cash && !p.status().is_terminal())
            .map(|p| p.id())
            .collect();
        for payment_id in &pending {
            let payment = order.payment_mut(*payment_id)?;
            let reference = payment.reference().unwrap_or(CASH_REFERENCE_PREFIX).to_string();
            payment.complete(reference)?;
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{NewOrderItem, ShippingAddress};
    use crate::domain::value_objects::{Money, UserId, VariantId};
    use crate::gateway::tests::{signed_callback, test_config};
    use crate::ErrorKind;
    use rust_decimal::Decimal;

    fn service() -> PaymentService { PaymentService::new(GatewayClient::new(test_config()).unwrap()) }

    fn order() -> Order {
        let address = ShippingAddress {
            recipient_name: "Minh Tran".into(), phone: "0912345678".into(), street: "5 Le Loi".into(),
            ward: Some("Ben Nghe".into()), district: "District 1".into(), city: "Ho Chi Minh City".into(),
        };
        let mut order = Order::create(OrderId::new(21), UserId::new(3), address, None, "VND").unwrap();
        order.add_item(NewOrderItem {
            variant_id: VariantId::new(1), quantity: 2, unit_price: Money::new(Decimal::from(85000), "VND").unwrap(),
            book_title: "The Little Prince".into(), variant_name: "Hardcover".into(), reservation_id: None,
        }).unwrap();
        order
    }

    fn gateway_context() -> PaymentContext {
        PaymentContext { return_url: Some("https://books.test/return".into()), client_ip: Some("10.1.1.1".into()), bank_code: None }
    }

    #[test]
    fn test_cash_stays_pending() {
        let mut order = order();
        let started = service().start_payment(&mut order, PaymentMethod::Cash, &PaymentContext::default()).unwrap();
        let PaymentInitiation::Cash { payment_id, reference } = started else { panic!("expected cash") };
        assert!(reference.starts_with("COD_21_"));
        let payment = order.payment(payment_id).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(payment.amount(), order.final_amount());
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn test_gateway_requires_return_url() {
        let mut order = order();
        let err = service().start_payment(&mut order, PaymentMethod::Gateway, &PaymentContext::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(order.payments().is_empty());
    }

    #[test]
    fn test_gateway_payment_processing() {
        let mut order = order();
        let started = service().start_payment(&mut order, PaymentMethod::Gateway, &gateway_context()).unwrap();
        let PaymentInitiation::Redirect { payment_id, url, txn_ref, .. } = started else { panic!("expected redirect") };
        assert!(url.contains("vnp_Amount=17000000"));
        let payment = order.payment(payment_id).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Processing);
        assert_eq!(payment.reference(), Some(txn_ref.as_str()));
    }

    #[test]
    fn test_success_callback_confirms_order() {
        let svc = service();
        let mut order = order();
        let (payment_id, request) = svc.create_payment_url(&mut order, "https://books.test/return", "10.1.1.1", None).unwrap();
        let callback = svc.gateway().verify_callback(&signed_callback(svc.gateway(), &request.txn_ref, 17_000_000, "00", "00")).unwrap();
        let result = svc.apply_callback(&mut order, &callback).unwrap();
        assert!(result.order_confirmed);
        assert_eq!(result.payment_id, payment_id);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment(payment_id).unwrap().transaction_id(), Some("14226112"));
        assert!(order.is_fully_paid());

        let replay = svc.apply_callback(&mut order, &callback).unwrap_err();
        assert_eq!(replay.kind(), ErrorKind::State);
    }

    #[test]
    fn test_declined_callback_leaves_order() {
        let svc = service();
        let mut order = order();
        let (payment_id, request) = svc.create_payment_url(&mut order, "https://books.test/return", "10.1.1.1", None).unwrap();
        let callback = svc.gateway().verify_callback(&signed_callback(svc.gateway(), &request.txn_ref, 17_000_000, "24", "02")).unwrap();
        let result = svc.apply_callback(&mut order, &callback).unwrap();
        assert_eq!(result.payment_status, PaymentStatus::Failed);
        assert_eq!(result.message, "Transaction cancelled by customer");
        assert_eq!(order.payment(payment_id).unwrap().failure_reason(), Some("Transaction cancelled by customer"));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(svc.apply_callback(&mut order, &callback).is_err());
    }

    #[test]
    fn test_amount_mismatch_rejected() {
        let svc = service();
        let mut order = order();
        let (payment_id, request) = svc.create_payment_url(&mut order, "https://books.test/return", "10.1.1.1", None).unwrap();
        let callback = svc.gateway().verify_callback(&signed_callback(svc.gateway(), &request.txn_ref, 100, "00", "00")).unwrap();
        assert_eq!(svc.apply_callback(&mut order, &callback).unwrap_err().kind(), ErrorKind::Security);
        assert_eq!(order.payment(payment_id).unwrap().status(), PaymentStatus::Processing);
    }

    #[test]
    fn test_collect_cash() {
        let svc = service();
        let mut order = order();
        let (payment_id, _) = svc.process_cash(&mut order).unwrap();
        assert_eq!(svc.collect_cash(&mut order).unwrap(), vec![payment_id]);
        assert!(order.is_fully_paid());
        assert!(svc.collect_cash(&mut order).unwrap().is_empty());
    }
}
