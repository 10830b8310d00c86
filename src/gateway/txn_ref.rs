//! Transaction reference shared by the outbound request and the callback.
//!
//! The reference is `{order_id}_{yyyyMMddHHmmss}`; the callback side recovers
//! the order id from the numeric prefix. Both directions live here.

use chrono::{DateTime, TimeZone};

use super::{GatewayError, TIMESTAMP_FORMAT};
use crate::domain::value_objects::OrderId;

const SEPARATOR: char = '_';

pub fn format<Tz: TimeZone>(order_id: OrderId, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}{}", order_id, SEPARATOR, at.format(TIMESTAMP_FORMAT))
}

pub fn parse_order_id(txn_ref: &str) -> Result<OrderId, GatewayError> {
    let prefix = txn_ref.split(SEPARATOR).next().unwrap_or_default();
    prefix.parse::<OrderId>().map_err(|_| GatewayError::MalformedReference(txn_ref.to_string()))
}
