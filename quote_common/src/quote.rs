//! Quote data model and pricing helpers.
//!
//! A `Quote` is the immutable snapshot pushed to clients. Both quote sources
//! derive `change` and `changePercent` the same way: prices are rounded to two
//! decimals first, `change` is the rounded difference to the base price and the
//! percentage is computed from that rounded change. A non-positive base yields a
//! zero percentage.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::instrument::InstrumentId;

/// Floor applied to generated prices so they never reach zero or below.
pub const MIN_PRICE: f64 = 0.01;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Current wall clock as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Market quote for a single instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Instrument the quote belongs to.
    pub instrument_id: InstrumentId,
    /// Last price, rounded to two decimals.
    pub last_price: f64,
    /// `last_price` minus the base price.
    pub change: f64,
    /// `change` relative to the base price, in percent.
    pub change_percent: f64,
    /// Traded volume, when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    /// Exchange update time (`HH:MM:SS`), when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
    /// Millisecond part of `update_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_millisec: Option<u32>,
    /// Emission time in milliseconds since the Unix epoch.
    pub ts: i64,
}

impl Quote {
    /// Build a quote for a generated price move away from `base_price`.
    ///
    /// `new_price` is rounded and floored at [`MIN_PRICE`].
    pub fn from_move(instrument_id: InstrumentId, base_price: f64, new_price: f64) -> Self {
        let last_price = round2(new_price).max(MIN_PRICE);
        Self::priced(instrument_id, last_price, Some(base_price))
    }

    /// Build a quote for a price reported against an optional reference price.
    ///
    /// Without a positive reference both `change` and `change_percent` are zero.
    pub fn from_reference(
        instrument_id: InstrumentId,
        last_price: f64,
        reference: Option<f64>,
    ) -> Self {
        Self::priced(instrument_id, round2(last_price.max(0.0)), reference)
    }

    fn priced(instrument_id: InstrumentId, last_price: f64, base: Option<f64>) -> Self {
        let (change, change_percent) = match base {
            Some(base) if base > 0.0 => {
                let change = round2(last_price - base);
                (change, round2(change / base * 100.0))
            }
            Some(base) => (round2(last_price - base), 0.0),
            None => (0.0, 0.0),
        };

        Quote {
            instrument_id,
            last_price,
            change,
            change_percent,
            volume: None,
            update_time: None,
            update_millisec: None,
            ts: now_millis(),
        }
    }

    /// Attach a traded volume.
    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Attach the exchange update time.
    pub fn with_update_time(mut self, update_time: impl Into<String>, millisec: u32) -> Self {
        self.update_time = Some(update_time.into());
        self.update_millisec = Some(millisec);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> InstrumentId {
        InstrumentId::parse(raw).unwrap()
    }

    #[test]
    fn move_rounds_and_derives_change() {
        let quote = Quote::from_move(id("rb2501"), 3500.0, 3503.456);
        assert_eq!(quote.last_price, 3503.46);
        assert_eq!(quote.change, 3.46);
        assert_eq!(quote.change_percent, round2(3.46 / 3500.0 * 100.0));
    }

    #[test]
    fn move_floors_non_positive_prices() {
        let quote = Quote::from_move(id("x"), 2.0, -3.0);
        assert_eq!(quote.last_price, MIN_PRICE);
        assert_eq!(quote.change, round2(MIN_PRICE - 2.0));
    }

    #[test]
    fn zero_base_has_zero_percent() {
        let quote = Quote::from_move(id("x"), 0.0, 4.2);
        assert_eq!(quote.change_percent, 0.0);
        assert_eq!(quote.change, 4.2);
    }

    #[test]
    fn missing_reference_has_no_change() {
        let quote = Quote::from_reference(id("cu2501"), 70010.123, None);
        assert_eq!(quote.last_price, 70010.12);
        assert_eq!(quote.change, 0.0);
        assert_eq!(quote.change_percent, 0.0);
    }

    #[test]
    fn serializes_wire_field_names() {
        let quote = Quote::from_reference(id("au2501"), 501.0, Some(500.0))
            .with_volume(42)
            .with_update_time("09:30:01", 500);
        let value = serde_json::to_value(&quote).unwrap();

        assert_eq!(value["instrumentId"], "au2501");
        assert_eq!(value["lastPrice"], 501.0);
        assert_eq!(value["change"], 1.0);
        assert_eq!(value["changePercent"], 0.2);
        assert_eq!(value["volume"], 42);
        assert_eq!(value["updateTime"], "09:30:01");
        assert_eq!(value["updateMillisec"], 500);
        assert!(value["ts"].is_i64());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let quote = Quote::from_move(id("rb2501"), 1000.0, 1001.0);
        let value = serde_json::to_value(&quote).unwrap();
        assert!(value.get("volume").is_none());
        assert!(value.get("updateTime").is_none());
        assert!(value.get("updateMillisec").is_none());
    }
}
