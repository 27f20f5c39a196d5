use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::Id;
use crate::store::LockKey;

use super::error::BookingError;
use super::interval::parse_date;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub price_per_hour: f64,
    #[serde(default)]
    pub instructor_id: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSelection {
    pub instrument_id: Id,
    pub quantity: u32,
}

/// One requested slot. Date is `YYYY-MM-DD`; times are `HH:MM` or `HH:MM:SS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRequest {
    pub date: String,
    pub start: String,
    pub end: String,
    pub service_id: Id,
    #[serde(default)]
    pub instruments: Vec<InstrumentSelection>,
}

/// Everything needed to book a set of slots for one client at one studio.
/// Built per request by the caller and consumed by `BookingService::submit`.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub client_id: Id,
    pub studio_id: Id,
    pub services: BTreeMap<Id, ServiceDescriptor>,
    pub slots: Vec<SlotRequest>,
}

/// Wire form of a request. The client id travels beside the payload,
/// never inside it.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingPayload {
    pub studio_id: Id,
    pub services: BTreeMap<Id, ServiceDescriptor>,
    pub slots: Vec<SlotRequest>,
}

impl BookingPayload {
    pub fn from_json(json: &str) -> Result<Self, BookingError> {
        if json.len() > MAX_PAYLOAD_BYTES {
            return Err(BookingError::InvalidRequest("payload too large".into()));
        }
        serde_json::from_str(json)
            .map_err(|e| BookingError::InvalidRequest(format!("malformed payload: {e}")))
    }

    pub fn into_request(self, client_id: Id) -> BookingRequest {
        BookingRequest {
            client_id,
            studio_id: self.studio_id,
            services: self.services,
            slots: self.slots,
        }
    }
}

impl BookingRequest {
    /// Shape checks that need no store access.
    pub fn validate(&self) -> Result<(), BookingError> {
        let invalid = |msg: &str| Err(BookingError::InvalidRequest(msg.to_string()));

        if self.studio_id <= 0 {
            return invalid("studio id must be positive");
        }
        if self.client_id <= 0 {
            return invalid("client id must be positive");
        }
        if self.slots.is_empty() {
            return invalid("no slots selected");
        }
        if self.slots.len() > MAX_SLOTS_PER_REQUEST {
            return invalid("too many slots in one request");
        }
        if self.services.is_empty() {
            return invalid("no service data supplied");
        }
        if self.services.len() > MAX_SERVICES_PER_REQUEST {
            return invalid("too many services in one request");
        }
        for service in self.services.values() {
            if service.name.trim().is_empty() || service.name.len() > MAX_NAME_LEN {
                return invalid("service name missing or too long");
            }
        }
        for slot in &self.slots {
            if slot.instruments.len() > MAX_SELECTIONS_PER_SLOT {
                return invalid("too many instruments selected for one slot");
            }
            if slot.instruments.iter().any(|s| s.quantity == 0) {
                return invalid("instrument quantity must be at least 1");
            }
        }
        Ok(())
    }

    /// Advisory lock keys for every slot whose date parses: one per studio-day
    /// and one per instrument-day. Sorted and deduplicated.
    pub fn lock_keys(&self) -> Vec<LockKey> {
        let mut keys = BTreeSet::new();
        for slot in &self.slots {
            let Ok(date) = parse_date(&slot.date) else {
                continue;
            };
            keys.insert(LockKey::StudioDay {
                studio_id: self.studio_id,
                date,
            });
            for selection in &slot.instruments {
                keys.insert(LockKey::InstrumentDay {
                    instrument_id: selection.instrument_id,
                    date,
                });
            }
        }
        keys.into_iter().collect()
    }
}

/// Merge duplicate selections of one instrument, summing quantities. First
/// occurrence order is kept.
pub fn merge_selections(selections: &[InstrumentSelection]) -> Vec<InstrumentSelection> {
    let mut merged: Vec<InstrumentSelection> = Vec::with_capacity(selections.len());
    for selection in selections {
        match merged
            .iter_mut()
            .find(|m| m.instrument_id == selection.instrument_id)
        {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(selection.quantity),
            None => merged.push(*selection),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request(slots: Vec<SlotRequest>) -> BookingRequest {
        let mut services = BTreeMap::new();
        services.insert(
            1,
            ServiceDescriptor {
                name: "Recording".into(),
                price_per_hour: 40.0,
                instructor_id: None,
            },
        );
        BookingRequest {
            client_id: 7,
            studio_id: 3,
            services,
            slots,
        }
    }

    fn slot(date: &str, instruments: Vec<InstrumentSelection>) -> SlotRequest {
        SlotRequest {
            date: date.into(),
            start: "10:00".into(),
            end: "12:00".into(),
            service_id: 1,
            instruments,
        }
    }

    #[test]
    fn payload_parses_with_string_keyed_services() {
        let json = r#"{
            "studio_id": 3,
            "services": {"1": {"name": "Recording", "price_per_hour": 40.0}},
            "slots": [{"date": "2026-11-02", "start": "10:00", "end": "12:00", "service_id": 1,
                       "instruments": [{"instrument_id": 5, "quantity": 2}]}]
        }"#;
        let req = BookingPayload::from_json(json).unwrap().into_request(7);
        assert_eq!(req.client_id, 7);
        assert_eq!(req.services[&1].instructor_id, None);
        assert_eq!(req.slots[0].instruments[0].quantity, 2);
    }

    #[test]
    fn malformed_payload_is_invalid_request() {
        let err = BookingPayload::from_json("{\"studio_id\": ").unwrap_err();
        assert_eq!(err.kind(), "InvalidRequest");
    }

    #[test]
    fn validate_rejects_empty_slots_and_bad_studio() {
        assert_eq!(request(vec![]).validate().unwrap_err().kind(), "InvalidRequest");

        let mut req = request(vec![slot("2026-11-02", vec![])]);
        req.studio_id = 0;
        assert_eq!(req.validate().unwrap_err().kind(), "InvalidRequest");
    }

    #[test]
    fn validate_rejects_zero_quantity() {
        let req = request(vec![slot(
            "2026-11-02",
            vec![InstrumentSelection { instrument_id: 5, quantity: 0 }],
        )]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn validate_enforces_slot_limit() {
        let slots = (0..=MAX_SLOTS_PER_REQUEST).map(|_| slot("2026-11-02", vec![])).collect();
        assert!(request(slots).validate().is_err());
    }

    #[test]
    fn lock_keys_skip_unparseable_dates_and_dedup() {
        let pick = InstrumentSelection { instrument_id: 5, quantity: 1 };
        let req = request(vec![
            slot("2026-11-02", vec![pick]),
            slot("2026-11-02", vec![pick]),
            slot("not-a-date", vec![pick]),
        ]);
        let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        assert_eq!(
            req.lock_keys(),
            vec![
                LockKey::StudioDay { studio_id: 3, date },
                LockKey::InstrumentDay { instrument_id: 5, date },
            ]
        );
    }

    #[test]
    fn merge_sums_duplicates() {
        let merged = merge_selections(&[
            InstrumentSelection { instrument_id: 5, quantity: 1 },
            InstrumentSelection { instrument_id: 6, quantity: 1 },
            InstrumentSelection { instrument_id: 5, quantity: 2 },
        ]);
        assert_eq!(
            merged,
            vec![
                InstrumentSelection { instrument_id: 5, quantity: 3 },
                InstrumentSelection { instrument_id: 6, quantity: 1 },
            ]
        );
    }
}
