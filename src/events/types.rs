//! The transaction event schema: one envelope shape shared by every
//! event type, plus the event-specific payload fields from `spec.md`
//! §4.4's table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::domain::Fingerprint;

/// `{type: "system", id: <sim-id>}`, per `spec.md` §4.4.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
}

impl Actor {
    pub fn system(sim_id: impl Into<String>) -> Self {
        Self {
            kind: "system",
            id: sim_id.into(),
        }
    }
}

/// `{status: "ACCEPTED", version: "v1"}`, the validation envelope every
/// accepted event carries.
#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for Validation {
    fn default() -> Self {
        Self {
            status: "ACCEPTED",
            version: "v1",
        }
    }
}

/// The ISA-95 hierarchy ids carried on every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hierarchy {
    pub enterprise: String,
    pub site: String,
    pub area: String,
    pub line: String,
}

/// `GOOD`/`REJECT` result of a completed bottle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BottleResult {
    Good,
    Reject,
}

/// One of the five reject reasons, matching `reject_reason` register codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    Weight,
    Torque,
    Barcode,
    Label,
    Hazard,
}

/// Every event-specific payload, tagged by `eventType`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "eventType")]
pub enum EventPayload {
    OrderStarted {
        #[serde(rename = "plannedQty")]
        planned_qty: u32,
        #[serde(rename = "plannedStartTs")]
        planned_start_ts: DateTime<Utc>,
        #[serde(rename = "plannedEndTs")]
        planned_end_ts: DateTime<Utc>,
    },
    OrderCompleted {
        #[serde(rename = "goodCountDelta")]
        good_count_delta: u32,
        #[serde(rename = "rejectCountDelta")]
        reject_count_delta: u32,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        yield_: f64,
    },
    StateChanged {
        #[serde(rename = "fromState")]
        from_state: &'static str,
        #[serde(rename = "toState")]
        to_state: &'static str,
        #[serde(rename = "stopCode", skip_serializing_if = "Option::is_none")]
        stop_code: Option<String>,
        #[serde(rename = "faultCode", skip_serializing_if = "Option::is_none")]
        fault_code: Option<u16>,
        #[serde(rename = "reasonId", skip_serializing_if = "Option::is_none")]
        reason_id: Option<String>,
        #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fingerprint: Option<Fingerprint>,
    },
    MicrostopStarted {
        #[serde(rename = "stopCode")]
        stop_code: &'static str,
        fingerprint: Fingerprint,
    },
    MicrostopEnded {
        #[serde(rename = "stopCode")]
        stop_code: &'static str,
        fingerprint: Fingerprint,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    StopStarted {
        #[serde(rename = "stopCode")]
        stop_code: String,
        #[serde(rename = "reasonId", skip_serializing_if = "Option::is_none")]
        reason_id: Option<String>,
        #[serde(rename = "reasonText", skip_serializing_if = "Option::is_none")]
        reason_text: Option<String>,
    },
    StopEnded {
        #[serde(rename = "stopCode")]
        stop_code: String,
        #[serde(rename = "reasonId", skip_serializing_if = "Option::is_none")]
        reason_id: Option<String>,
        #[serde(rename = "reasonText", skip_serializing_if = "Option::is_none")]
        reason_text: Option<String>,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    FaultRaised {
        #[serde(rename = "faultCode")]
        fault_code: u16,
        severity: &'static str,
        station: &'static str,
    },
    FaultCleared {
        #[serde(rename = "faultCode")]
        fault_code: u16,
        severity: &'static str,
        station: &'static str,
    },
    ChangeoverStarted {
        #[serde(rename = "changeoverType")]
        changeover_type: crate::domain::ChangeoverType,
    },
    ChangeoverCompleted {
        #[serde(rename = "changeoverType")]
        changeover_type: crate::domain::ChangeoverType,
    },
    CipStarted {},
    CipEnded {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    BottleCompleted {
        result: BottleResult,
        station: &'static str,
        #[serde(rename = "rejectReason", skip_serializing_if = "Option::is_none")]
        reject_reason: Option<RejectReason>,
        #[serde(skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        torque: Option<f64>,
    },
    TransactionRejected {
        #[serde(rename = "rejectedEventType")]
        rejected_event_type: String,
        #[serde(rename = "rejectedEventId")]
        rejected_event_id: String,
        reasons: Vec<String>,
    },
}

/// The full envelope written as one JSON line. `eventType` lives on
/// the flattened [`EventPayload`] tag.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "eventId")]
    pub event_id: Ulid,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub hierarchy: Hierarchy,
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
    pub sku: Option<String>,
    pub actor: Actor,
    pub validation: Validation,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        event_id: Ulid,
        ts: DateTime<Utc>,
        hierarchy: Hierarchy,
        order_id: Option<String>,
        sku: Option<String>,
        actor: Actor,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id,
            ts,
            hierarchy,
            order_id,
            sku,
            actor,
            validation: Validation::default(),
            payload,
        }
    }

    /// The `eventType` discriminant, for logging and for building
    /// `TransactionRejected.rejectedEventType`.
    pub fn event_type(&self) -> &'static str {
        match &self.payload {
            EventPayload::OrderStarted { .. } => "OrderStarted",
            EventPayload::OrderCompleted { .. } => "OrderCompleted",
            EventPayload::StateChanged { .. } => "StateChanged",
            EventPayload::MicrostopStarted { .. } => "MicrostopStarted",
            EventPayload::MicrostopEnded { .. } => "MicrostopEnded",
            EventPayload::StopStarted { .. } => "StopStarted",
            EventPayload::StopEnded { .. } => "StopEnded",
            EventPayload::FaultRaised { .. } => "FaultRaised",
            EventPayload::FaultCleared { .. } => "FaultCleared",
            EventPayload::ChangeoverStarted { .. } => "ChangeoverStarted",
            EventPayload::ChangeoverCompleted { .. } => "ChangeoverCompleted",
            EventPayload::CipStarted {} => "CipStarted",
            EventPayload::CipEnded { .. } => "CipEnded",
            EventPayload::BottleCompleted { .. } => "BottleCompleted",
            EventPayload::TransactionRejected { .. } => "TransactionRejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> Hierarchy {
        Hierarchy {
            enterprise: "ACME".to_string(),
            site: "SITE1".to_string(),
            area: "BOTTLING".to_string(),
            line: "LINE1".to_string(),
        }
    }

    #[test]
    fn serializes_event_type_tag_and_envelope_fields() {
        let event = Event::new(
            Ulid::new(),
            Utc::now(),
            hierarchy(),
            Some("ORD-1".to_string()),
            Some("LEM-500-IE".to_string()),
            Actor::system("sim-1"),
            EventPayload::OrderStarted {
                planned_qty: 600,
                planned_start_ts: Utc::now(),
                planned_end_ts: Utc::now(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "OrderStarted");
        assert_eq!(json["plannedQty"], 600);
        assert_eq!(json["orderId"], "ORD-1");
        assert_eq!(json["actor"]["type"], "system");
        assert_eq!(json["validation"]["status"], "ACCEPTED");
    }

    #[test]
    fn idle_order_and_sku_serialize_as_null() {
        let event = Event::new(
            Ulid::new(),
            Utc::now(),
            hierarchy(),
            None,
            None,
            Actor::system("sim-1"),
            EventPayload::CipStarted {},
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["orderId"].is_null());
        assert!(json["sku"].is_null());
    }

    #[test]
    fn event_type_accessor_matches_tag() {
        let event = Event::new(
            Ulid::new(),
            Utc::now(),
            hierarchy(),
            None,
            None,
            Actor::system("sim-1"),
            EventPayload::CipEnded { duration_ms: 1800000 },
        );
        assert_eq!(event.event_type(), "CipEnded");
    }
}
