//! Core payment domain types
//!
//! Everything the orchestration subsystem agrees on lives here: the payment
//! entity, its status machine, the supported mobile-money networks, the
//! polymorphic payee reference and the tenant ownership scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Mobile-money network the payer's wallet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Mtn,
    Telecel,
    AirtelTigo,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mtn => "MTN",
            Network::Telecel => "TELECEL",
            Network::AirtelTigo => "AIRTELTIGO",
        }
    }

    /// Channel code the gateway expects for this network.
    pub fn channel_code(&self) -> &'static str {
        match self {
            Network::Mtn => "mtn",
            Network::Telecel => "telecel",
            Network::AirtelTigo => "at",
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MTN" => Ok(Network::Mtn),
            "TELECEL" | "VODAFONE" => Ok(Network::Telecel),
            "AIRTELTIGO" | "AT" => Ok(Network::AirtelTigo),
            other => Err(format!("unsupported network: {}", other)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment lifecycle status. `Successful` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Pending,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Successful | PaymentStatus::Failed)
    }

    /// Whether `from -> to` is a legal edge of the status machine.
    ///
    /// ```text
    /// created -> pending -> successful
    ///       \          \-> failed
    ///        \-> failed
    /// ```
    pub fn can_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (from, to),
            (Created, Pending) | (Created, Failed) | (Pending, Successful) | (Pending, Failed)
        )
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PaymentStatus::Created),
            "pending" => Ok(PaymentStatus::Pending),
            "successful" => Ok(PaymentStatus::Successful),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity a payment is paying for.
///
/// `EventIntent` is the payment-first flow: the registration does not exist
/// yet and is only materialized by the finalizer after settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayeeKind {
    Bill,
    Registration,
    EventIntent,
}

impl PayeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayeeKind::Bill => "bill",
            PayeeKind::Registration => "registration",
            PayeeKind::EventIntent => "event_intent",
        }
    }
}

impl FromStr for PayeeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bill" => Ok(PayeeKind::Bill),
            "registration" => Ok(PayeeKind::Registration),
            "event_intent" => Ok(PayeeKind::EventIntent),
            other => Err(format!("unknown payee kind: {}", other)),
        }
    }
}

/// Polymorphic payee reference (`payee_kind` + `payee_id`).
///
/// For `Bill` and `Registration` the id is the entity's UUID. For
/// `EventIntent` it is the event code, since no entity exists yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub kind: PayeeKind,
    pub id: String,
}

impl Payee {
    pub fn bill(id: Uuid) -> Self {
        Self { kind: PayeeKind::Bill, id: id.to_string() }
    }

    pub fn registration(id: Uuid) -> Self {
        Self { kind: PayeeKind::Registration, id: id.to_string() }
    }

    pub fn event_intent(event_code: &str) -> Self {
        Self { kind: PayeeKind::EventIntent, id: event_code.to_string() }
    }
}

/// Tenant level a payment's proceeds belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    National,
    Region,
    Zone,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::National => "national",
            OwnerKind::Region => "region",
            OwnerKind::Zone => "zone",
        }
    }
}

impl FromStr for OwnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "national" => Ok(OwnerKind::National),
            "region" => Ok(OwnerKind::Region),
            "zone" => Ok(OwnerKind::Zone),
            other => Err(format!("unknown owner kind: {}", other)),
        }
    }
}

/// Resolved tenant scope for a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerScope {
    pub kind: OwnerKind,
    pub id: Uuid,
}

/// Data needed to materialize an event registration after settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRegistration {
    pub event_code: String,
    pub attendees: i32,
    pub contact_phone: String,
}

/// The central payment entity. Rows are never deleted; this is the
/// financial audit record.
#[derive(Debug, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub correlation_reference: String,
    pub amount: f64,
    pub network: Network,
    pub phone: String,
    pub description: String,
    pub payee: Payee,
    pub school_id: Uuid,
    pub owner: Option<OwnerScope>,
    pub status: PaymentStatus,
    pub bank_status: Option<String>,
    pub trans_status: Option<String>,
    pub retries: i32,
    pub deferred_payload: Option<DeferredRegistration>,
    pub gateway_reference: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub finance_transaction_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Wall-clock age of the payment, for the poll timeout check.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Fields needed to persist a fresh payment in `created` state.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub correlation_reference: String,
    pub amount: f64,
    pub network: Network,
    pub phone: String,
    pub description: String,
    pub payee: Payee,
    pub school_id: Uuid,
    pub owner: Option<OwnerScope>,
    pub deferred_payload: Option<DeferredRegistration>,
}

/// Build the gateway-facing transaction reference.
///
/// `school-timestamp-payee` is unique without a coordination service: a
/// school cannot initiate two payments for the same payee in the same
/// millisecond past the initiator's duplicate check.
pub fn correlation_reference(school_id: Uuid, payee: &Payee, now: DateTime<Utc>) -> String {
    format!("{}-{}-{}", school_id, now.timestamp_millis(), payee.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        use PaymentStatus::*;
        for to in [Created, Pending, Successful, Failed] {
            assert!(!PaymentStatus::can_transition(Successful, to));
            assert!(!PaymentStatus::can_transition(Failed, to));
        }
    }

    #[test]
    fn status_never_regresses() {
        use PaymentStatus::*;
        assert!(!PaymentStatus::can_transition(Pending, Created));
        assert!(!PaymentStatus::can_transition(Successful, Pending));
        assert!(!PaymentStatus::can_transition(Failed, Pending));
    }

    #[test]
    fn legal_edges() {
        use PaymentStatus::*;
        assert!(PaymentStatus::can_transition(Created, Pending));
        assert!(PaymentStatus::can_transition(Created, Failed));
        assert!(PaymentStatus::can_transition(Pending, Successful));
        assert!(PaymentStatus::can_transition(Pending, Failed));
        assert!(!PaymentStatus::can_transition(Created, Successful));
    }

    #[test]
    fn network_round_trips_and_aliases() {
        assert_eq!("MTN".parse::<Network>().unwrap(), Network::Mtn);
        assert_eq!("vodafone".parse::<Network>().unwrap(), Network::Telecel);
        assert_eq!("at".parse::<Network>().unwrap(), Network::AirtelTigo);
        assert!("ORANGE".parse::<Network>().is_err());
    }

    #[test]
    fn correlation_reference_embeds_school_and_payee() {
        let school = Uuid::new_v4();
        let payee = Payee::event_intent("EVT1");
        let reference = correlation_reference(school, &payee, Utc::now());
        assert!(reference.starts_with(&school.to_string()));
        assert!(reference.ends_with("-EVT1"));
    }
}
