//! Resources exchanged with the padel API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
  /// Shown optimistically, not yet confirmed by the server
  Pending,
  #[default]
  Confirmed,
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
  pub id: u64,
  pub court_id: u64,
  #[serde(default)]
  pub club_id: Option<u64>,
  pub start: DateTime<Utc>,
  pub duration_minutes: u32,
  #[serde(default)]
  pub players: Vec<String>,
  #[serde(default)]
  pub status: ReservationStatus,
}

/// Body of `POST /api/reservations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
  pub court_id: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub club_id: Option<u64>,
  pub start: DateTime<Utc>,
  pub duration_minutes: u32,
  pub players: Vec<String>,
}

impl NewReservation {
  /// Placeholder shown while the reservation is being created.
  /// Id 0 marks it as not yet assigned by the server.
  pub fn pending(&self) -> Reservation {
    Reservation {
      id: 0,
      court_id: self.court_id,
      club_id: self.club_id,
      start: self.start,
      duration_minutes: self.duration_minutes,
      players: self.players.clone(),
      status: ReservationStatus::Pending,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
}

/// Body of `PATCH /api/clients/{id}`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
}

impl ClientUpdate {
  pub fn is_empty(&self) -> bool {
    self.name.is_none() && self.email.is_none() && self.phone.is_none()
  }

  /// The client as it will look once the patch is accepted.
  pub fn apply_to(&self, client: &Client) -> Client {
    Client {
      id: client.id,
      name: self.name.clone().unwrap_or_else(|| client.name.clone()),
      email: self.email.clone().or_else(|| client.email.clone()),
      phone: self.phone.clone().or_else(|| client.phone.clone()),
    }
  }
}
