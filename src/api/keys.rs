//! Cache keys and invalidation patterns for padel API resources.

use chrono::NaiveDate;

use crate::cache::{QueryKey, KEY_DELIMITER};

// ============================================================================
// Query key types
// ============================================================================

/// Query key types for padel API reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PadelQueryKey {
  /// A single reservation
  Reservation { id: u64 },
  /// All reservations on a court
  CourtReservations { court_id: u64 },
  /// Court details
  Court { id: u64 },
  /// Free slots on a court, optionally for one day
  Availability {
    court_id: u64,
    date: Option<NaiveDate>,
  },
  /// A club client
  Client { id: u64 },
  /// The authenticated user
  CurrentUser,
}

impl QueryKey for PadelQueryKey {
  fn segments(&self) -> Vec<String> {
    match self {
      Self::Reservation { id } => vec!["reservation".into(), id.to_string()],
      Self::CourtReservations { court_id } => {
        vec!["reservations".into(), "court".into(), court_id.to_string()]
      }
      Self::Court { id } => vec!["court".into(), id.to_string()],
      Self::Availability { court_id, date } => {
        let mut segments = vec!["availability".into(), "court".into(), court_id.to_string()];
        if let Some(date) = date {
          segments.push(date.format("%Y-%m-%d").to_string());
        }
        segments
      }
      Self::Client { id } => vec!["client".into(), id.to_string()],
      Self::CurrentUser => vec!["auth".into(), "me".into()],
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Reservation { id } => format!("reservation {}", id),
      Self::CourtReservations { court_id } => format!("reservations on court {}", court_id),
      Self::Court { id } => format!("court {}", id),
      Self::Availability { court_id, date } => match date {
        Some(d) => format!("availability of court {} on {}", court_id, d),
        None => format!("availability of court {}", court_id),
      },
      Self::Client { id } => format!("client {}", id),
      Self::CurrentUser => "current user".to_string(),
    }
  }
}

// ============================================================================
// Invalidation patterns
// ============================================================================

/// Everything derived from a court's bookings: its reservation list and
/// every availability entry for it.
pub fn court_bookings_pattern(court_id: u64) -> String {
  format!(
    "^(reservations|availability){d}court{d}{id}({d}|$)",
    d = KEY_DELIMITER,
    id = court_id
  )
}

/// A reservation plus everything derived from its court's bookings.
pub fn reservation_pattern(reservation_id: u64, court_id: u64) -> String {
  format!(
    "^reservation{d}{id}$|{court}",
    d = KEY_DELIMITER,
    id = reservation_id,
    court = court_bookings_pattern(court_id)
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::InvalidationPattern;

  #[test]
  fn test_cache_keys() {
    assert_eq!(PadelQueryKey::Reservation { id: 1 }.cache_key(), "reservation:1");
    assert_eq!(
      PadelQueryKey::CourtReservations { court_id: 3 }.cache_key(),
      "reservations:court:3"
    );
    assert_eq!(
      PadelQueryKey::Availability {
        court_id: 3,
        date: NaiveDate::from_ymd_opt(2026, 10, 17),
      }
      .cache_key(),
      "availability:court:3:2026-10-17"
    );
    assert_eq!(PadelQueryKey::CurrentUser.cache_key(), "auth:me");
  }

  #[test]
  fn test_descriptions() {
    assert_eq!(PadelQueryKey::Client { id: 4 }.description(), "client 4");
    assert_eq!(
      PadelQueryKey::Availability {
        court_id: 2,
        date: None
      }
      .description(),
      "availability of court 2"
    );
  }

  #[test]
  fn test_court_bookings_pattern_is_scoped_to_court() {
    let pattern = InvalidationPattern::new(&court_bookings_pattern(3)).unwrap();

    assert!(pattern.matches("reservations:court:3"));
    assert!(pattern.matches("availability:court:3"));
    assert!(pattern.matches("availability:court:3:2026-10-17"));
    assert!(!pattern.matches("reservations:court:31"));
    assert!(!pattern.matches("availability:court:4:2026-10-17"));
    assert!(!pattern.matches("court:3"));
  }

  #[test]
  fn test_reservation_pattern() {
    let pattern = InvalidationPattern::new(&reservation_pattern(12, 3)).unwrap();

    assert!(pattern.matches("reservation:12"));
    assert!(pattern.matches("reservations:court:3"));
    assert!(!pattern.matches("reservation:120"));
    assert!(!pattern.matches("client:12"));
  }
}
