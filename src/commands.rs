//! Command-line commands

use chrono::{DateTime, Utc};
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Show the authenticated user
  Whoami,

  /// Book a court
  Reserve {
    /// Court to book
    #[arg(long)]
    court: u64,
    /// Start time (RFC 3339, e.g. 2026-10-17T18:00:00Z)
    #[arg(long)]
    start: DateTime<Utc>,
    /// Length of the booking in minutes
    #[arg(long, default_value_t = 90)]
    minutes: u32,
    /// Player names, repeatable
    #[arg(long = "player")]
    players: Vec<String>,
  },

  /// Cancel a reservation
  Cancel {
    id: u64,
    /// Court the reservation belongs to
    #[arg(long)]
    court: u64,
  },

  /// Change a client's contact details
  UpdateClient {
    id: u64,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
  },

  /// Cancel several reservations on one court
  CancelBatch {
    #[arg(required = true)]
    ids: Vec<u64>,
    #[arg(long)]
    court: u64,
  },

  /// List reservations on a court
  Reservations { court: u64 },

  /// Inspect or clear the local cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CacheCommand {
  /// List live cache keys
  List,
  /// Drop every key matching a regex
  Invalidate { pattern: String },
  /// Drop everything
  Clear,
}
