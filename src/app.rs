use crate::commands::{CacheCommand, Command};
use color_eyre::{eyre::eyre, Result};
use padel_sync::api::keys::{court_bookings_pattern, reservation_pattern};
use padel_sync::api::types::{Client, ClientUpdate, NewReservation, Reservation};
use padel_sync::api::{ApiClient, PadelQueryKey};
use padel_sync::cache::{CacheStorage, InvalidationPattern, NoopStorage, QueryKey, SqliteStorage};
use padel_sync::store::Notification;
use padel_sync::{BatchOptions, Config, DataSync, MutationError, Query, QueryState, RetryPolicy, Store};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Main application state
pub struct App {
  config: Config,
  store: Store,
  sync: DataSync,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let storage: Arc<dyn CacheStorage> = if config.cache.persist {
      let path = match &config.cache.path {
        Some(path) => path.clone(),
        None => SqliteStorage::default_path()?,
      };
      debug!(path = %path.display(), "Opening cache database");
      Arc::new(SqliteStorage::open_at(&path)?)
    } else {
      Arc::new(NoopStorage)
    };

    let store = Store::with_storage(storage);
    let sync = DataSync::new(store.clone())
      .with_retry(RetryPolicy::from(&config.retry))
      .with_cache_time(config.cache.ttl())
      .with_notification_ttl(config.notifications.auto_dismiss());

    Ok(Self {
      config,
      store,
      sync,
    })
  }

  /// Run one command, then print whatever notifications it raised.
  pub async fn run(&self, command: Command) -> Result<()> {
    let result = match command {
      Command::Whoami => self.whoami().await,
      Command::Reserve {
        court,
        start,
        minutes,
        players,
      } => {
        let reservation = NewReservation {
          court_id: court,
          club_id: self.config.api.club_id,
          start,
          duration_minutes: minutes,
          players,
        };
        self.reserve(reservation).await
      }
      Command::Cancel { id, court } => self.cancel(id, court).await,
      Command::UpdateClient {
        id,
        name,
        email,
        phone,
      } => self.update_client(id, ClientUpdate { name, email, phone }).await,
      Command::CancelBatch { ids, court } => self.cancel_batch(ids, court).await,
      Command::Reservations { court } => self.reservations(court).await,
      Command::Cache(command) => self.cache(command),
    };

    for notification in self.store.notifications() {
      println!("{}", notification);
    }
    result
  }

  // API client is built lazily so cache commands work without a token
  fn api(&self) -> Result<ApiClient> {
    ApiClient::new(&self.config)
  }

  fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.store.get_cache(key)?;
    serde_json::from_value(value)
      .map_err(|e| debug!(%key, "Ignoring cached value: {}", e))
      .ok()
  }

  /// Court reservations from the cache, or from the API on a miss.
  async fn court_reservations(&self, api: &ApiClient, court: u64) -> Result<Vec<Reservation>> {
    let key = PadelQueryKey::CourtReservations { court_id: court }.cache_key();
    if let Some(reservations) = self.cached(&key) {
      return Ok(reservations);
    }

    let reservations = api.list_reservations(court).await?;
    self.store.set_cache(
      &key,
      serde_json::to_value(&reservations)?,
      self.config.cache.ttl(),
    );
    Ok(reservations)
  }

  /// A client from the cache, or from the API on a miss.
  async fn client(&self, api: &ApiClient, id: u64) -> Result<Client> {
    let key = PadelQueryKey::Client { id }.cache_key();
    if let Some(client) = self.cached(&key) {
      return Ok(client);
    }

    let client = api.get_client(id).await?;
    self.store.set_cache(&key, serde_json::to_value(&client)?, self.config.cache.ttl());
    Ok(client)
  }

  async fn whoami(&self) -> Result<()> {
    let api = self.api()?;
    let principal = api.me().await?;

    self.store.set_cache(
      &PadelQueryKey::CurrentUser.cache_key(),
      serde_json::to_value(&principal)?,
      self.config.cache.ttl(),
    );
    self.store.login(principal.clone());

    match &principal.email {
      Some(email) => println!("{} <{}>", principal.name, email),
      None => println!("{}", principal.name),
    }
    if !principal.roles.is_empty() {
      println!("roles: {}", principal.roles.join(", "));
    }
    Ok(())
  }

  async fn reserve(&self, reservation: NewReservation) -> Result<()> {
    let api = self.api()?;
    let court = reservation.court_id;
    let key = PadelQueryKey::CourtReservations { court_id: court }.cache_key();

    let current = self.court_reservations(&api, court).await?;
    let mut optimistic = current.clone();
    optimistic.push(reservation.pending());

    let options = self
      .sync
      .options(&key)
      .optimistic(serde_json::to_value(&optimistic)?)
      .invalidate(court_bookings_pattern(court))
      .notify_success(format!("Court {} booked for {}", court, reservation.start))
      .notify_error("Reservation failed");

    let reservations = self
      .sync
      .mutate(&options, reservation, |reservation| {
        let api = api.clone();
        let mut reservations = current.clone();
        async move {
          let created = api.create_reservation(&reservation).await?;
          reservations.push(created);
          Ok::<_, MutationError>(reservations)
        }
      })
      .await?;

    if let Some(created) = reservations.last() {
      info!(id = created.id, court, "Reservation created");
      println!("Reservation #{} on court {}", created.id, court);
    }
    Ok(())
  }

  async fn cancel(&self, id: u64, court: u64) -> Result<()> {
    let api = self.api()?;
    let key = PadelQueryKey::CourtReservations { court_id: court }.cache_key();

    let remaining: Vec<Reservation> = self
      .court_reservations(&api, court)
      .await?
      .into_iter()
      .filter(|r| r.id != id)
      .collect();

    let options = self
      .sync
      .options(&key)
      .optimistic(serde_json::to_value(&remaining)?)
      .invalidate(reservation_pattern(id, court))
      .notify_success(format!("Reservation #{} cancelled", id))
      .notify_error("Cancellation failed");

    self
      .sync
      .mutate(&options, id, |id| {
        let api = api.clone();
        let remaining = remaining.clone();
        async move {
          api.cancel_reservation(id).await?;
          Ok::<_, MutationError>(remaining)
        }
      })
      .await?;
    Ok(())
  }

  async fn update_client(&self, id: u64, update: ClientUpdate) -> Result<()> {
    if update.is_empty() {
      return Err(eyre!("Nothing to update: pass --name, --email or --phone"));
    }

    let api = self.api()?;
    let key = PadelQueryKey::Client { id }.cache_key();

    let current = self.client(&api, id).await?;
    let options = self
      .sync
      .options(&key)
      .optimistic(serde_json::to_value(update.apply_to(&current))?)
      .invalidate_on_success(true)
      .notify_success(format!("Client {} updated", id))
      .notify_error("Client update failed");

    let client = self
      .sync
      .mutate(&options, update, |update| {
        let api = api.clone();
        async move { api.update_client(id, &update).await }
      })
      .await?;

    println!(
      "{}  email: {}  phone: {}",
      client.name,
      client.email.as_deref().unwrap_or("-"),
      client.phone.as_deref().unwrap_or("-")
    );
    Ok(())
  }

  async fn cancel_batch(&self, ids: Vec<u64>, court: u64) -> Result<()> {
    let api = self.api()?;
    let key = PadelQueryKey::CourtReservations { court_id: court }.cache_key();

    let remaining: Vec<Reservation> = self
      .court_reservations(&api, court)
      .await?
      .into_iter()
      .filter(|r| !ids.contains(&r.id))
      .collect();

    let options = BatchOptions {
      batch_size: self.config.batch.size,
      optimistic: Some((key, serde_json::to_value(&remaining)?)),
      invalidate_pattern: Some(court_bookings_pattern(court)),
      retry: RetryPolicy::from(&self.config.retry),
    };

    let report = self
      .sync
      .process_batch(
        ids.clone(),
        &options,
        |id| {
          let api = api.clone();
          async move { api.cancel_reservation(id).await }
        },
        |progress| println!("{:>5.1}%", progress),
      )
      .await?;

    for (index, error) in report.errors() {
      eprintln!("#{}: {}", ids[index], error);
    }

    let total = report.results.len();
    let notification = if report.failed() == 0 {
      Notification::success("Batch cancelled", format!("{} reservations cancelled", total))
    } else {
      Notification::error(
        "Batch cancel incomplete",
        format!("{} of {} cancellations failed", report.failed(), total),
      )
    };
    self.store.add_notification(notification);
    Ok(())
  }

  async fn reservations(&self, court: u64) -> Result<()> {
    let api = self.api()?;
    let query_key = PadelQueryKey::CourtReservations { court_id: court };
    let key = query_key.cache_key();
    debug!(%key, "Loading {}", query_key.description());

    let mut query = Query::new(self.store.clone(), key, move || {
      let api = api.clone();
      async move { api.list_reservations(court).await }
    });
    if let Some(ttl) = self.config.cache.ttl() {
      query = query.with_cache_time(ttl);
    }

    query.fetch();
    while query.is_loading() {
      tokio::time::sleep(POLL_INTERVAL).await;
      query.poll();
    }

    match query.state() {
      QueryState::Success(reservations) => {
        if reservations.is_empty() {
          println!("No reservations on court {}", court);
        }
        for r in reservations {
          println!(
            "#{:<6} {}  {:>3}min  {:<9} {}",
            r.id,
            r.start.format("%Y-%m-%d %H:%M"),
            r.duration_minutes,
            format!("{:?}", r.status).to_lowercase(),
            r.players.join(", ")
          );
        }
        Ok(())
      }
      QueryState::Error(e) => Err(eyre!("Failed to load reservations: {}", e)),
      QueryState::Idle | QueryState::Loading => Ok(()),
    }
  }

  fn cache(&self, command: CacheCommand) -> Result<()> {
    match command {
      CacheCommand::List => {
        for key in self.store.cache_keys() {
          println!("{}", key);
        }
      }
      CacheCommand::Invalidate { pattern } => {
        let matcher = InvalidationPattern::new(&pattern)
          .map_err(|e| eyre!("Invalid pattern '{}': {}", pattern, e))?;
        let removed = self.store.invalidate_matching(&matcher);
        println!("Invalidated {} entries", removed.len());
      }
      CacheCommand::Clear => {
        self.store.clear_cache();
        println!("Cache cleared");
      }
    }
    Ok(())
  }
}
