use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use spaq::spa::{self, SpaClient, SpaService, User};
use spaq::{ConsoleNotifier, SessionStore, SlotStatus, SyncEngine};

/// How long one-shot commands wait for a query to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "spaq")]
#[command(about = "A cache-synchronized client for spa booking services")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/spaq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in and store the session
  Login {
    /// Account email (defaults to the config file's api.email)
    email: Option<String>,
  },
  /// Sign out and evict user-scoped data
  Logout,
  /// Show the signed-in user
  Whoami,
  /// List the staff roster
  Staff {
    /// Only staff who perform this treatment
    #[arg(long)]
    treatment: Option<String>,
  },
  /// List your appointments
  Appointments,
  /// Cancel an appointment by id
  Cancel { id: i64 },
  /// Update your profile
  Update {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    address: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = spaq::config::Config::load(args.config.as_deref())?;

  let client = Arc::new(SpaClient::new(&config.api.base_url)?);
  let engine = SyncEngine::new(client.clone(), Arc::new(ConsoleNotifier));
  let session = SessionStore::open()?;
  let service = SpaService::new(engine, session);
  let _ = service.bootstrap()?;

  match args.command {
    Command::Login { email } => {
      let email = email
        .or(config.api.email.clone())
        .ok_or_else(|| eyre!("No email given; pass one or set api.email in the config"))?;
      let password = spaq::config::Config::get_password()?;
      let user = client
        .sign_in(&email, &password)
        .await
        .map_err(|e| eyre!("Sign-in failed: {}", e))?;
      service.set_current_user(&user)?;
      println!("Signed in as {} <{}>", user.name, user.email);
    }

    Command::Logout => {
      service.sign_out()?;
      println!("Signed out");
    }

    Command::Whoami => {
      if !service.signed_in() {
        println!("Not signed in");
        return Ok(());
      }
      let _ = service.current_user();
      let user: User = settled(&service, &spa::user_key()).await?;
      println!("{} <{}>", user.name, user.email);
      if let Some(phone) = user.phone {
        println!("phone: {}", phone);
      }
      if let Some(address) = user.address {
        println!("address: {}", address);
      }
    }

    Command::Staff { treatment } => {
      let _ = service.staff(None);
      let _: Vec<spa::Staff> = settled(&service, &spa::staff_key()).await?;
      let roster = service.staff(treatment.as_deref());
      for member in roster.data.unwrap_or_default() {
        println!("{:>4}  {}  [{}]", member.id, member.name, member.treatment_names.join(", "));
      }
    }

    Command::Appointments => {
      if !service.signed_in() {
        return Err(eyre!("Not signed in"));
      }
      let _ = service.user_appointments();
      let appointments: Vec<spa::Appointment> =
        settled(&service, &spa::user_appointments_key()).await?;
      if appointments.is_empty() {
        println!("No appointments");
      }
      for appointment in appointments {
        println!(
          "{:>4}  {}  {}",
          appointment.id,
          appointment.date_time.format("%Y-%m-%d %H:%M"),
          appointment.treatment_name
        );
      }
    }

    Command::Cancel { id } => {
      if !service.signed_in() {
        return Err(eyre!("Not signed in"));
      }
      let _ = service.user_appointments();
      let appointments: Vec<spa::Appointment> =
        settled(&service, &spa::user_appointments_key()).await?;
      let appointment = appointments
        .into_iter()
        .find(|a| a.id == id)
        .ok_or_else(|| eyre!("No appointment with id {}", id))?;
      service.cancel_appointment(&appointment).await;
    }

    Command::Update {
      name,
      phone,
      address,
    } => {
      if !service.signed_in() {
        return Err(eyre!("Not signed in"));
      }
      let _ = service.current_user();
      let mut user: User = settled(&service, &spa::user_key()).await?;
      if let Some(name) = name {
        user.name = name;
      }
      if let Some(phone) = phone {
        user.phone = Some(phone);
      }
      if let Some(address) = address {
        user.address = Some(address);
      }
      service.patch_user(&user).await;
    }
  }

  Ok(())
}

/// Wait for a key to settle, then decode it or surface its recorded error.
async fn settled<T: serde::de::DeserializeOwned>(
  service: &SpaService,
  key: &spaq::CacheKey,
) -> Result<T> {
  let entry = service
    .engine()
    .await_settled(key, SETTLE_TIMEOUT)
    .await
    .ok_or_else(|| eyre!("No data for {}", key))?;

  if entry.status == SlotStatus::Error {
    return Err(eyre!(
      "{}",
      entry.error.unwrap_or_else(|| "request failed".to_string())
    ));
  }
  entry.decode().ok_or_else(|| eyre!("No data for {}", key))
}
