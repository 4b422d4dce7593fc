use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use rust_decimal::Decimal;
use serde::Serialize;
use shipway::application::engine::ShipwayEngine;
use shipway::application::pricing::{self, FeeBreakdown};
use shipway::config::EngineConfig;
use shipway::domain::order::VehicleType;
use shipway::domain::ports::Stores;
use shipway::infrastructure::in_memory::InMemoryStore;
use shipway::infrastructure::logging::setup_logging;
#[cfg(feature = "storage-rocksdb")]
use shipway::infrastructure::rocksdb::RocksDBStore;
use shipway::interfaces::csv::audit_writer::AuditWriter;
use shipway::interfaces::csv::notification_reader::NotificationReader;
use shipway::interfaces::csv::outcome_writer::{OutcomeRow, OutcomeWriter};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Price a trip and print the fee breakdown as JSON
    Quote {
        #[arg(long, allow_hyphen_values = true, requires_all = ["pickup_lng", "dropoff_lat", "dropoff_lng"])]
        pickup_lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        pickup_lng: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        dropoff_lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        dropoff_lng: Option<f64>,
        /// Use this distance instead of computing one from coordinates
        #[arg(long, conflicts_with = "pickup_lat")]
        distance_km: Option<Decimal>,
        /// Parcel weight in kg
        #[arg(long)]
        weight: Decimal,
        /// bike, car, van, truck_500kg or truck_1000kg. Suggested from the weight if omitted.
        #[arg(long)]
        vehicle: Option<VehicleType>,
        /// Cash-on-delivery amount
        #[arg(long, default_value = "0")]
        cod: Decimal,
    },
    /// Replay a settlement CSV of payment notifications through the webhook handler
    Reconcile {
        /// CSV with payment_id,status,transaction_code,payment_time,signature
        input: PathBuf,
    },
    /// Print every wallet with its ledger reconciliation
    Audit,
    /// Delete expired one-time codes and cancel unpaid top-ups past their window
    Sweep,
}

#[derive(Serialize)]
struct QuoteReport {
    distance_km: Decimal,
    vehicle_type: VehicleType,
    suggested_vehicle: VehicleType,
    #[serde(flatten)]
    fee: FeeBreakdown,
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ok(Stores::from_backend(
            RocksDBStore::open(path).into_diagnostic()?,
        )),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Stores::from_backend(InMemoryStore::new()))
        }
        None => Ok(Stores::from_backend(InMemoryStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    if let Command::Quote {
        pickup_lat,
        pickup_lng,
        dropoff_lat,
        dropoff_lng,
        distance_km,
        weight,
        vehicle,
        cod,
    } = cli.command
    {
        let distance = match (distance_km, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng) {
            (Some(km), ..) => km,
            (None, Some(lat1), Some(lng1), Some(lat2), Some(lng2)) => {
                pricing::distance_km(lat1, lng1, lat2, lng2)
            }
            _ => {
                return Err(miette!(
                    "provide --distance-km or all four pickup/dropoff coordinates"
                ));
            }
        };
        let suggested_vehicle = pricing::suggest_vehicle(weight);
        let vehicle_type = vehicle.unwrap_or(suggested_vehicle);
        let fee = pricing::quote(distance, weight, vehicle_type, cod).into_diagnostic()?;
        let report = QuoteReport {
            distance_km: distance,
            vehicle_type,
            suggested_vehicle,
            fee,
        };
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        return Ok(());
    }

    let config = EngineConfig::from_env().into_diagnostic()?;
    let engine = ShipwayEngine::with_defaults(open_stores(cli.db_path)?, &config);

    match cli.command {
        Command::Reconcile { input } => {
            let file = File::open(input).into_diagnostic()?;
            let reader = NotificationReader::new(file);
            let stdout = io::stdout();
            let mut writer = OutcomeWriter::new(stdout.lock());
            for notification in reader.notifications() {
                match notification {
                    Ok(notification) => {
                        let payment_id = notification.payment_id.clone();
                        let result = engine.webhooks.verify_payment(notification).await;
                        if let Err(e) = &result {
                            warn!(payment_id = %payment_id, error = %e, "Notification not applied");
                        }
                        writer
                            .write(&OutcomeRow::from_result(&payment_id, &result))
                            .into_diagnostic()?;
                    }
                    Err(e) => {
                        eprintln!("Error reading notification: {}", e);
                    }
                }
            }
            writer.finish().into_diagnostic()?;
        }
        Command::Audit => {
            let audits = engine.wallet.audit_all().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = AuditWriter::new(stdout.lock());
            writer.write_audits(&audits).into_diagnostic()?;
        }
        Command::Sweep => {
            let purged = engine.otc.purge_expired().await.into_diagnostic()?;
            let expired = engine.topups.expire_stale().await.into_diagnostic()?;
            println!("otc_purged={} topups_expired={}", purged, expired);
        }
        Command::Quote { .. } => {}
    }

    Ok(())
}
