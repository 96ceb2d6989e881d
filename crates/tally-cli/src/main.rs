//! tally — attendance checkpoint CLI.
//!
//! Administrative and checkpoint entry points over the engine: enroll
//! identities, run a recognition against an image file, and read the
//! attendance projections. Output is JSON for machine consumption.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tally_engine::{
    admin, spawn_engine, CommandExtractor, CommandSynthesizer, Config, Engine, EngineHandle,
    RegistrationPipeline,
};
use tally_store::{ArtifactCache, AttendanceLedger, CaptureStore, Db, Gallery, IdentityStore};

#[derive(Parser)]
#[command(name = "tally", about = "Face-based attendance checkpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an enrollment photo for an identity
    Register {
        /// Display name (created on first registration)
        #[arg(short, long)]
        name: String,
        /// Free-text affiliation, recorded on first registration
        #[arg(short, long)]
        affiliation: Option<String>,
        /// Path to the enrollment photo
        image: PathBuf,
    },
    /// Run one recognition event against an image file
    Recognize {
        /// Path to the captured image
        image: PathBuf,
    },
    /// Who is present today (latest event per identity)
    Today,
    /// All days with at least one attendance event
    Dates,
    /// Attendance for one day (YYYY-MM-DD)
    Day { date: String },
    /// All events in an inclusive day range
    Range { from: String, to: String },
    /// Counted attendances per month
    Monthly,
    /// Remove an identity with its gallery vectors and enrollment images
    Remove {
        /// Display name to remove
        name: String,
    },
    /// Store overview: gallery size, first event date, paths
    Status,
}

struct App {
    config: Config,
    db: Db,
}

impl App {
    fn open() -> Result<Self> {
        let config = Config::load()?;
        let db = Db::open(&config.db_path)
            .with_context(|| format!("opening database at {}", config.db_path.display()))?;
        Ok(Self { config, db })
    }

    fn ledger(&self) -> AttendanceLedger {
        AttendanceLedger::new(self.db.conn())
    }

    fn spawn_engine(&self) -> Result<EngineHandle> {
        let extractor = Arc::new(CommandExtractor::new(
            self.config.extractor_cmd.clone(),
            self.config.extract_timeout_secs,
        ));
        let artifacts = Arc::new(ArtifactCache::new(
            &self.config.audio_dir,
            self.config.locale.clone(),
            Arc::new(CommandSynthesizer::new(
                self.config.synthesizer_cmd.clone(),
                self.config.synth_timeout_secs,
            )),
        ));
        let registration = RegistrationPipeline::new(
            IdentityStore::new(self.db.conn()),
            Gallery::new(self.db.conn()),
            CaptureStore::new(&self.config.enroll_dir),
            extractor.clone(),
        );
        spawn_engine(Engine {
            gallery: Gallery::new(self.db.conn()),
            ledger: AttendanceLedger::new(self.db.conn()),
            captures: CaptureStore::new(&self.config.captures_dir),
            artifacts,
            extractor,
            registration,
            threshold: self.config.distance_threshold,
        })
        .context("spawning engine thread")
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let app = App::open()?;

    match cli.command {
        Commands::Register {
            name,
            affiliation,
            image,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let handle = app.spawn_engine()?;
            match handle.register(&name, affiliation.as_deref(), bytes).await {
                Ok(reg) => print_json(&reg)?,
                Err(err) if err.is_rejection() => {
                    eprintln!("registration rejected: {err}");
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Recognize { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let handle = app.spawn_engine()?;
            let outcome = handle.recognize(bytes).await?;
            print_json(&outcome)?;
        }
        Commands::Today => {
            let today = chrono::Local::now().format("%Y-%m-%d").to_string();
            print_json(&app.ledger().latest_for_day(&today)?)?;
        }
        Commands::Dates => print_json(&app.ledger().available_dates()?)?,
        Commands::Day { date } => print_json(&app.ledger().latest_for_day(&date)?)?,
        Commands::Range { from, to } => {
            print_json(&app.ledger().events_between(&from, &to)?)?;
        }
        Commands::Monthly => print_json(&app.ledger().monthly_totals()?)?,
        Commands::Remove { name } => {
            let identities = IdentityStore::new(app.db.conn());
            let enrollments = CaptureStore::new(&app.config.enroll_dir);
            let removal = admin::delete_identity(&identities, &enrollments, &name)?;
            println!(
                "removed identity {} ({} gallery entries)",
                removal.identity_id, removal.entries_removed
            );
        }
        Commands::Status => {
            let gallery = Gallery::new(app.db.conn());
            let status = serde_json::json!({
                "db_path": app.config.db_path.display().to_string(),
                "gallery_entries": gallery.len()?,
                "first_event_date": app.ledger().first_event_date()?,
                "distance_threshold": app.config.distance_threshold,
                "locale": app.config.locale,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
