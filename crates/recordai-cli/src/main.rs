use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recordai_core::sampling::SamplingPlan;
use recordai_core::session::SessionConfig;
use recordai_core::tracker::{ReidentifyPolicy, TrackerConfig};
use recordai_store::SqliteStore;
use recordaid::api::models::MatchResponse;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod client;
mod people;
mod replay;

use client::ServerClient;

#[derive(Parser)]
#[command(name = "recordai", about = "Record.AI identification CLI")]
struct Cli {
    /// recordaid base URL
    #[arg(long, env = "RECORDAI_URL", default_value = "http://localhost:8000", global = true)]
    server: String,

    /// SQLite people database (for list/import/remove)
    #[arg(long, env = "RECORDAI_DB_PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the face in one or more images
    Identify {
        /// Image files; several are averaged
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Matching method (faceapi, deepface, external)
        #[arg(short, long)]
        method: Option<String>,
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Show daemon status
    Status,
    /// List known people
    List,
    /// Import known people from a JSON file
    Import {
        file: PathBuf,
    },
    /// Remove a known person
    Remove {
        /// Person ID to remove
        id: String,
    },
    /// Replay a recorded detection stream (JSON lines) against the daemon
    Replay {
        file: PathBuf,
        /// Pace frames by their timestamps
        #[arg(long)]
        realtime: bool,
        /// Seconds before an unmatched face is retried
        #[arg(long, default_value_t = 2.0)]
        retry_secs: f64,
        /// Descriptor samples averaged per attempt
        #[arg(long, default_value_t = 3)]
        samples: usize,
        #[arg(long, default_value_t = 150)]
        sample_interval_ms: u64,
        #[arg(long, default_value_t = 3)]
        max_faces: usize,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
        /// Descriptor space of the recording (faceapi, deepface)
        #[arg(short, long, default_value = "faceapi")]
        method: String,
        #[arg(short, long)]
        threshold: Option<f32>,
    },
}

fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("recordai/people.db")
}

async fn open_store(db: Option<PathBuf>) -> Result<SqliteStore> {
    let path = db.unwrap_or_else(default_db_path);
    SqliteStore::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))
}

fn retry_window(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .context("--retry-secs must be a finite, non-negative number of seconds")
}

fn print_match(resp: &MatchResponse) {
    if resp.match_found {
        println!(
            "Match: {} (distance {:.4}, {})",
            resp.person_name.as_deref().unwrap_or("?"),
            resp.distance.unwrap_or_default(),
            resp.confidence.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
        );
        if let Some(discord) = &resp.discord_username {
            println!("  discord: {discord}");
        }
        if let Some(photo) = &resp.photo_path {
            println!("  photo:   {photo}");
        }
    } else {
        println!("No match: {}", resp.message);
    }
    if !resp.candidates.is_empty() {
        println!("Candidates ({} threshold {:.2}):", resp.method, resp.threshold);
        for c in &resp.candidates {
            println!("  {:<30} {:.4}", c.person_name, c.distance);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identify {
            images,
            method,
            threshold,
        } => {
            let client = ServerClient::new(&cli.server, Duration::from_secs(30), method, threshold)?;
            let resp = client.identify_images(&images[..]).await?;
            print_match(&resp);
        }
        Commands::Status => {
            let client = ServerClient::new(&cli.server, Duration::from_secs(5), None, None)?;
            match client.health().await {
                Ok(health) => {
                    println!("recordaid {}: {}", health.version, health.status);
                    println!(
                        "  store:   {} ({})",
                        health.store,
                        match health.database_records {
                            Some(n) => format!("{n} records"),
                            None => "not connected".to_string(),
                        }
                    );
                    println!(
                        "  methods: {} (default {})",
                        health.methods.join(", "),
                        health.default_method
                    );
                    if let Some(err) = health.error {
                        println!("  error:   {err}");
                    }
                }
                Err(e) => println!("recordaid: not reachable at {} ({e})", cli.server),
            }
        }
        Commands::List => {
            let store = open_store(cli.db).await?;
            let listed = store.list().await?;
            if listed.is_empty() {
                println!("No known people");
            }
            for p in listed {
                let spaces: Vec<&str> = p.spaces.iter().map(|s| s.as_str()).collect();
                println!(
                    "{}  {:<30} [{}]  {}",
                    p.profile.id,
                    p.profile.full_name,
                    spaces.join(","),
                    p.created_at
                );
            }
        }
        Commands::Import { file } => {
            let store = open_store(cli.db).await?;
            let report = people::import_file(&store, &file).await?;
            println!(
                "Imported {} people ({} embeddings)",
                report.people, report.embeddings
            );
            for rejected in &report.rejected {
                println!("  rejected: {rejected}");
            }
        }
        Commands::Remove { id } => {
            let store = open_store(cli.db).await?;
            let Some(person) = store.get(&id).await? else {
                anyhow::bail!("no person with id {id}");
            };
            store.remove(&id).await?;
            println!("Removed {} ({id})", person.full_name);
        }
        Commands::Replay {
            file,
            realtime,
            retry_secs,
            samples,
            sample_interval_ms,
            max_faces,
            timeout_secs,
            method,
            threshold,
        } => {
            let retry = retry_window(retry_secs)?;
            let frames = replay::read_frames(&file).await?;
            let request_timeout = Duration::from_secs(timeout_secs);
            let client = ServerClient::new(
                &cli.server,
                request_timeout,
                Some(method),
                threshold,
            )?;
            let config = SessionConfig {
                tracker: TrackerConfig {
                    max_faces,
                    ..TrackerConfig::default()
                },
                policy: ReidentifyPolicy::new(retry),
                sampling: SamplingPlan {
                    count: samples.max(1),
                    interval: Duration::from_millis(sample_interval_ms),
                },
                request_timeout,
            };
            println!("Replaying {} frames from {}", frames.len(), file.display());
            let events = replay::replay(Arc::new(client), config, frames, realtime).await;
            for event in &events {
                println!("{}", replay::describe(event));
            }
        }
    }

    Ok(())
}
