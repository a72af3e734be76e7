//! Overlap-safety stress driver.
//!
//! Hammers a single room with concurrent create calls — a contended mix
//! of identical and randomly shifted intervals — and verifies the one
//! property that must survive load, not just unit tests: for every set of
//! pairwise-overlapping submissions, exactly one lands.
//!
//! ```bash
//! cargo run --release --bin stress -- --tasks 64 --rounds 200
//! ROOMLOCK_METRICS_PORT=9200 cargo run --release --bin stress
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use roomlock::config::StoreConfig;
use roomlock::engine::{BookingEngine, EngineError};
use roomlock::model::{Identity, Ms, Room, Span};
use roomlock::notify::NotifyHub;
use roomlock::registry::{InMemoryRoomRegistry, RoomRegistry};
use roomlock::store::BookingStore;

const HOUR: Ms = 3_600_000;

struct Args {
    /// Concurrent tasks per round.
    tasks: usize,
    /// Contended rounds, each over a fresh interval.
    rounds: usize,
}

impl Default for Args {
    fn default() -> Self {
        Self { tasks: 32, rounds: 100 }
    }
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    fn value(argv: &[String], i: usize, flag: &str) -> Result<usize, String> {
        let v = argv
            .get(i)
            .ok_or_else(|| format!("missing value for {flag}"))?;
        v.parse().map_err(|_| format!("invalid {flag} value: {v}"))
    }

    let mut args = Args::default();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--tasks" => args.tasks = value(argv, i + 1, "--tasks")?,
            "--rounds" => args.rounds = value(argv, i + 1, "--rounds")?,
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 2;
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("ROOMLOCK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    roomlock::observability::init(metrics_port);

    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let config = StoreConfig::from_env();
    if let Some(dir) = config.wal_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let _ = std::fs::remove_file(&config.wal_path);

    let store = Arc::new(BookingStore::open(&config, Arc::new(NotifyHub::new()))?);
    let rooms = Arc::new(InMemoryRoomRegistry::new());
    let room_id = Ulid::new();
    rooms.register(Room {
        id: room_id,
        name: "stress room".into(),
        location: "1F".into(),
        capacity: 1,
    });
    let engine = Arc::new(BookingEngine::new(
        store.clone(),
        rooms.clone() as Arc<dyn RoomRegistry>,
    ));

    info!(tasks = args.tasks, rounds = args.rounds, "starting overlap stress");
    let started = Instant::now();
    let mut total_ok = 0usize;
    let mut total_conflict = 0usize;

    for round in 0..args.rounds {
        // Every round targets a fresh hour; all tasks collide inside it.
        let base = (round as Ms) * 24 * HOUR + 9 * HOUR;
        let barrier = Arc::new(tokio::sync::Barrier::new(args.tasks));

        let mut handles = Vec::with_capacity(args.tasks);
        for t in 0..args.tasks {
            let engine = engine.clone();
            let barrier = barrier.clone();
            // Half identical, half shifted by a few minutes — still all
            // pairwise overlapping within the hour.
            let offset = if t % 2 == 0 { 0 } else { ((t % 10) as Ms) * 60_000 };
            handles.push(tokio::spawn(async move {
                let identity = Identity::user(Ulid::new());
                barrier.wait().await;
                engine
                    .create(room_id, base + offset, base + HOUR, Some(&identity))
                    .await
            }));
        }

        let mut ok = 0usize;
        let mut conflict = 0usize;
        for handle in handles {
            match handle.await? {
                Ok(_) => ok += 1,
                Err(EngineError::OverlapConflict(_)) => conflict += 1,
                Err(e) => return Err(format!("round {round}: unexpected error: {e}").into()),
            }
        }
        if ok != 1 {
            return Err(format!("round {round}: {ok} inserts won, expected exactly 1").into());
        }

        let stored = store
            .find_overlapping(Some(room_id), Span::new(base, base + HOUR))
            .await;
        if stored.len() != 1 {
            return Err(format!("round {round}: {} rows stored, expected 1", stored.len()).into());
        }

        total_ok += ok;
        total_conflict += conflict;
    }

    let elapsed = started.elapsed();
    let attempts = args.tasks * args.rounds;
    println!("overlap stress: OK");
    println!(
        "  attempts={attempts}, admitted={total_ok}, conflicts={total_conflict}, elapsed={:.2}s, {:.0} attempts/s",
        elapsed.as_secs_f64(),
        attempts as f64 / elapsed.as_secs_f64(),
    );
    Ok(())
}
