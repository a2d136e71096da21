use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ulid::Ulid;

use condopark::clock::ManualClock;
use condopark::config::BookingPolicy;
use condopark::engine::{BookingRequest, Engine, EngineError};
use condopark::model::{Actor, HOUR, Ms, Role};
use condopark::push::LogNotifier;
use condopark::repo::InMemoryRepository;

/// 2026-01-01T00:00:00Z
const EPOCH: Ms = 1_767_225_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn engine(repo: InMemoryRepository) -> Arc<Engine> {
    Arc::new(Engine::new(
        Arc::new(repo),
        Arc::new(LogNotifier),
        Arc::new(ManualClock::new(EPOCH)),
        BookingPolicy::default(),
    ))
}

fn concierge() -> Actor {
    Actor {
        user_id: Ulid::new(),
        unit_id: None,
        role: Role::Concierge,
    }
}

fn request(spot_id: Ulid, slot: i64) -> BookingRequest {
    let start = EPOCH + slot * HOUR;
    BookingRequest {
        spot_id,
        unit_id: Ulid::new(),
        start,
        end: start + HOUR,
    }
}

async fn phase1_sequential(engine: &Engine) {
    let actor = concierge();
    let spot = Ulid::new();
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        if let Err(e) = engine.create_booking(&actor, request(spot, i as i64)).await {
            eprintln!("  create failed: {e}");
        }
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many tasks racing for the same slots on a handful of spots. Exactly one winner per slot.
async fn phase2_contention(engine: Arc<Engine>) {
    let n_tasks = 16;
    let n_spots = 4;
    let n_slots = 100;
    let spots: Vec<Ulid> = (0..n_spots).map(|_| Ulid::new()).collect();
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let spots = spots.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let actor = concierge();
            for slot in 0..n_slots {
                for spot in &spots {
                    match engine.create_booking(&actor, request(*spot, slot)).await {
                        Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                        Err(EngineError::DoubleBooking { .. }) => lost.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            eprintln!("  unexpected: {e}");
                            0
                        }
                    };
                }
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_spots * n_slots as usize;
    let won = won.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {} attempts = {total} total in {:.2}s = {:.0} ops/sec",
        n_spots * n_slots as usize,
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  accepted={won} (expected {}), rejected={}",
        n_spots * n_slots as usize,
        lost.load(Ordering::Relaxed)
    );
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let spot = Ulid::new();
    let actor = concierge();
    for i in 0..200 {
        let _ = engine.create_booking(&actor, request(spot, i)).await;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let actor = concierge();
            let own_spot = Ulid::new();
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_booking(&actor, request(own_spot, i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let from = EPOCH + (i as i64 % 190) * HOUR;
                let t = Instant::now();
                let _ = engine.spot_schedule(spot, from, from + 10 * HOUR).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        if let Ok(l) = h.await {
            all_latencies.extend(l);
        }
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("schedule query", &mut all_latencies);
}

async fn phase4_journaled() {
    let dir = std::env::temp_dir().join(format!("condopark_bench_{}", Ulid::new()));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("  skipped: {e}");
        return;
    }
    let repo = match InMemoryRepository::open(&dir.join("condopark.wal")) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("  skipped: {e}");
            return;
        }
    };
    let engine = engine(repo);
    let actor = concierge();
    let spot = Ulid::new();
    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let t = Instant::now();
        let _ = engine.create_booking(&actor, request(spot, i as i64)).await;
        latencies.push(t.elapsed());
    }
    print_latency("fsync'd write latency", &mut latencies);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::main]
async fn main() {
    println!("=== condopark stress benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    phase1_sequential(&engine(InMemoryRepository::volatile())).await;

    println!("\n[phase 2] concurrent creates on contended slots");
    phase2_contention(engine(InMemoryRepository::volatile())).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(engine(InMemoryRepository::volatile())).await;

    println!("\n[phase 4] journaled writes");
    phase4_journaled().await;

    println!("\n=== done ===");
}
