//! Match Simulator CLI Tool
//!
//! Runs simulated participants concurrently against an in-memory engine and
//! checks the pairing invariants on the results.
//!
//! Usage:
//!   cargo run --bin match-sim -- --help
//!   cargo run --bin match-sim run --participants 200 --languages en,ko --seed 7
//!   cargo run --bin match-sim scenario

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tandem_match::matching::{MatchEngine, MatchingConfig, UniformSelector};
use tandem_match::store::{InMemoryQueueStore, InMemoryRoomRegistry};
use tandem_match::types::{MatchAttributes, MatchOutcome, MatchRequest, ParticipantId, RoomId};
use tokio::time::Instant;

#[derive(Parser)]
#[command(name = "match-sim")]
#[command(about = "Concurrent pairing simulator for the tandem-match engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run many participants polling concurrently until matched
    Run {
        /// Number of participants
        #[arg(short, long, default_value = "100")]
        participants: usize,
        /// Comma-separated languages assigned round-robin
        #[arg(short, long, default_value = "en")]
        languages: String,
        /// Delay between polls of a pending participant, in milliseconds
        #[arg(long, default_value = "5")]
        poll_ms: u64,
        /// Give up on a participant after this many seconds
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
        /// Pairing attempts per request
        #[arg(long, default_value = "3")]
        max_attempts: u32,
        /// Seed for candidate selection
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Walk through a two-participant example step by step
    Scenario,
}

/// What one simulated participant ended up with
#[derive(Debug, Clone)]
struct SimResult {
    participant_id: ParticipantId,
    outcome: MatchOutcome,
    polls: u32,
}

fn build_engine(max_attempts: u32, seed: Option<u64>) -> MatchEngine {
    let selector = match seed {
        Some(seed) => UniformSelector::seeded(seed),
        None => UniformSelector::new(),
    };

    MatchEngine::new(
        Arc::new(InMemoryQueueStore::new()),
        Arc::new(InMemoryRoomRegistry::new()),
    )
    .with_selector(Arc::new(selector))
    .with_config(MatchingConfig {
        max_attempts,
        ..MatchingConfig::default()
    })
}

async fn poll_until_matched(
    engine: Arc<MatchEngine>,
    request: MatchRequest,
    poll_interval: Duration,
    deadline: Instant,
) -> Result<SimResult> {
    let mut polls = 0;

    loop {
        polls += 1;
        let outcome = engine.request_match(request.clone()).await?;

        if outcome.is_matched() || Instant::now() >= deadline {
            return Ok(SimResult {
                participant_id: request.participant_id.clone(),
                outcome,
                polls,
            });
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Check that rooms hold exactly two participants who name each other
fn verify(results: &[SimResult]) -> Vec<String> {
    let mut violations = Vec::new();
    let mut rooms: HashMap<RoomId, Vec<(&ParticipantId, &ParticipantId)>> = HashMap::new();

    for result in results {
        if let MatchOutcome::Matched { room_id, partner_id } = &result.outcome {
            if partner_id == &result.participant_id {
                violations.push(format!("{} was matched with itself", partner_id));
            }
            rooms
                .entry(*room_id)
                .or_default()
                .push((&result.participant_id, partner_id));
        }
    }

    for (room_id, members) in &rooms {
        if members.len() > 2 {
            violations.push(format!("room {} has {} members", room_id, members.len()));
            continue;
        }
        if let [(a, a_partner), (b, b_partner)] = members.as_slice() {
            if a_partner != b || b_partner != a {
                violations.push(format!("room {} members disagree on partners", room_id));
            }
        }
    }

    violations
}

async fn run_simulation(
    participants: usize,
    languages: &str,
    poll_ms: u64,
    timeout_secs: u64,
    max_attempts: u32,
    seed: Option<u64>,
) -> Result<()> {
    let languages: Vec<&str> = languages
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if languages.is_empty() {
        return Err(anyhow!("At least one language is required"));
    }

    let engine = Arc::new(build_engine(max_attempts, seed));
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let started = Instant::now();

    println!(
        "🚀 Simulating {} participants across {} language(s)",
        participants,
        languages.len()
    );

    let handles: Vec<_> = (0..participants)
        .map(|i| {
            let engine = engine.clone();
            let language = languages[i % languages.len()];
            let request = MatchRequest::new(
                format!("sim_{:05}", i),
                MatchAttributes::for_language(language),
            );
            tokio::spawn(poll_until_matched(
                engine,
                request,
                Duration::from_millis(poll_ms),
                deadline,
            ))
        })
        .collect();

    let mut results = Vec::with_capacity(participants);
    for handle in handles {
        results.push(handle.await??);
    }

    let matched = results.iter().filter(|r| r.outcome.is_matched()).count();
    let total_polls: u32 = results.iter().map(|r| r.polls).sum();
    let stats = engine.get_stats().await?;

    println!("📊 Results after {:.2}s", started.elapsed().as_secs_f64());
    println!("   Matched: {}/{}", matched, participants);
    println!("   Still waiting: {}", stats.participants_waiting);
    println!("   Rooms: {}", stats.rooms_total);
    println!("   Requests: {} (polls: {})", stats.match_requests, total_polls);
    println!("   Candidate races: {}", stats.candidate_races);
    println!("   Self-match faults: {}", stats.self_match_faults);

    let violations = verify(&results);
    if violations.is_empty() {
        println!("✅ No participant ended up in two rooms");
        Ok(())
    } else {
        for violation in &violations {
            eprintln!("❌ {}", violation);
        }
        Err(anyhow!("{} invariant violation(s)", violations.len()))
    }
}

async fn run_scenario() -> Result<()> {
    let engine = build_engine(3, Some(1));
    let en = MatchAttributes::for_language("en");

    println!("1️⃣  u1 asks for a partner on an empty queue");
    let first = engine
        .request_match(MatchRequest::new("u1", en.clone()))
        .await?;
    println!("   → {:?}", first);

    println!("2️⃣  u2 asks for a partner");
    let second = engine
        .request_match(MatchRequest::new("u2", en.clone()))
        .await?;
    println!("   → {:?}", second);

    println!("3️⃣  u1 asks again and learns its room");
    let third = engine.request_match(MatchRequest::new("u1", en)).await?;
    println!("   → {:?}", third);

    if second.room_id().is_none() || second.room_id() != third.room_id() {
        return Err(anyhow!("u1 and u2 did not end up in the same room"));
    }

    println!("✅ Both participants share room {:?}", second.room_id());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            participants,
            languages,
            poll_ms,
            timeout_secs,
            max_attempts,
            seed,
        } => {
            run_simulation(
                participants,
                &languages,
                poll_ms,
                timeout_secs,
                max_attempts,
                seed,
            )
            .await
        }
        Commands::Scenario => run_scenario().await,
    }
}
