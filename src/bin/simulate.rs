use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use clap::Parser;
use event_roster_server::config::SceneConfig;
use event_roster_server::constants::{FALLBACK_SPRITE, SPIN_CYCLES, SPRITE_OPTIONS};
use event_roster_server::draw::{DrawEngine, SpinStep};
use event_roster_server::identity;
use event_roster_server::motion;
use event_roster_server::reconcile::reconcile;
use event_roster_server::rng::{RandomSource, Rng};
use event_roster_server::types::{AnimatedEntity, AttendeeRecord, MotionState};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Attendees on the roster before the first tick.
    #[arg(long, default_value_t = 30)]
    attendees: usize,
    #[arg(long, default_value_t = 1_500)]
    ticks: u64,
    /// Reconcile a changed snapshot every N ticks; 0 disables churn.
    #[arg(long, default_value_t = 250)]
    churn_every: u64,
    #[arg(long, default_value_t = 2_000)]
    draws: u32,
    #[arg(long, default_value_t = SPIN_CYCLES)]
    spin_cycles: u32,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    seed: u32,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    ticks: u64,
    #[serde(rename = "finalRoster")]
    final_roster: usize,
    reconciles: u32,
    draws: u32,
    #[serde(rename = "winnerCounts")]
    winner_counts: BTreeMap<String, u32>,
    #[serde(rename = "maxShareDeviation")]
    max_share_deviation: f64,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

struct Anomalies {
    messages: Vec<String>,
    records: Vec<AnomalyRecord>,
    seen: HashSet<String>,
}

impl Anomalies {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn push(&mut self, tick: u64, message: String) {
        self.records.push(AnomalyRecord {
            tick,
            message: message.clone(),
        });
        if self.seen.insert(message.clone()) {
            self.messages.push(message);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let seed = normalize_seed(cli.seed.unwrap_or_else(now_ms));
    let started_at_ms = now_ms();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(seed, started_at_ms));

    emit_log(
        "info",
        "run_started",
        &run_id,
        None,
        json!({
            "seed": seed,
            "attendees": cli.attendees,
            "ticks": cli.ticks,
            "churnEvery": cli.churn_every,
            "draws": cli.draws,
            "spinCycles": cli.spin_cycles,
        }),
    );

    let scene = SceneConfig::default();
    let mut rng = Rng::new(seed);
    let mut anomalies = Anomalies::new();

    let mut roster: Vec<AttendeeRecord> = (0..cli.attendees)
        .map(|index| make_record(index, &mut rng))
        .collect();
    let mut next_index = cli.attendees;
    let mut entities = reconcile(&[], &roster, &scene, FALLBACK_SPRITE, &mut rng);
    let mut reconciles = 1u32;
    check_reconcile(0, &[], &roster, &entities, &mut anomalies);

    for tick in 1..=cli.ticks {
        entities = motion::step(&entities, &scene, &mut rng);
        for entity in &entities {
            if !scene.bounds.contains(entity.motion.position) {
                anomalies.push(
                    tick,
                    format!(
                        "entity {} left the scene at ({:.2}, {:.2})",
                        entity.id, entity.motion.position.x, entity.motion.position.y
                    ),
                );
            }
        }

        if cli.churn_every > 0 && tick % cli.churn_every == 0 {
            roster = churn(&roster, &mut next_index, &mut rng);
            let previous = entities;
            entities = reconcile(&previous, &roster, &scene, FALLBACK_SPRITE, &mut rng);
            reconciles += 1;
            check_reconcile(tick, &previous, &roster, &entities, &mut anomalies);
            emit_log(
                "info",
                "roster_reconciled",
                &run_id,
                Some(tick),
                json!({ "roster": roster.len() }),
            );
        }
    }

    let ids: Vec<String> = entities.iter().map(|entity| entity.id.clone()).collect();
    let winner_counts = run_draws(&ids, cli.draws, cli.spin_cycles, &mut rng, &mut anomalies);
    let max_share_deviation = share_deviation(&winner_counts, ids.len(), cli.draws);
    // Below a few thousand draws the spread is dominated by noise.
    if cli.draws >= 5_000 && !ids.is_empty() && max_share_deviation > 0.05 {
        anomalies.push(
            cli.ticks,
            format!("winner distribution skewed: max deviation {max_share_deviation:.4}"),
        );
    }

    for anomaly in &anomalies.records {
        emit_log(
            "warn",
            "anomaly_detected",
            &run_id,
            Some(anomaly.tick),
            json!({ "message": anomaly.message }),
        );
    }

    let summary = RunSummary {
        run_id: run_id.clone(),
        seed,
        started_at_ms,
        finished_at_ms: now_ms(),
        ticks: cli.ticks,
        final_roster: entities.len(),
        reconciles,
        draws: cli.draws,
        winner_counts,
        max_share_deviation,
        anomalies: anomalies.messages.clone(),
    };

    println!(
        "{}",
        serde_json::to_string(&summary).expect("run summary should serialize")
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &run_id,
        Some(cli.ticks),
        json!({
            "anomalyCount": anomalies.records.len(),
            "maxShareDeviation": max_share_deviation,
            "summaryOut": summary_out_written,
        }),
    );

    if !anomalies.messages.is_empty() {
        std::process::exit(1);
    }
}

fn make_record<R: RandomSource>(index: usize, rng: &mut R) -> AttendeeRecord {
    let sprite = SPRITE_OPTIONS[rng.pick_index(SPRITE_OPTIONS.len())];
    let photo = rng
        .bool(0.5)
        .then(|| format!("https://photos.invalid/{index}.jpg"));
    AttendeeRecord {
        id: format!("sim_{index:05}"),
        name: format!("Attendee {index}"),
        created_at: created_at_for(index),
        packed_identity: identity::encode(sprite, photo.as_deref()),
        is_winner: false,
    }
}

fn created_at_for(index: usize) -> DateTime<Utc> {
    let base = Utc
        .timestamp_opt(1_735_689_600, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    base + ChronoDuration::seconds(index as i64)
}

/// Next snapshot: one departure, one or two arrivals, one rename. Newest first,
/// like the stores hand it out.
fn churn<R: RandomSource>(
    roster: &[AttendeeRecord],
    next_index: &mut usize,
    rng: &mut R,
) -> Vec<AttendeeRecord> {
    let mut next: Vec<AttendeeRecord> = roster.to_vec();
    if !next.is_empty() {
        next.remove(rng.pick_index(next.len()));
    }
    if !next.is_empty() {
        let renamed = rng.pick_index(next.len());
        next[renamed].name = format!("{} (renamed)", next[renamed].name);
    }
    let arrivals = if rng.bool(0.5) { 2 } else { 1 };
    for _ in 0..arrivals {
        next.push(make_record(*next_index, rng));
        *next_index += 1;
    }
    next.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    next
}

fn check_reconcile(
    tick: u64,
    previous: &[AnimatedEntity],
    snapshot: &[AttendeeRecord],
    entities: &[AnimatedEntity],
    anomalies: &mut Anomalies,
) {
    let snapshot_ids: Vec<&str> = snapshot.iter().map(|record| record.id.as_str()).collect();
    let entity_ids: Vec<&str> = entities.iter().map(|entity| entity.id.as_str()).collect();
    if snapshot_ids != entity_ids {
        anomalies.push(tick, "entity order diverged from snapshot".to_string());
    }

    let before: HashMap<&str, &MotionState> = previous
        .iter()
        .map(|entity| (entity.id.as_str(), &entity.motion))
        .collect();
    for (entity, record) in entities.iter().zip(snapshot) {
        if let Some(motion) = before.get(entity.id.as_str()) {
            if **motion != entity.motion {
                anomalies.push(tick, format!("motion reset for surviving id {}", entity.id));
            }
        }
        if entity.name != record.name || entity.is_winner != record.is_winner {
            anomalies.push(tick, format!("stale business fields for {}", entity.id));
        }
    }
}

fn run_draws<R: RandomSource>(
    ids: &[String],
    draws: u32,
    spin_cycles: u32,
    rng: &mut R,
    anomalies: &mut Anomalies,
) -> BTreeMap<String, u32> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut engine = DrawEngine::new(spin_cycles);
    for draw in 0..draws {
        if engine.start(ids.to_vec()).is_err() {
            // An empty roster is the only way to get here.
            break;
        }
        let mut rolls = 0u32;
        let winner = loop {
            match engine.spin(rng) {
                Some(SpinStep::Rolling { .. }) => rolls += 1,
                Some(SpinStep::Revealed { winner_id, .. }) => break Some(winner_id),
                None => break None,
            }
        };
        let Some(winner) = winner else {
            anomalies.push(u64::from(draw), "draw stopped without a winner".to_string());
            continue;
        };
        if rolls != spin_cycles {
            anomalies.push(
                u64::from(draw),
                format!("draw rolled {rolls} times instead of {spin_cycles}"),
            );
        }
        if !ids.contains(&winner) {
            anomalies.push(u64::from(draw), format!("winner {winner} not on roster"));
        }
        *counts.entry(winner).or_insert(0) += 1;
        engine.dismiss();
    }
    counts
}

fn share_deviation(counts: &BTreeMap<String, u32>, roster: usize, draws: u32) -> f64 {
    if roster == 0 || draws == 0 {
        return 0.0;
    }
    let expected = 1.0 / roster as f64;
    let drawn: u32 = counts.values().sum();
    if drawn == 0 {
        return 0.0;
    }
    // Attendees never drawn count as a share of zero.
    let missing = roster.saturating_sub(counts.len());
    let observed = counts
        .values()
        .map(|count| (*count as f64 / drawn as f64 - expected).abs())
        .fold(0.0f64, f64::max);
    if missing > 0 {
        observed.max(expected)
    } else {
        observed
    }
}

fn normalize_seed(seed: u64) -> u32 {
    (seed % u64::from(u32::MAX)) as u32
}

fn default_run_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn emit_log(level: &str, event: &str, run_id: &str, tick: Option<u64>, details: Value) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        run_id: run_id.to_string(),
        tick,
        details,
    };
    eprintln!(
        "{}",
        serde_json::to_string(&log_line).expect("structured log should serialize")
    );
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).expect("run summary should serialize");
    std::fs::write(path, summary_text)
}
