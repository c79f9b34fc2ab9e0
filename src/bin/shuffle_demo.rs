use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use num_bigint::BigUint;
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mental_poker::config::{
    EngineConfig, DEFAULT_PRIME_BITS, DEFAULT_TURN_TIMEOUT_MS, KEYGEN_ATTEMPTS_VAR,
    PRIME_BITS_VAR, TURN_TIMEOUT_VAR,
};
use mental_poker::ledger::{ActionLog, InMemoryActionLog};
use mental_poker::protocol::{GameDriver, PokerAction, Progress};
use mental_poker::recipes;
use mental_poker::session::{Identity, Session};
use mental_poker::sra::DEFAULT_KEYGEN_ATTEMPTS;
use mental_poker::tokio_tools::spawn_player_task;
use mental_poker::types::{ClientId, Roster};

const LOG_TARGET: &str = "bin::shuffle_demo";

#[derive(Debug, Parser)]
#[command(name = "shuffle_demo")]
#[command(about = "Shuffle and deal a deck among in-memory players without a trusted dealer", long_about = None)]
struct Args {
    /// Number of seated players
    #[arg(long, default_value_t = 3)]
    players: usize,

    /// Number of cards in the deck
    #[arg(long, default_value_t = 52)]
    deck: u32,

    /// Cards dealt privately to each player
    #[arg(long, default_value_t = 2)]
    hand: usize,

    /// Open every dealt card to the table after the deal
    #[arg(long, default_value_t = false)]
    showdown: bool,

    /// Bit length of the shared SRA prime
    #[arg(long, env = PRIME_BITS_VAR, default_value_t = DEFAULT_PRIME_BITS)]
    prime_bits: u64,

    /// Retry budget for drawing an SRA exponent
    #[arg(long, env = KEYGEN_ATTEMPTS_VAR, default_value_t = DEFAULT_KEYGEN_ATTEMPTS)]
    keygen_attempts: usize,

    /// Milliseconds to wait for an expected move before forfeiting
    #[arg(long, env = TURN_TIMEOUT_VAR, default_value_t = DEFAULT_TURN_TIMEOUT_MS)]
    turn_timeout_ms: u64,

    /// Optional RNG seed for reproducible keys and shuffles
    #[arg(long, env = "DEMO_RNG_SEED")]
    rng_seed: Option<u64>,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "DEMO_LOG_JSON", default_value_t = false)]
    json: bool,
}

struct Seat {
    client_id: ClientId,
    hand: BTreeMap<usize, BigUint>,
    opened: BTreeMap<usize, BigUint>,
    security_events: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json)?;

    if args.players == 0 {
        return Err(anyhow!("at least one player is required"));
    }
    let dealt = args.players * args.hand;
    if dealt > args.deck as usize {
        return Err(anyhow!(
            "cannot deal {} cards each to {} players from a {}-card deck",
            args.hand,
            args.players,
            args.deck
        ));
    }

    let config = EngineConfig {
        prime_bits: args.prime_bits,
        keygen_attempts: args.keygen_attempts,
        turn_timeout_ms: args.turn_timeout_ms,
    };
    let seats = play(&args, &config, dealt).await?;

    for seat in &seats {
        let hand: Vec<String> = seat.hand.values().map(ToString::to_string).collect();
        info!(
            target: LOG_TARGET,
            client_id = %seat.client_id,
            hand = %hand.join(","),
            security_events = seat.security_events,
            "final hand"
        );
    }
    if args.showdown {
        let reference = &seats[0].opened;
        if seats.iter().any(|seat| &seat.opened != reference) {
            return Err(anyhow!("players disagree on the opened cards"));
        }
        for seat in &seats {
            for (position, card) in &seat.hand {
                if reference.get(position) != Some(card) {
                    return Err(anyhow!(
                        "{} was dealt {card} at position {position} but the table opened something else",
                        seat.client_id
                    ));
                }
            }
        }
        info!(target: LOG_TARGET, opened = reference.len(), "showdown consistent");
    }
    Ok(())
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

async fn play(args: &Args, config: &EngineConfig, dealt: usize) -> Result<Vec<Seat>> {
    let names: Vec<String> = (0..args.players).map(|idx| format!("player-{idx}")).collect();
    let roster = Roster::new(names.iter().cloned())?;
    let cards: Vec<BigUint> = (2..2 + args.deck).map(BigUint::from).collect();
    let log: Arc<dyn ActionLog> = Arc::new(InMemoryActionLog::new());

    let mut recipe = recipes::setup_and_shuffle(&roster).then(recipes::deal_hands(&roster, args.hand));
    if args.showdown {
        recipe = recipe.then(recipes::reveal_all(&roster, 0..dealt));
    }

    let mut seed_rng = args
        .rng_seed
        .map(StdRng::seed_from_u64)
        .unwrap_or_else(StdRng::from_entropy);

    let mut handles = Vec::with_capacity(roster.len());
    for client_id in roster.iter() {
        let identity = Identity::generate(client_id.clone(), &mut seed_rng);
        let player_rng = StdRng::from_rng(&mut seed_rng).context("failed to seed player rng")?;
        let log = Arc::clone(&log);
        let roster = roster.clone();
        let cards = cards.clone();
        let config = config.clone();
        let recipe = recipe.clone();
        handles.push(spawn_player_task(client_id, async move {
            let session = Session::<PokerAction>::establish(log, identity, roster).await?;
            let mut driver = GameDriver::with_rng(session, cards, &config, player_rng)?;
            let progress = driver.run(recipe).await?;
            Ok::<_, mental_poker::Error>((progress, driver))
        }));
    }

    let mut seats = Vec::with_capacity(handles.len());
    for handle in handles {
        let (progress, driver) = handle.await.context("player task panicked")??;
        match progress {
            Progress::Completed => {}
            Progress::Forfeited(stalled) => {
                return Err(anyhow!("game forfeited; stalled players: {stalled:?}"))
            }
            Progress::AwaitingLocal(kinds) => {
                return Err(anyhow!("unexpected local decision requested: {kinds:?}"))
            }
        }
        seats.push(Seat {
            client_id: driver.client_id().clone(),
            hand: driver.player().hand().clone(),
            opened: driver.machine().public_state().opened().clone(),
            security_events: driver.security_events().len(),
        });
    }
    Ok(seats)
}
