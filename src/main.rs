//! # MPF Self-Play
//!
//! Pits the hierarchy-driven tic-tac-toe agent against a random opponent and
//! reports the running score.
//!
//! ## Usage
//!
//! ```bash
//! # 200 games as nought
//! cargo run --release --bin mpf_selfplay -- --games 200 --side nought
//!
//! # Dump hierarchy snapshots every 50 evaluations
//! cargo run --release --bin mpf_selfplay -- --dump-period 50 --dump-path dumps/
//! ```

use clap::{Parser, ValueEnum};
use mpf_hierarchy::board::{outcome, BoardAgent, Outcome, Side, EMPTY};
use mpf_hierarchy::{HierarchyConfig, MpfResult, ReinforcementMode};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Cross,
    Nought,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Cross => Side::Cross,
            SideArg::Nought => Side::Nought,
        }
    }
}

/// Tic-tac-toe self-play for an MPF hierarchy
#[derive(Parser, Debug)]
#[command(name = "mpf_selfplay")]
#[command(about = "Train an MPF hierarchy by playing tic-tac-toe against a random opponent")]
struct Args {
    /// Number of games to play
    #[arg(long, short = 'g', default_value = "100")]
    games: usize,

    /// Side played by the hierarchy (cross moves first)
    #[arg(long, short = 's', value_enum, default_value = "nought")]
    side: SideArg,

    /// Hierarchy levels, leaves included
    #[arg(long, short = 'l', default_value = "3")]
    levels: usize,

    /// Dump a snapshot every N evaluations (0 disables)
    #[arg(long, default_value = "0")]
    dump_period: u64,

    /// Snapshot directory
    #[arg(long)]
    dump_path: Option<PathBuf>,

    /// Smooth the reward into its derivative with this decay
    #[arg(long)]
    derivative_decay: Option<f64>,

    /// Load the hierarchy configuration from a JSON file instead
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[arg(long, default_value = "42")]
    seed: u64,
}

impl Args {
    fn hierarchy_config(&self) -> MpfResult<HierarchyConfig> {
        if let Some(path) = &self.config {
            log::info!("Loading hierarchy config from {:?}", path);
            return HierarchyConfig::from_json_file(path);
        }

        let mut config = BoardAgent::default_config().with_seed(self.seed);
        config.levels = self.levels;
        if let Some(path) = &self.dump_path {
            config = config.with_dump(self.dump_period, path);
        }
        if let Some(decay) = self.derivative_decay {
            config = config.with_reinforcement(ReinforcementMode::Derivative { decay });
        }
        Ok(config)
    }
}

#[derive(Debug, Default)]
struct Score {
    wins: usize,
    losses: usize,
    draws: usize,
}

fn random_move(field: &mut Array2<f64>, side: Side, rng: &mut StdRng) {
    if let Some(cell) = field.iter_mut().filter(|c| **c == EMPTY).choose(rng) {
        *cell = side.value();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let side: Side = args.side.into();
    let mut agent = BoardAgent::with_config(side, args.hierarchy_config()?)?;
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));

    log::info!("MPF self-play: {} games as {:?}", args.games, side);

    let mut score = Score::default();
    let mut reinforcement = 0.0;

    for game in 0..args.games {
        let mut field = Array2::zeros((3, 3));
        let mut turn = Side::Cross;

        let result = loop {
            let flat: Vec<f64> = field.iter().copied().collect();
            if let Some(result) = outcome(&flat) {
                break result;
            }

            if turn == side {
                agent.make_move(&mut field, reinforcement)?;
            } else {
                random_move(&mut field, turn, &mut rng);
            }
            turn = turn.opponent();
        };

        // a draw counts as a success against a random player
        reinforcement = match result {
            Outcome::Win(winner) if winner == side => {
                score.wins += 1;
                1.0
            }
            Outcome::Win(_) => {
                score.losses += 1;
                -1.0
            }
            Outcome::Draw => {
                score.draws += 1;
                1.0
            }
        };

        log::debug!("Game {}: {:?}", game, result);
        if (game + 1) % 10 == 0 {
            log::info!(
                "After {} games: {} won, {} lost, {} drawn (t={})",
                game + 1,
                score.wins,
                score.losses,
                score.draws,
                agent.hierarchy().time()
            );
        }
    }

    println!(
        "Final score over {} games: {} won, {} lost, {} drawn",
        args.games, score.wins, score.losses, score.draws
    );
    Ok(())
}
