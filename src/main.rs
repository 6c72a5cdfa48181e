use cfg_if::cfg_if;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use env_logger::Env;
use kuizushiyou::libkuizu::db;
use kuizushiyou::libkuizu::db::Category;
use kuizushiyou::libkuizu::engine::{QuizEngine, QuizRules};
use kuizushiyou::libkuizu::error::{Error, Result};
use kuizushiyou::libkuizu::shitsumon::{Difficulty, QuestionKind};
use kuizushiyou::libkuizu::source::{BankSource, QuestionSource, QuizConfig};
use kuizushiyou::libkuizu::timer::TokioCountdown;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

mod cli;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// The public Open Trivia DB
    #[cfg(feature = "opentdb")]
    Opentdb,
    /// A local question bank filled by `nyuushutsuryokusha`
    Bank,
}

cfg_if! {
    if #[cfg(feature = "opentdb")] {
        use kuizushiyou::libkuizu::source::OpenTdbSource;
        const DEFAULT_SOURCE: SourceKind = SourceKind::Opentdb;
    } else {
        const DEFAULT_SOURCE: SourceKind = SourceKind::Bank;
    }
}

#[derive(Parser, Debug)]
#[command(name = "クイズしよう！ (Kuizushiyō!)")]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_enum, default_value_t = DEFAULT_SOURCE)]
    source: SourceKind,
    #[arg(long, value_name = "FILE", default_value = "questions.db")]
    db: PathBuf,
    /// Open Trivia DB category id, or a category name in the local bank
    #[arg(short, long)]
    category: Option<String>,
    #[arg(short, long, value_enum)]
    difficulty: Option<Difficulty>,
    #[arg(short = 'q', long, default_value = "10")]
    amount: u32,
    #[arg(short, long, value_enum)]
    kind: Option<QuestionKind>,
    #[arg(short, long, default_value = "60")]
    time_limit: u32,
    #[arg(short, long, default_value = "10")]
    points: u32,
    /// Fixes the order options are shown in
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    list_categories: bool,
    #[arg(short, long, default_value = "error")]
    log_level: String,
}

fn source_for(args: &Args) -> Arc<dyn QuestionSource> {
    match args.source {
        #[cfg(feature = "opentdb")]
        SourceKind::Opentdb => Arc::new(OpenTdbSource::default()),
        SourceKind::Bank => Arc::new(BankSource::new(args.db.clone())),
    }
}

async fn list_categories(args: &Args) -> Result<()> {
    match args.source {
        #[cfg(feature = "opentdb")]
        SourceKind::Opentdb => {
            for category in OpenTdbSource::default().categories().await? {
                println!("{:>4}  {}", category.id.to_string().cyan(), category.name);
            }
        }
        SourceKind::Bank => {
            if !args.db.exists() {
                println!("{}", format!("No question bank at {:?}.", args.db).yellow());
                return Ok(());
            }
            let conn = db::open_db(&args.db)?;
            let categories = Category::get_all(&conn);
            db::close_db(conn)?;
            for category in categories? {
                println!("{}", category.name);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();
    debug!("[Setup] {:?}", args);

    if args.list_categories {
        return list_categories(&args).await;
    }

    let config = QuizConfig {
        category: args.category.clone(),
        difficulty: args.difficulty,
        amount: args.amount,
        kind: args.kind,
    };
    config.validate()?;
    let rules = QuizRules {
        time_limit_secs: args.time_limit,
        points_per_correct: args.points,
    };

    let (tick_tx, tick_rx) = mpsc::unbounded_channel();
    let mut engine = QuizEngine::new(Box::new(TokioCountdown::new(tick_tx))).with_rules(rules)?;
    if let Some(seed) = args.seed {
        engine = engine.with_rng(StdRng::seed_from_u64(seed));
    }

    let source = source_for(&args);
    println!(
        "{}",
        format!(
            "==========> クイズしよう！ ({} questions, {}s each) <==========",
            config.amount, rules.time_limit_secs
        )
        .cyan()
    );
    cli::Cli::new(engine, source, tick_rx).run(config).await
}
