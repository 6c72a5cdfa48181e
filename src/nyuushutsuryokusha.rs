use colored::Colorize;
use env_logger::Env;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use kuizushiyou::libkuizu::db;
use kuizushiyou::libkuizu::db::StoredQuestion;
use kuizushiyou::libkuizu::shitsumon::{Difficulty, Question, QuestionKind};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "入出力者 (Nyūshutsuryokusha)")]
#[command(version, about = "Moves questions in and out of the quiz question bank", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,
    #[arg(short, long, value_name = "FILE", default_value = "questions.db")]
    db: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Adds every question in a JSON file to the bank
    Import { json: PathBuf },
    /// Writes the whole bank to a JSON file
    Export { json: PathBuf },
    /// Fetches questions from Open Trivia DB into the bank
    #[cfg(feature = "opentdb")]
    Download {
        #[arg(short = 'q', long, default_value = "50")]
        amount: u32,
        #[arg(short, long)]
        category: Option<u32>,
        #[arg(short, long, value_enum)]
        difficulty: Option<Difficulty>,
        #[arg(short, long, value_enum)]
        kind: Option<QuestionKind>,
    },
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct KuizuJson {
    categories: Vec<CategoryJson>,
}
#[derive(Serialize, Deserialize, Debug)]
struct CategoryJson {
    name: String,
    questions: Vec<QuestionJson>,
}
#[derive(Serialize, Deserialize, Debug)]
struct QuestionJson {
    question: Option<String>,
    correct_answer: Option<String>,
    #[serde(default)]
    incorrect_answers: Vec<String>,
    #[serde(rename = "type", default)]
    kind: Option<QuestionKind>,
    #[serde(default)]
    difficulty: Option<Difficulty>,
}

impl QuestionJson {
    fn from_question(question: &Question) -> Self {
        Self {
            question: Some(question.prompt.clone()),
            correct_answer: Some(question.correct_answer.clone()),
            incorrect_answers: question.distractors.clone(),
            kind: Some(question.kind),
            difficulty: question.difficulty,
        }
    }

    fn to_question(&self, category: &str) -> Option<Question> {
        if !validate_question(self) {
            return None;
        }
        let kind = self.kind.unwrap_or(if self.incorrect_answers.len() == 1 {
            QuestionKind::TrueFalse
        } else {
            QuestionKind::MultipleChoice
        });
        Some(
            Question::new(
                self.question.clone().unwrap_or_default(),
                self.correct_answer.clone().unwrap_or_default(),
                self.incorrect_answers.clone(),
                kind,
            )
            .with_category(Some(category.to_string()))
            .with_difficulty(self.difficulty),
        )
    }
}

const UNCATEGORISED: &str = "Uncategorised";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();

    info!("{}", format!("Database at {:?}", args.db).cyan());
    let conn = match db::create_or_open(&args.db) {
        Ok(d) => d,
        Err(e) => {
            error!("{}{}", "Unable to open Database: ".red(), e);
            std::process::exit(1);
        }
    };

    let outcome = match args.command {
        Commands::Import { json } => import(&conn, &json),
        Commands::Export { json } => export(&conn, &json),
        #[cfg(feature = "opentdb")]
        Commands::Download {
            amount,
            category,
            difficulty,
            kind,
        } => {
            let config = kuizushiyou::libkuizu::source::QuizConfig {
                category: category.map(|c| c.to_string()),
                difficulty,
                amount,
                kind,
            };
            download(&conn, config).await
        }
    };

    let closed = db::close_db(conn);
    if let Err(e) = outcome {
        error!("{}", e.to_string().red());
        std::process::exit(1);
    }
    if let Err(e) = closed {
        error!("{}{}", "Unable to close Database: ".red(), e);
        std::process::exit(1);
    }
}

fn import(conn: &Connection, json_file: &Path) -> kuizushiyou::libkuizu::Result<()> {
    let json = std::fs::read_to_string(json_file)?;
    let content: KuizuJson = serde_json::from_str(json.as_str())?;
    info!(
        "{}",
        format!(
            "Importing data... ({} Categories)",
            content.categories.len()
        )
        .blue()
    );

    let mut added = 0;
    for category in &content.categories {
        info!(
            "{}",
            format!(
                "├ Category: {} ({} Questions)",
                category.name,
                category.questions.len()
            )
            .blue()
        );
        for raw in &category.questions {
            match raw.to_question(&category.name) {
                Some(question) => {
                    if store(conn, &question)? {
                        added += 1;
                    }
                }
                None => error!(
                    "{} {}",
                    "│".blue(),
                    format!(
                        "├ ✘ Question: {:?} (Missing `question`, `correct_answer` or `incorrect_answers`)",
                        raw
                    )
                    .red()
                    .strikethrough()
                ),
            }
        }
    }
    info!("{}", format!("Imported {} questions.", added).green());
    Ok(())
}

fn store(conn: &Connection, question: &Question) -> kuizushiyou::libkuizu::Result<bool> {
    if StoredQuestion::exists(conn, &question.prompt)? {
        warn!("{} {}", "│".blue(), format!("├ Already in bank: {:?}", question.prompt).yellow());
        return Ok(false);
    }
    StoredQuestion::add(conn, question)?;
    info!("{} {}", "│".blue(), format!("├ Question: {:?}", question.prompt).green());
    Ok(true)
}

fn export(conn: &Connection, json_file: &Path) -> kuizushiyou::libkuizu::Result<()> {
    let mut grouped: BTreeMap<String, Vec<QuestionJson>> = BTreeMap::new();
    for stored in StoredQuestion::get_all(conn)? {
        let category = stored
            .question
            .category
            .clone()
            .unwrap_or_else(|| UNCATEGORISED.to_string());
        grouped
            .entry(category)
            .or_default()
            .push(QuestionJson::from_question(&stored.question));
    }

    let content = KuizuJson {
        categories: grouped
            .into_iter()
            .map(|(name, questions)| CategoryJson { name, questions })
            .collect(),
    };
    std::fs::write(json_file, serde_json::to_string_pretty(&content)?)?;
    info!(
        "{}",
        format!(
            "Exported {} Categories to {:?}",
            content.categories.len(),
            json_file
        )
        .green()
    );
    Ok(())
}

#[cfg(feature = "opentdb")]
async fn download(
    conn: &Connection,
    config: kuizushiyou::libkuizu::source::QuizConfig,
) -> kuizushiyou::libkuizu::Result<()> {
    use kuizushiyou::libkuizu::source::{OpenTdbSource, QuestionSource};

    let questions = OpenTdbSource::default().fetch(&config).await?;
    info!(
        "{}",
        format!("Downloaded {} questions.", questions.len()).blue()
    );
    let mut added = 0;
    for question in &questions {
        if store(conn, question)? {
            added += 1;
        }
    }
    info!("{}", format!("Added {} new questions.", added).green());
    Ok(())
}

fn validate_question(question: &QuestionJson) -> bool {
    let present = |s: &Option<String>| s.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
    let answers_ok = match question.kind {
        Some(QuestionKind::TrueFalse) => question.incorrect_answers.len() == 1,
        _ => !question.incorrect_answers.is_empty(),
    };
    present(&question.question) && present(&question.correct_answer) && answers_ok
}
