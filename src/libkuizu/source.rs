//! Where quiz questions come from.

use crate::libkuizu::db::{self, BankFilter};
use crate::libkuizu::error::{Error, Result};
use crate::libkuizu::shitsumon::{decode_html, Difficulty, Question, QuestionKind};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::path::PathBuf;

pub const OPENTDB_API: &str = "https://opentdb.com/api.php";
pub const OPENTDB_CATEGORIES: &str = "https://opentdb.com/api_category.php";
/// Largest batch Open Trivia DB serves per request.
pub const MAX_AMOUNT: u32 = 50;

/// What the player asked for on the setup screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizConfig {
    /// Open Trivia DB category id, or a category name for the local bank.
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub amount: u32,
    pub kind: Option<QuestionKind>,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            category: None,
            difficulty: None,
            amount: 10,
            kind: None,
        }
    }
}

impl QuizConfig {
    pub fn validate(&self) -> Result<()> {
        if self.amount == 0 || self.amount > MAX_AMOUNT {
            return Err(Error::Config(format!(
                "question count must be between 1 and {}, got {}",
                MAX_AMOUNT, self.amount
            )));
        }
        Ok(())
    }

    /// Builds the Open Trivia DB request URL for this config.
    pub fn opentdb_url(&self, base: &str) -> Result<String> {
        let mut url = format!("{}?amount={}", base, self.amount);
        if let Some(category) = &self.category {
            let id: u32 = category.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "Open Trivia DB categories are numeric ids, got {:?}",
                    category
                ))
            })?;
            url.push_str(&format!("&category={}", id));
        }
        if let Some(difficulty) = self.difficulty {
            url.push_str(&format!("&difficulty={}", difficulty.as_api_str()));
        }
        if let Some(kind) = self.kind {
            url.push_str(&format!("&type={}", kind.as_api_str()));
        }
        Ok(url)
    }

    pub fn bank_filter(&self) -> BankFilter {
        BankFilter {
            category: self.category.clone(),
            difficulty: self.difficulty,
            kind: self.kind,
        }
    }
}

/// Supplies questions for a quiz. Implementations do not retry on their own.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch(&self, config: &QuizConfig) -> Result<Vec<Question>>;

    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    response_code: u8,
    #[serde(default)]
    results: Vec<ApiQuestion>,
}

#[derive(Debug, Deserialize)]
struct ApiQuestion {
    #[serde(rename = "type")]
    kind: String,
    difficulty: String,
    category: String,
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriviaCategory {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    trivia_categories: Vec<TriviaCategory>,
}

fn response_code_message(code: u8) -> &'static str {
    match code {
        1 => "Not enough questions for these settings. Please try different settings.",
        2 => "The question service rejected these settings. Please try different settings.",
        3 | 4 => "The question service session expired. Please try again.",
        5 => "Too many requests. Wait a few seconds and try again.",
        _ => "Failed to fetch questions. Please try different settings.",
    }
}

/// Parses an `api.php` response body, decoding entities in every text field.
pub fn parse_questions(body: &str) -> Result<Vec<Question>> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| Error::FetchFailure(format!("Unreadable question data: {}", e)))?;
    if response.response_code != 0 {
        warn!("[Source] Open Trivia DB answered with code {}", response.response_code);
        return Err(Error::FetchFailure(
            response_code_message(response.response_code).to_string(),
        ));
    }

    Ok(response
        .results
        .into_iter()
        .map(|q| {
            let kind = QuestionKind::from_api_str(&q.kind).unwrap_or_else(|| {
                warn!("[Source] Unknown question type {:?}", q.kind);
                QuestionKind::MultipleChoice
            });
            Question::from_encoded(&q.question, &q.correct_answer, &q.incorrect_answers, kind)
                .with_category(Some(decode_html(&q.category)))
                .with_difficulty(Difficulty::from_api_str(&q.difficulty))
        })
        .collect())
}

pub fn parse_categories(body: &str) -> Result<Vec<TriviaCategory>> {
    let response: CategoryResponse = serde_json::from_str(body)?;
    Ok(response.trivia_categories)
}

#[cfg(feature = "opentdb")]
pub use self::opentdb::OpenTdbSource;

#[cfg(feature = "opentdb")]
mod opentdb {
    use super::*;

    /// Questions from the public Open Trivia DB.
    #[derive(Debug, Clone)]
    pub struct OpenTdbSource {
        client: reqwest::Client,
        base_url: String,
        categories_url: String,
    }

    impl Default for OpenTdbSource {
        fn default() -> Self {
            Self::new(OPENTDB_API, OPENTDB_CATEGORIES)
        }
    }

    impl OpenTdbSource {
        pub fn new(base_url: impl Into<String>, categories_url: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: base_url.into(),
                categories_url: categories_url.into(),
            }
        }

        async fn get(&self, url: &str) -> Result<String> {
            debug!("[Source] GET {}", url);
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::FetchFailure(format!("Could not reach the question service: {}", e)))?;
            let response = response.error_for_status()?;
            Ok(response.text().await?)
        }

        pub async fn categories(&self) -> Result<Vec<TriviaCategory>> {
            let body = self.get(&self.categories_url).await?;
            parse_categories(&body)
        }
    }

    #[async_trait]
    impl QuestionSource for OpenTdbSource {
        async fn fetch(&self, config: &QuizConfig) -> Result<Vec<Question>> {
            config.validate()?;
            let url = config.opentdb_url(&self.base_url)?;
            let body = self.get(&url).await?;
            let questions = parse_questions(&body)?;
            debug!("[Source] Open Trivia DB sent {} questions", questions.len());
            Ok(questions)
        }

        fn name(&self) -> &str {
            "Open Trivia DB"
        }
    }
}

/// Questions drawn at random from a local sqlite bank.
#[derive(Debug, Clone)]
pub struct BankSource {
    path: PathBuf,
}

impl BankSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl QuestionSource for BankSource {
    async fn fetch(&self, config: &QuizConfig) -> Result<Vec<Question>> {
        config.validate()?;
        let path = self.path.clone();
        let filter = config.bank_filter();
        let amount = config.amount as usize;
        let picked = tokio::task::spawn_blocking(move || -> Result<Vec<Question>> {
            if !path.exists() {
                return Err(Error::FetchFailure(format!(
                    "No question bank at {:?}. Import some questions first!",
                    path
                )));
            }
            let conn = db::open_db(&path)?;
            let picked = db::pick_questions(&conn, &filter, amount);
            db::close_db(conn)?;
            Ok(picked?)
        })
        .await
        .map_err(|e| Error::FetchFailure(format!("Question bank task failed: {}", e)))??;

        if !picked.is_empty() && picked.len() < amount {
            warn!(
                "[Source] Bank only has {} of the {} requested questions",
                picked.len(),
                amount
            );
        }
        Ok(picked)
    }

    fn name(&self) -> &str {
        "question bank"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libkuizu::db::StoredQuestion;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "response_code": 0,
        "results": [
            {
                "type": "multiple",
                "difficulty": "easy",
                "category": "Entertainment: Video Games",
                "question": "Which company made &quot;Pok&eacute;mon&quot;?",
                "correct_answer": "Game Freak",
                "incorrect_answers": ["Capcom", "Konami", "Sega &amp; Co"]
            },
            {
                "type": "boolean",
                "difficulty": "hard",
                "category": "Science &amp; Nature",
                "question": "The sun is a star.",
                "correct_answer": "True",
                "incorrect_answers": ["False"]
            }
        ]
    }"#;

    #[test]
    fn test_parse_questions_decodes_entities() {
        let questions = parse_questions(SAMPLE).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].prompt, "Which company made \"Pokémon\"?");
        assert_eq!(questions[0].distractors[2], "Sega & Co");
        assert_eq!(questions[0].difficulty, Some(Difficulty::Easy));
        assert_eq!(questions[1].kind, QuestionKind::TrueFalse);
        assert_eq!(questions[1].category.as_deref(), Some("Science & Nature"));
    }

    #[test]
    fn test_nonzero_response_code_is_a_fetch_failure() {
        let err = parse_questions(r#"{"response_code": 1, "results": []}"#).unwrap_err();
        assert!(matches!(err, Error::FetchFailure(ref msg) if msg.starts_with("Not enough questions")));
    }

    #[test]
    fn test_garbage_body_is_a_fetch_failure() {
        assert!(matches!(
            parse_questions("<html>down</html>"),
            Err(Error::FetchFailure(_))
        ));
    }

    #[test]
    fn test_opentdb_url() {
        let config = QuizConfig {
            category: Some("9".into()),
            difficulty: Some(Difficulty::Medium),
            amount: 5,
            kind: Some(QuestionKind::TrueFalse),
        };
        assert_eq!(
            config.opentdb_url(OPENTDB_API).unwrap(),
            "https://opentdb.com/api.php?amount=5&category=9&difficulty=medium&type=boolean"
        );
        assert_eq!(
            QuizConfig::default().opentdb_url(OPENTDB_API).unwrap(),
            "https://opentdb.com/api.php?amount=10"
        );
        let named = QuizConfig {
            category: Some("History".into()),
            ..Default::default()
        };
        assert!(matches!(named.opentdb_url(OPENTDB_API), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_amount() {
        assert!(QuizConfig { amount: 0, ..Default::default() }.validate().is_err());
        assert!(QuizConfig { amount: 51, ..Default::default() }.validate().is_err());
        assert!(QuizConfig { amount: 50, ..Default::default() }.validate().is_ok());
    }

    #[test]
    fn test_parse_categories() {
        let body = r#"{"trivia_categories":[{"id":9,"name":"General Knowledge"}]}"#;
        assert_eq!(
            parse_categories(body).unwrap(),
            vec![TriviaCategory { id: 9, name: "General Knowledge".into() }]
        );
    }

    #[tokio::test]
    async fn test_bank_source_picks_from_sqlite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("questions.db");
        let conn = db::create_or_open(&path).unwrap();
        for q in parse_questions(SAMPLE).unwrap() {
            StoredQuestion::add(&conn, &q).unwrap();
        }
        db::close_db(conn).unwrap();

        let source = BankSource::new(&path);
        let config = QuizConfig {
            kind: Some(QuestionKind::TrueFalse),
            ..Default::default()
        };
        let questions = source.fetch(&config).await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].prompt, "The sun is a star.");
    }

    #[tokio::test]
    async fn test_missing_bank_is_a_fetch_failure() {
        let dir = tempdir().unwrap();
        let source = BankSource::new(dir.path().join("nope.db"));
        let err = source.fetch(&QuizConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::FetchFailure(_)));
    }
}
