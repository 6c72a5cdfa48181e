use crate::libkuizu::shitsumon::{Difficulty, Question, QuestionKind};
use log::{debug, error, info, warn};
use rand::rng;
use rand::seq::IndexedRandom;
use rusqlite::{named_params, params, Connection, DatabaseName, OptionalExtension, Result, Row, ToSql};
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
}

/// A question as stored in the bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredQuestion {
    pub id: Option<i64>,
    pub question: Question,
}

/// Which bank questions qualify for a quiz. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankFilter {
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub kind: Option<QuestionKind>,
}

impl Category {
    pub fn new(connection: &Connection, name: String) -> Result<()> {
        match connection.execute("INSERT INTO Category(name) VALUES (?1)", params![name]) {
            Ok(_) => {
                debug!("[DB] Created new Category '{}'", name);
                Ok(())
            }
            Err(err) => {
                error!("[DB] Error while creating new Category: {:?}", err);
                Err(err)
            }
        }
    }

    /// Creates the category unless it already exists.
    pub fn ensure(connection: &Connection, name: &str) -> Result<()> {
        if Self::get_one(connection, name)?.is_none() {
            Self::new(connection, name.to_string())?;
        }
        Ok(())
    }

    pub fn get_all(connection: &Connection) -> Result<Vec<Category>> {
        let mut statement = connection.prepare("SELECT name FROM Category ORDER BY name")?;
        let rows = statement.query_map([], |row| Ok(Category { name: row.get(0)? }))?;

        rows.collect()
    }

    pub fn get_one(connection: &Connection, name: &str) -> Result<Option<Category>> {
        let mut statement =
            connection.prepare("SELECT name FROM Category WHERE name = :name LIMIT 1")?;
        statement
            .query_row(&[(":name", name)], |row| Ok(Category { name: row.get(0)? }))
            .optional()
    }
}

impl StoredQuestion {
    pub fn add(connection: &Connection, question: &Question) -> Result<i64> {
        if let Some(category) = &question.category {
            Category::ensure(connection, category)?;
        }
        let difficulty = question.difficulty.map(|d| d.as_api_str());
        match connection.execute(
            "INSERT INTO \
            Question(prompt, correctAnswer, kind, difficulty, categoryName) \
            VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                question.prompt,
                question.correct_answer,
                question.kind.as_api_str(),
                difficulty,
                question.category
            ],
        ) {
            Ok(_) => {
                let id = connection.last_insert_rowid();
                for (position, text) in question.distractors.iter().enumerate() {
                    connection.execute(
                        "INSERT INTO Distractor(questionId, position, text) VALUES (?1, ?2, ?3)",
                        params![id, position as i64, text],
                    )?;
                }
                debug!("[DB] Created new Question {} in Category {:?}", id, question.category);
                Ok(id)
            }
            Err(err) => {
                error!("[DB] Error while creating new Question: {:?}", err);
                Err(err)
            }
        }
    }

    pub fn exists(connection: &Connection, prompt: &str) -> Result<bool> {
        let mut statement =
            connection.prepare("SELECT 1 FROM Question WHERE prompt = :prompt LIMIT 1")?;
        Ok(statement
            .query_row(&[(":prompt", prompt)], |_| Ok(()))
            .optional()?
            .is_some())
    }

    fn distractors(connection: &Connection, id: i64) -> Result<Vec<String>> {
        let mut statement = connection.prepare(
            "SELECT text FROM Distractor WHERE questionId = :id ORDER BY position",
        )?;
        let rows = statement.query_map(&[(":id", &id)], |row| row.get(0))?;

        rows.collect()
    }

    fn from_row(row: &Row) -> Result<StoredQuestion> {
        let kind: String = row.get(3)?;
        let difficulty: Option<String> = row.get(4)?;
        let kind = QuestionKind::from_api_str(&kind).unwrap_or_else(|| {
            warn!("[DB] Unknown question kind {:?}, assuming multiple choice", kind);
            QuestionKind::MultipleChoice
        });
        Ok(StoredQuestion {
            id: row.get(0)?,
            question: Question::new(
                row.get::<usize, String>(1)?,
                row.get::<usize, String>(2)?,
                Vec::new(),
                kind,
            )
            .with_category(row.get(5)?)
            .with_difficulty(difficulty.as_deref().and_then(Difficulty::from_api_str)),
        })
    }

    fn load(
        connection: &Connection,
        sql: &str,
        params: &[(&str, &dyn ToSql)],
    ) -> Result<Vec<StoredQuestion>> {
        let mut statement = connection.prepare(sql)?;
        let rows = statement.query_map(params, |row| Self::from_row(row))?;
        let mut questions = rows.collect::<Result<Vec<_>>>()?;
        for stored in questions.iter_mut() {
            if let Some(id) = stored.id {
                stored.question.distractors = Self::distractors(connection, id)?;
            }
        }

        Ok(questions)
    }

    pub fn get_all(connection: &Connection) -> Result<Vec<StoredQuestion>> {
        Self::load(
            connection,
            "SELECT id, prompt, correctAnswer, kind, difficulty, categoryName FROM Question ORDER BY id",
            &[],
        )
    }

    pub fn matching(connection: &Connection, filter: &BankFilter) -> Result<Vec<StoredQuestion>> {
        let difficulty = filter.difficulty.map(|d| d.as_api_str());
        let kind = filter.kind.map(|k| k.as_api_str());
        Self::load(
            connection,
            "SELECT id, prompt, correctAnswer, kind, difficulty, categoryName FROM Question \
            WHERE (:categoryName IS NULL OR categoryName = :categoryName) \
            AND (:difficulty IS NULL OR difficulty = :difficulty) \
            AND (:kind IS NULL OR kind = :kind) ORDER BY id",
            named_params! {
                ":categoryName": filter.category,
                ":difficulty": difficulty,
                ":kind": kind,
            },
        )
    }

    pub fn count(connection: &Connection) -> Result<usize> {
        connection.query_row("SELECT COUNT(*) FROM Question", [], |row| row.get::<usize, i64>(0))
            .map(|n| n as usize)
    }
}

/// Picks up to `amount` distinct questions matching `filter` at random.
pub fn pick_questions(connection: &Connection, filter: &BankFilter, amount: usize) -> Result<Vec<Question>> {
    let now = Instant::now();
    let candidates = StoredQuestion::matching(connection, filter)?;
    debug!(
        "[Setup] {} questions in the bank match {:?}",
        candidates.len(),
        filter
    );
    let picked: Vec<Question> = candidates
        .choose_multiple(&mut rng(), amount)
        .map(|stored| stored.question.clone())
        .collect();
    debug!(
        "[Setup] Picked {} questions in {} ms.",
        picked.len(),
        now.elapsed().as_millis()
    );
    Ok(picked)
}

pub fn create_or_open(src: &Path) -> Result<Connection> {
    if src.exists() {
        info!("[DB] Opening existing Database");
        open_db(src)
    } else {
        info!("[DB] Creating new Database");
        create_db(src)
    }
}

pub fn create_db(dest: &Path) -> Result<Connection> {
    let now = Instant::now();
    let db = init_db(Connection::open_in_memory()?)?;
    match db.backup(DatabaseName::Main, dest, None) {
        Ok(_) => {
            debug!(
                "[DB] Creating and Saving took {} ms.",
                now.elapsed().as_millis()
            );
            close_db(db)?;
            open_db(dest)
        }
        Err(err) => {
            warn!("[DB] Failed to create database file: {}", err);
            close_db(db)?;
            Err(err)
        }
    }
}

pub fn create_in_memory() -> Result<Connection> {
    init_db(Connection::open_in_memory()?)
}

pub fn open_db(src: &Path) -> Result<Connection> {
    let now = Instant::now();
    let db = Connection::open(src)?;
    db.execute_batch("PRAGMA foreign_keys = ON;")?;
    debug!("[DB] Opening took {} ms.", now.elapsed().as_millis());
    Ok(db)
}

pub fn close_db(connection: Connection) -> Result<()> {
    info!("[DB] Closing Database");
    let mut connection = connection;
    for attempt in 1..=2 {
        match connection.close() {
            Ok(_) => return Ok(()),
            Err((conn, err)) => {
                error!("[DB] Cannot close connection ({}). Retrying {}/2...", err, attempt);
                connection = conn;
            }
        }
    }
    connection.close().map_err(|(_, err)| {
        error!("[DB] Cannot close connection! Giving up.");
        err
    })
}

fn init_db(conn: Connection) -> Result<Connection> {
    info!("[DB INIT] Creating tables");
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute(
        "CREATE TABLE Category (
              name TEXT NOT NULL,
              PRIMARY KEY (name)
            )",
        (),
    )?;
    info!("[DB INIT] Created table Category");
    conn.execute(
        "CREATE TABLE Question (
              id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
              prompt TEXT NOT NULL,
              correctAnswer TEXT NOT NULL,
              kind TEXT NOT NULL,
              difficulty TEXT,
              categoryName TEXT,
              FOREIGN KEY (categoryName) REFERENCES Category(name) ON DELETE SET NULL ON UPDATE CASCADE
            )",
        (),
    )?;
    info!("[DB INIT] Created table Question");
    conn.execute(
        "CREATE TABLE Distractor (
              questionId INTEGER NOT NULL,
              position INTEGER NOT NULL,
              text TEXT NOT NULL,
              PRIMARY KEY (questionId, position),
              FOREIGN KEY (questionId) REFERENCES Question(id) ON DELETE CASCADE
            )",
        (),
    )?;
    info!("[DB INIT] Created table Distractor");
    conn.execute(
        "CREATE INDEX Question_categoryName_idx ON Question(categoryName)",
        (),
    )?;
    info!("[DB INIT] Created index Question_categoryName_idx");
    info!("[DB INIT] Database Creation Successful!");

    Ok(conn)
}
