//! Quiz progression.
//!
//! [`QuizEngine`] owns the session and moves it through
//! `Setup -> Loading -> InProgress <-> AwaitingNext -> Finished`, with
//! `Loading -> Error` when questions cannot be fetched. It never draws
//! anything: callers read return values or subscribe to [`QuizEvent`]s.
//!
//! Observers are called synchronously from inside an operation and must not
//! call back into the engine. Forward events to a channel instead.

use crate::libkuizu::error::{Error, Result};
use crate::libkuizu::shitsumon::{Question, QuestionKind};
use crate::libkuizu::source::{QuestionSource, QuizConfig};
use crate::libkuizu::timer::{Countdown, TimerToken};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Recorded as the chosen answer when a question runs out of time.
pub const NO_ANSWER_SENTINEL: &str = "Time Up";
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 60;
pub const DEFAULT_POINTS_PER_CORRECT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Loading,
    InProgress,
    AwaitingNext,
    Finished,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizRules {
    pub time_limit_secs: u32,
    pub points_per_correct: u32,
}

impl Default for QuizRules {
    fn default() -> Self {
        Self {
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            points_per_correct: DEFAULT_POINTS_PER_CORRECT,
        }
    }
}

impl QuizRules {
    pub fn validate(&self) -> Result<()> {
        if self.time_limit_secs == 0 {
            return Err(Error::Config("time limit must be at least one second".into()));
        }
        Ok(())
    }
}

/// Outcome of one question. Appended exactly once per question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub prompt: String,
    pub chosen_answer: String,
    pub correct_answer: String,
    pub was_correct: bool,
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSession {
    questions: Vec<Question>,
    current_index: usize,
    score: u32,
    answer_log: Vec<AnswerRecord>,
    time_remaining_secs: u32,
}

impl QuizSession {
    fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            current_index: 0,
            score: 0,
            answer_log: Vec::new(),
            time_remaining_secs: 0,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn answer_log(&self) -> &[AnswerRecord] {
        &self.answer_log
    }

    pub fn correct_count(&self) -> usize {
        self.answer_log.iter().filter(|a| a.was_correct).count()
    }

    pub fn time_remaining_secs(&self) -> u32 {
        self.time_remaining_secs
    }

    fn current_is_answered(&self) -> bool {
        self.answer_log.len() > self.current_index
    }

    fn record(&mut self, record: AnswerRecord, points: u32) {
        if record.was_correct {
            self.score += points;
        }
        self.answer_log.push(record);
    }
}

/// What the presentation layer needs to draw the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub index: usize,
    pub total: usize,
    pub prompt: String,
    pub kind: QuestionKind,
    pub category: Option<String>,
    /// Options in presentation order, freshly shuffled.
    pub options: Vec<String>,
    pub score: u32,
    pub time_remaining_secs: u32,
    /// Set once the question has been answered.
    pub answer: Option<AnswerRecord>,
}

impl Presentation {
    pub fn progress_percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (100 * self.index / self.total) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Perfect,
    Excellent,
    Good,
    KeepLearning,
}

impl Verdict {
    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Perfect => "Perfect! You are a quiz master!",
            Verdict::Excellent => "Excellent! Great job!",
            Verdict::Good => "Good effort! Keep practicing!",
            Verdict::KeepLearning => "Keep learning! You can do better!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizResults {
    pub score: u32,
    pub correct_count: usize,
    pub total: usize,
    pub percentage: u32,
}

impl QuizResults {
    fn from_session(session: &QuizSession) -> Self {
        let correct_count = session.correct_count();
        let total = session.questions.len();
        let percentage = if total == 0 {
            0
        } else {
            (100.0 * correct_count as f64 / total as f64).round() as u32
        };
        Self {
            score: session.score,
            correct_count,
            total,
            percentage,
        }
    }

    pub fn verdict(&self) -> Verdict {
        if self.percentage >= 100 {
            Verdict::Perfect
        } else if self.percentage >= 80 {
            Verdict::Excellent
        } else if self.percentage >= 60 {
            Verdict::Good
        } else {
            Verdict::KeepLearning
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizEvent {
    PhaseChanged { from: Phase, to: Phase },
    QuestionStarted { index: usize, total: usize },
    Tick { remaining_secs: u32 },
    Answered(AnswerRecord),
    Finished(QuizResults),
    Failed(String),
}

/// Handed out by [`QuizEngine::begin_start`]; the fetch result must come
/// back with the same generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub config: QuizConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick belonged to a countdown that is no longer armed.
    Ignored,
    Counting(u32),
    /// Time ran out; the engine moved on and is now in this phase.
    Expired(Phase),
}

pub type Observer = Box<dyn FnMut(&QuizEvent) + Send>;

pub struct QuizEngine {
    phase: Phase,
    session: Option<QuizSession>,
    generation: u64,
    last_config: Option<QuizConfig>,
    failure: Option<String>,
    rules: QuizRules,
    countdown: Box<dyn Countdown>,
    armed: Option<TimerToken>,
    next_token: u64,
    rng: Box<dyn RngCore + Send>,
    observers: Vec<Observer>,
}

impl QuizEngine {
    pub fn new(countdown: Box<dyn Countdown>) -> Self {
        Self {
            phase: Phase::Setup,
            session: None,
            generation: 0,
            last_config: None,
            failure: None,
            rules: QuizRules::default(),
            countdown,
            armed: None,
            next_token: 0,
            rng: Box::new(StdRng::from_os_rng()),
            observers: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: QuizRules) -> Result<Self> {
        rules.validate()?;
        self.rules = rules;
        Ok(self)
    }

    /// Replaces the source of randomness used for option order.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&QuizEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&QuizSession> {
        self.session.as_ref()
    }

    pub fn rules(&self) -> QuizRules {
        self.rules
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_config(&self) -> Option<&QuizConfig> {
        self.last_config.as_ref()
    }

    /// Why the last start failed, while in [`Phase::Error`].
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Enters `Loading` for a new quiz. The caller fetches questions for the
    /// returned ticket and hands them to [`QuizEngine::complete_start`].
    pub fn begin_start(&mut self, config: QuizConfig) -> Result<FetchTicket> {
        self.expect_phase("start a quiz", &[Phase::Setup, Phase::Error, Phase::Finished])?;
        config.validate()?;
        self.disarm_timer();
        self.generation += 1;
        self.session = None;
        self.failure = None;
        self.last_config = Some(config.clone());
        info!("[Engine] Starting quiz #{} with {:?}", self.generation, config);
        self.set_phase(Phase::Loading);
        Ok(FetchTicket {
            generation: self.generation,
            config,
        })
    }

    /// Applies a fetch result. Results for a superseded start are rejected
    /// with [`Error::StaleResponse`] and change nothing.
    pub fn complete_start(
        &mut self,
        generation: u64,
        outcome: Result<Vec<Question>>,
    ) -> Result<Phase> {
        if generation != self.generation || self.phase != Phase::Loading {
            debug!(
                "[Engine] Dropping questions for quiz #{} (now #{} in {:?})",
                generation, self.generation, self.phase
            );
            return Err(Error::StaleResponse {
                generation,
                current: self.generation,
            });
        }

        match outcome {
            Ok(questions) if questions.is_empty() => self.fail(Error::NoQuestions.to_string()),
            Ok(questions) => self.begin_session(questions),
            Err(err) => self.fail(err.to_string()),
        }
        Ok(self.phase)
    }

    /// Runs a whole start against `source`. Holding `&mut self` across the
    /// fetch means nothing can abort it; event loops should use
    /// [`QuizEngine::begin_start`] and [`QuizEngine::complete_start`].
    pub async fn start(&mut self, source: &dyn QuestionSource, config: QuizConfig) -> Result<Phase> {
        let ticket = self.begin_start(config)?;
        let outcome = source.fetch(&ticket.config).await;
        self.complete_start(ticket.generation, outcome)
    }

    /// Starts again with the config of the failed attempt.
    pub fn retry(&mut self) -> Result<FetchTicket> {
        self.expect_phase("retry", &[Phase::Error])?;
        let config = self.last_config.clone().ok_or(Error::InvalidTransition {
            operation: "retry",
            phase: self.phase,
        })?;
        self.begin_start(config)
    }

    /// Replays the finished question set in a brand new session.
    pub fn play_again(&mut self) -> Result<Phase> {
        self.expect_phase("play again", &[Phase::Finished])?;
        let questions = match self.session.take() {
            Some(session) => session.questions,
            None => return self.invalid("play again"),
        };
        self.generation += 1;
        info!("[Engine] Replaying {} questions as quiz #{}", questions.len(), self.generation);
        self.begin_session(questions);
        Ok(self.phase)
    }

    /// The current question with its options in a fresh random order.
    pub fn present_current_question(&mut self) -> Result<Presentation> {
        self.expect_phase("present a question", &[Phase::InProgress, Phase::AwaitingNext])?;
        let session = match self.session.as_ref() {
            Some(session) => session,
            None => return self.invalid("present a question"),
        };
        let question = match session.current_question() {
            Some(question) => question,
            None => return self.invalid("present a question"),
        };
        let (options, _) = question.options_randomize(&mut *self.rng);

        Ok(Presentation {
            index: session.current_index,
            total: session.questions.len(),
            prompt: question.prompt.clone(),
            kind: question.kind,
            category: question.category.clone(),
            options,
            score: session.score,
            time_remaining_secs: session.time_remaining_secs,
            answer: session.answer_log.get(session.current_index).cloned(),
        })
    }

    /// Records `choice` for the current question. A second answer for the same
    /// question is an [`Error::InvalidTransition`] and records nothing.
    pub fn submit_answer(&mut self, choice: &str) -> Result<AnswerRecord> {
        self.expect_phase("submit an answer", &[Phase::InProgress])?;
        let points = self.rules.points_per_correct;
        let phase = self.phase;
        let record = {
            let session = match self.session.as_mut() {
                Some(session) if !session.current_is_answered() => session,
                _ => return invalid("submit an answer", phase),
            };
            let question = match session.current_question() {
                Some(question) => question,
                None => return invalid("submit an answer", phase),
            };
            let record = AnswerRecord {
                prompt: question.prompt.clone(),
                chosen_answer: choice.to_string(),
                correct_answer: question.correct_answer.clone(),
                was_correct: question.is_correct(choice),
                timed_out: false,
            };
            session.record(record.clone(), points);
            record
        };

        debug!(
            "[Engine] Answered {:?}: {}",
            record.chosen_answer,
            if record.was_correct { "correct" } else { "incorrect" }
        );
        self.disarm_timer();
        self.emit(QuizEvent::Answered(record.clone()));
        self.set_phase(Phase::AwaitingNext);
        Ok(record)
    }

    /// Moves past an answered question.
    pub fn advance(&mut self) -> Result<Phase> {
        self.expect_phase("advance", &[Phase::AwaitingNext])?;
        self.step_forward();
        Ok(self.phase)
    }

    /// Records the current question as unanswered and moves on without
    /// waiting for the player.
    pub fn expire_timer(&mut self) -> Result<Phase> {
        self.expect_phase("expire the timer", &[Phase::InProgress])?;
        let phase = self.phase;
        let record = {
            let session = match self.session.as_mut() {
                Some(session) if !session.current_is_answered() => session,
                _ => return invalid("expire the timer", phase),
            };
            let question = match session.current_question() {
                Some(question) => question,
                None => return invalid("expire the timer", phase),
            };
            let record = AnswerRecord {
                prompt: question.prompt.clone(),
                chosen_answer: NO_ANSWER_SENTINEL.to_string(),
                correct_answer: question.correct_answer.clone(),
                was_correct: false,
                timed_out: true,
            };
            session.time_remaining_secs = 0;
            session.record(record.clone(), 0);
            record
        };

        debug!("[Engine] Time up for {:?}", record.prompt);
        self.disarm_timer();
        self.emit(QuizEvent::Answered(record));
        self.step_forward();
        Ok(self.phase)
    }

    /// Applies one countdown tick. Ticks from a countdown that is no longer
    /// armed are ignored.
    pub fn on_tick(&mut self, token: TimerToken) -> TickOutcome {
        if self.armed != Some(token) || self.phase != Phase::InProgress {
            debug!("[Engine] Ignoring stale tick {:?} (armed {:?})", token, self.armed);
            return TickOutcome::Ignored;
        }
        let remaining = match self.session.as_mut() {
            Some(session) => {
                session.time_remaining_secs = session.time_remaining_secs.saturating_sub(1);
                session.time_remaining_secs
            }
            None => return TickOutcome::Ignored,
        };
        self.emit(QuizEvent::Tick {
            remaining_secs: remaining,
        });
        if remaining > 0 {
            return TickOutcome::Counting(remaining);
        }
        match self.expire_timer() {
            Ok(phase) => TickOutcome::Expired(phase),
            Err(err) => {
                warn!("[Engine] Could not expire timer: {}", err);
                TickOutcome::Ignored
            }
        }
    }

    /// Drops the session and goes back to setup. Any fetch still in flight
    /// becomes stale.
    pub fn abort(&mut self) -> Result<()> {
        if self.phase == Phase::Setup {
            return self.invalid("quit");
        }
        self.disarm_timer();
        self.generation += 1;
        self.session = None;
        self.failure = None;
        info!("[Engine] Quiz abandoned");
        self.set_phase(Phase::Setup);
        Ok(())
    }

    pub fn results(&self) -> Result<QuizResults> {
        self.expect_phase("show results", &[Phase::Finished])?;
        match &self.session {
            Some(session) => Ok(QuizResults::from_session(session)),
            None => self.invalid("show results"),
        }
    }

    fn begin_session(&mut self, questions: Vec<Question>) {
        debug!("[Engine] Session with {} questions", questions.len());
        self.session = Some(QuizSession::new(questions));
        self.set_phase(Phase::InProgress);
        self.enter_question();
    }

    fn enter_question(&mut self) {
        let limit = self.rules.time_limit_secs;
        let (index, total) = match self.session.as_mut() {
            Some(session) => {
                session.time_remaining_secs = limit;
                (session.current_index, session.questions.len())
            }
            None => return,
        };
        self.arm_timer();
        self.emit(QuizEvent::QuestionStarted { index, total });
    }

    fn step_forward(&mut self) {
        self.disarm_timer();
        let finished = match self.session.as_mut() {
            Some(session) => {
                session.current_index += 1;
                session.current_index >= session.questions.len()
            }
            None => return,
        };
        if finished {
            self.set_phase(Phase::Finished);
            let results = self.session.as_ref().map(QuizResults::from_session);
            if let Some(results) = results {
                info!(
                    "[Engine] Finished: {}/{} correct, {} points",
                    results.correct_count, results.total, results.score
                );
                self.emit(QuizEvent::Finished(results));
            }
        } else {
            self.set_phase(Phase::InProgress);
            self.enter_question();
        }
    }

    fn fail(&mut self, reason: String) {
        warn!("[Engine] Quiz #{} failed to start: {}", self.generation, reason);
        self.session = None;
        self.failure = Some(reason.clone());
        self.set_phase(Phase::Error);
        self.emit(QuizEvent::Failed(reason));
    }

    fn arm_timer(&mut self) {
        self.disarm_timer();
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.armed = Some(token);
        self.countdown.arm(token, self.rules.time_limit_secs);
    }

    fn disarm_timer(&mut self) {
        if self.armed.take().is_some() {
            self.countdown.disarm();
        }
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        debug!("[Engine] {:?} -> {:?}", from, to);
        self.phase = to;
        self.emit(QuizEvent::PhaseChanged { from, to });
    }

    fn emit(&mut self, event: QuizEvent) {
        for observer in self.observers.iter_mut() {
            observer(&event);
        }
    }

    fn expect_phase(&self, operation: &'static str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            self.invalid(operation)
        }
    }

    fn invalid<T>(&self, operation: &'static str) -> Result<T> {
        invalid(operation, self.phase)
    }
}

fn invalid<T>(operation: &'static str, phase: Phase) -> Result<T> {
    debug!("[Engine] Rejected {} while {:?}", operation, phase);
    Err(Error::InvalidTransition { operation, phase })
}

impl Drop for QuizEngine {
    fn drop(&mut self) {
        self.disarm_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libkuizu::timer::testing::{Call, RecordingCountdown};
    use std::sync::{Arc, Mutex};

    fn question(n: usize) -> Question {
        Question::new(
            format!("Question {n}?"),
            format!("right {n}"),
            vec![format!("wrong {n}a"), format!("wrong {n}b"), format!("wrong {n}c")],
            QuestionKind::MultipleChoice,
        )
    }

    fn engine() -> (QuizEngine, RecordingCountdown) {
        let countdown = RecordingCountdown::default();
        let engine = QuizEngine::new(Box::new(countdown.clone())).with_rng(StdRng::seed_from_u64(42));
        (engine, countdown)
    }

    fn started(count: usize) -> (QuizEngine, RecordingCountdown) {
        let (mut engine, countdown) = engine();
        let ticket = engine.begin_start(QuizConfig::default()).unwrap();
        let questions = (0..count).map(question).collect();
        assert_eq!(
            engine.complete_start(ticket.generation, Ok(questions)).unwrap(),
            Phase::InProgress
        );
        (engine, countdown)
    }

    fn assert_invariants(engine: &QuizEngine) {
        let Some(session) = engine.session() else { return };
        let points = engine.rules().points_per_correct;
        assert_eq!(session.score(), points * session.correct_count() as u32);
        assert!(session.current_index() <= session.questions().len());
        match engine.phase() {
            Phase::InProgress | Phase::Finished => {
                assert_eq!(session.answer_log().len(), session.current_index())
            }
            Phase::AwaitingNext => {
                assert_eq!(session.answer_log().len(), session.current_index() + 1)
            }
            _ => {}
        }
        assert_eq!(
            engine.phase() == Phase::Finished,
            session.current_index() == session.questions().len()
        );
    }

    #[test]
    fn test_start_enters_first_question_with_fresh_timer() {
        let (engine, countdown) = started(3);
        let session = engine.session().unwrap();
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.score(), 0);
        assert!(session.answer_log().is_empty());
        assert_eq!(session.time_remaining_secs(), 60);
        assert_eq!(countdown.calls(), vec![Call::Arm(TimerToken(1), 60)]);
    }

    #[test]
    fn test_submit_twice_never_double_counts() {
        let (mut engine, _) = started(2);
        let record = engine.submit_answer("right 0").unwrap();
        assert!(record.was_correct);
        assert_eq!(engine.phase(), Phase::AwaitingNext);

        let err = engine.submit_answer("right 0").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { phase: Phase::AwaitingNext, .. }
        ));
        let session = engine.session().unwrap();
        assert_eq!(session.answer_log().len(), 1);
        assert_eq!(session.score(), 10);
        assert_invariants(&engine);
    }

    #[test]
    fn test_submit_disarms_and_advance_rearms() {
        let (mut engine, countdown) = started(2);
        engine.submit_answer("wrong 0a").unwrap();
        assert_eq!(countdown.calls().last(), Some(&Call::Disarm));
        assert_eq!(engine.advance().unwrap(), Phase::InProgress);
        assert_eq!(countdown.last_armed(), Some(TimerToken(2)));
        assert_eq!(engine.session().unwrap().time_remaining_secs(), 60);
    }

    #[test]
    fn test_operations_rejected_in_wrong_phase() {
        let (mut engine, _) = engine();
        assert!(engine.submit_answer("x").is_err());
        assert!(engine.advance().is_err());
        assert!(engine.expire_timer().is_err());
        assert!(engine.results().is_err());
        assert!(engine.abort().is_err());
        assert!(engine.present_current_question().is_err());

        engine.begin_start(QuizConfig::default()).unwrap();
        assert!(engine.begin_start(QuizConfig::default()).is_err());
        assert!(engine.submit_answer("x").is_err());
        assert!(engine.advance().is_err());
        assert_eq!(engine.phase(), Phase::Loading);
    }

    #[test]
    fn test_invalid_config_leaves_state_alone() {
        let (mut engine, _) = engine();
        let config = QuizConfig {
            amount: 0,
            ..Default::default()
        };
        assert!(matches!(engine.begin_start(config), Err(Error::Config(_))));
        assert_eq!(engine.phase(), Phase::Setup);
        assert_eq!(engine.generation(), 0);
    }

    #[test]
    fn test_timeout_records_sentinel_and_moves_on() {
        let (mut engine, _) = started(2);
        assert_eq!(engine.expire_timer().unwrap(), Phase::InProgress);
        let session = engine.session().unwrap();
        let record = &session.answer_log()[0];
        assert_eq!(record.chosen_answer, NO_ANSWER_SENTINEL);
        assert!(!record.was_correct);
        assert!(record.timed_out);
        assert_eq!(session.current_index(), 1);
        assert_invariants(&engine);
    }

    #[test]
    fn test_ticks_count_down_and_expire() {
        let rules = QuizRules {
            time_limit_secs: 3,
            points_per_correct: 10,
        };
        let countdown = RecordingCountdown::default();
        let mut engine = QuizEngine::new(Box::new(countdown.clone()))
            .with_rules(rules)
            .unwrap();
        let ticket = engine.begin_start(QuizConfig::default()).unwrap();
        engine
            .complete_start(ticket.generation, Ok(vec![question(0)]))
            .unwrap();
        let token = countdown.last_armed().unwrap();

        assert_eq!(engine.on_tick(token), TickOutcome::Counting(2));
        assert_eq!(engine.on_tick(token), TickOutcome::Counting(1));
        assert_eq!(engine.on_tick(token), TickOutcome::Expired(Phase::Finished));
        assert_eq!(engine.on_tick(token), TickOutcome::Ignored);
        assert_eq!(engine.results().unwrap().correct_count, 0);
    }

    #[test]
    fn test_stale_tick_after_answer_is_ignored() {
        let (mut engine, countdown) = started(2);
        let first = countdown.last_armed().unwrap();
        engine.submit_answer("right 0").unwrap();
        engine.advance().unwrap();

        assert_eq!(engine.on_tick(first), TickOutcome::Ignored);
        assert_eq!(engine.session().unwrap().time_remaining_secs(), 60);
        assert_eq!(engine.session().unwrap().answer_log().len(), 1);
    }

    #[test]
    fn test_presentation_reshuffles_each_time() {
        let (mut engine, _) = started(1);
        let first = engine.present_current_question().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.total, 1);
        assert_eq!(first.options.len(), 4);
        assert!(first.options.contains(&"right 0".to_string()));

        let mut orders = std::collections::HashSet::new();
        for _ in 0..30 {
            orders.insert(engine.present_current_question().unwrap().options);
        }
        assert!(orders.len() > 1);
    }

    #[test]
    fn test_presentation_carries_answer_once_answered() {
        let (mut engine, _) = started(2);
        assert!(engine.present_current_question().unwrap().answer.is_none());
        engine.submit_answer("wrong 0b").unwrap();
        let shown = engine.present_current_question().unwrap();
        assert_eq!(shown.answer.unwrap().chosen_answer, "wrong 0b");
    }

    #[test]
    fn test_empty_fetch_is_an_error_phase() {
        let (mut engine, _) = engine();
        let ticket = engine.begin_start(QuizConfig::default()).unwrap();
        assert_eq!(
            engine.complete_start(ticket.generation, Ok(Vec::new())).unwrap(),
            Phase::Error
        );
        assert!(engine.session().is_none());
        assert!(engine.failure_reason().is_some());
    }

    #[test]
    fn test_fetch_failure_then_retry() {
        let (mut engine, _) = engine();
        let config = QuizConfig {
            amount: 3,
            ..Default::default()
        };
        let ticket = engine.begin_start(config.clone()).unwrap();
        engine
            .complete_start(ticket.generation, Err(Error::FetchFailure("offline".into())))
            .unwrap();
        assert_eq!(engine.phase(), Phase::Error);
        assert_eq!(engine.failure_reason(), Some("offline"));

        let retry = engine.retry().unwrap();
        assert_eq!(retry.config, config);
        assert!(retry.generation > ticket.generation);
        assert_eq!(engine.phase(), Phase::Loading);
        assert_eq!(engine.failure_reason(), None);
    }

    #[test]
    fn test_late_fetch_after_abort_is_discarded() {
        let (mut engine, _) = engine();
        let ticket = engine.begin_start(QuizConfig::default()).unwrap();
        engine.abort().unwrap();

        let err = engine
            .complete_start(ticket.generation, Ok(vec![question(0)]))
            .unwrap_err();
        assert!(matches!(err, Error::StaleResponse { .. }));
        assert!(!err.is_surfaced());
        assert_eq!(engine.phase(), Phase::Setup);
        assert!(engine.session().is_none());
    }

    #[test]
    fn test_late_fetch_after_restart_is_discarded() {
        let (mut engine, _) = engine();
        let old = engine.begin_start(QuizConfig::default()).unwrap();
        engine.abort().unwrap();
        let new = engine.begin_start(QuizConfig::default()).unwrap();

        assert!(engine.complete_start(old.generation, Ok(vec![question(9)])).is_err());
        assert_eq!(engine.phase(), Phase::Loading);
        engine
            .complete_start(new.generation, Ok(vec![question(0), question(1)]))
            .unwrap();
        assert_eq!(engine.session().unwrap().questions().len(), 2);
    }

    #[test]
    fn test_abort_mid_quiz_disarms_timer() {
        let (mut engine, countdown) = started(3);
        engine.abort().unwrap();
        assert_eq!(engine.phase(), Phase::Setup);
        assert!(engine.session().is_none());
        assert_eq!(countdown.calls().last(), Some(&Call::Disarm));
    }

    #[test]
    fn test_play_again_starts_fresh_session() {
        let (mut engine, _) = started(1);
        engine.submit_answer("right 0").unwrap();
        assert_eq!(engine.advance().unwrap(), Phase::Finished);
        let generation = engine.generation();

        assert_eq!(engine.play_again().unwrap(), Phase::InProgress);
        let session = engine.session().unwrap();
        assert_eq!(session.score(), 0);
        assert!(session.answer_log().is_empty());
        assert_eq!(session.questions().len(), 1);
        assert!(engine.generation() > generation);
    }

    #[test]
    fn test_observers_see_transitions() {
        let (mut engine, _) = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let ticket = engine.begin_start(QuizConfig::default()).unwrap();
        engine
            .complete_start(ticket.generation, Ok(vec![question(0)]))
            .unwrap();
        engine.submit_answer("right 0").unwrap();
        engine.advance().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            QuizEvent::PhaseChanged {
                from: Phase::Setup,
                to: Phase::Loading
            }
        );
        assert!(seen.contains(&QuizEvent::QuestionStarted { index: 0, total: 1 }));
        assert!(matches!(seen.last(), Some(QuizEvent::Finished(r)) if r.score == 10));
    }

    #[test]
    fn test_custom_points_keep_score_proportional() {
        let countdown = RecordingCountdown::default();
        let mut engine = QuizEngine::new(Box::new(countdown))
            .with_rules(QuizRules {
                time_limit_secs: 60,
                points_per_correct: 25,
            })
            .unwrap();
        let ticket = engine.begin_start(QuizConfig::default()).unwrap();
        engine
            .complete_start(ticket.generation, Ok(vec![question(0), question(1)]))
            .unwrap();
        engine.submit_answer("right 0").unwrap();
        engine.advance().unwrap();
        engine.submit_answer("right 1").unwrap();
        engine.advance().unwrap();
        assert_eq!(engine.results().unwrap().score, 50);
    }

    #[test]
    fn test_zero_time_limit_is_rejected() {
        let rules = QuizRules {
            time_limit_secs: 0,
            points_per_correct: 10,
        };
        assert!(QuizEngine::new(Box::new(RecordingCountdown::default()))
            .with_rules(rules)
            .is_err());
    }

    #[test]
    fn test_random_walk_keeps_invariants() {
        use rand::Rng;
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..50 {
            let count = rng.random_range(1..6);
            let (mut engine, countdown) = started(count);
            for _ in 0..40 {
                match rng.random_range(0..5) {
                    0 => {
                        let n = engine.session().map(|s| s.current_index()).unwrap_or(0);
                        let _ = engine.submit_answer(&format!("right {n}"));
                    }
                    1 => {
                        let _ = engine.submit_answer("nope");
                    }
                    2 => {
                        let _ = engine.advance();
                    }
                    3 => {
                        let _ = engine.expire_timer();
                    }
                    _ => {
                        if let Some(token) = countdown.last_armed() {
                            engine.on_tick(token);
                        }
                    }
                }
                assert_invariants(&engine);
            }
        }
    }
}
