use colored::Colorize;
use kuizushiyou::libkuizu::engine::{
    AnswerRecord, FetchTicket, Phase, Presentation, QuizEngine, QuizEvent, QuizResults, Verdict,
};
use kuizushiyou::libkuizu::error::{Error, Result};
use kuizushiyou::libkuizu::shitsumon::Question;
use kuizushiyou::libkuizu::source::{QuestionSource, QuizConfig};
use kuizushiyou::libkuizu::timer::Tick;
use log::{debug, warn};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, PartialEq)]
pub enum Choice {
    Option(usize),
    Next,
    Quit,
    Other(String),
}

impl Choice {
    pub fn from_str(choices_count: usize, input: &str) -> Choice {
        match input.trim() {
            "q" | "Q" => Choice::Quit,
            "" | "n" | "N" => Choice::Next,
            input => match input.parse::<usize>() {
                Ok(num) if num >= 1 && num <= choices_count => Choice::Option(num - 1),
                _ => Choice::Other(input.to_lowercase()),
            },
        }
    }
}

/// What a line of input asks for, given the phase it arrived in.
#[derive(Debug, PartialEq)]
pub enum Action {
    ConfirmQuit,
    Resume,
    Submit(usize),
    PickHint,
    Advance,
    Abort,
    PlayAgain,
    NewQuiz,
    Retry,
    Exit,
    Nothing,
}

pub fn dispatch(phase: Phase, choice: Choice, confirming_quit: bool) -> Action {
    if confirming_quit {
        return match choice {
            Choice::Other(answer) if answer == "y" => Action::Abort,
            _ => Action::Resume,
        };
    }
    match (phase, choice) {
        (Phase::InProgress | Phase::AwaitingNext, Choice::Quit) => Action::ConfirmQuit,
        (Phase::InProgress, Choice::Option(idx)) => Action::Submit(idx),
        (Phase::InProgress, _) => Action::PickHint,
        (Phase::AwaitingNext, Choice::Next) => Action::Advance,
        (Phase::Loading, Choice::Quit) => Action::Abort,
        (Phase::Finished, Choice::Other(cmd)) if cmd == "p" => Action::PlayAgain,
        (Phase::Finished, Choice::Next) => Action::NewQuiz,
        (Phase::Error, Choice::Other(cmd)) if cmd == "r" => Action::Retry,
        (Phase::Error, Choice::Next) => Action::Abort,
        (Phase::Setup, Choice::Other(cmd)) if cmd == "s" => Action::NewQuiz,
        (Phase::Setup | Phase::Finished | Phase::Error, Choice::Quit) => Action::Exit,
        _ => Action::Nothing,
    }
}

type FetchOutcome = (u64, Result<Vec<Question>>);

pub struct Cli {
    engine: QuizEngine,
    source: Arc<dyn QuestionSource>,
    ticks: mpsc::UnboundedReceiver<Tick>,
    events: mpsc::UnboundedReceiver<QuizEvent>,
    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
    shown: Option<Presentation>,
    confirming_quit: bool,
    done: bool,
}

impl Cli {
    pub fn new(
        mut engine: QuizEngine,
        source: Arc<dyn QuestionSource>,
        ticks: mpsc::UnboundedReceiver<Tick>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        engine.subscribe(move |event| {
            let _ = events_tx.send(event.clone());
        });
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            source,
            ticks,
            events,
            fetch_tx,
            fetch_rx,
            shown: None,
            confirming_quit: false,
            done: false,
        }
    }

    pub async fn run(mut self, config: QuizConfig) -> Result<()> {
        let mut input = spawn_stdin_reader();
        let ticket = self.engine.begin_start(config)?;
        self.spawn_fetch(ticket);

        while !self.done {
            self.render_events();
            tokio::select! {
                line = input.recv() => match line {
                    Some(line) => self.handle_input(&line),
                    None => {
                        debug!("[Setup] stdin closed");
                        self.done = true;
                    }
                },
                Some(tick) = self.ticks.recv() => {
                    self.engine.on_tick(tick.token);
                }
                Some((generation, outcome)) = self.fetch_rx.recv() => {
                    match self.engine.complete_start(generation, outcome) {
                        Ok(_) => {}
                        Err(err) if !err.is_surfaced() => debug!("[Setup] {}", err),
                        Err(err) => warn!("[Setup] {}", err),
                    }
                }
            }
        }
        self.render_events();
        println!("{}", "じゃあね！ See you next time.".cyan());
        Ok(())
    }

    fn spawn_fetch(&self, ticket: FetchTicket) {
        let source = self.source.clone();
        let tx = self.fetch_tx.clone();
        tokio::spawn(async move {
            let outcome = source.fetch(&ticket.config).await;
            let _ = tx.send((ticket.generation, outcome));
        });
    }

    fn handle_input(&mut self, line: &str) {
        let count = self.shown.as_ref().map(|p| p.options.len()).unwrap_or(0);
        let choice = Choice::from_str(count, line);
        let phase = self.engine.phase();
        let action = dispatch(phase, choice, self.confirming_quit);
        debug!("action: {:?} in {:?}", action, phase);
        self.confirming_quit = false;

        match action {
            Action::ConfirmQuit => {
                self.confirming_quit = true;
                prompt("Are you sure you want to quit? Your progress will be lost. (y/N)".yellow());
            }
            Action::Resume => {
                println!("{}", "Carry on!".cyan());
                match phase {
                    Phase::AwaitingNext => self.render_phase(Phase::AwaitingNext),
                    _ => self.reprint_question(),
                }
            }
            Action::Submit(idx) => {
                let picked = self.shown.as_ref().and_then(|p| p.options.get(idx).cloned());
                if let Some(answer) = picked {
                    report(self.engine.submit_answer(&answer));
                }
            }
            Action::PickHint => println!(
                "{}",
                format!("Pick an option between 1 and {}.", count).bright_red()
            ),
            Action::Advance => report(self.engine.advance()),
            Action::Abort => report(self.engine.abort()),
            Action::PlayAgain => report(self.engine.play_again()),
            Action::NewQuiz => self.start_again(),
            Action::Retry => match self.engine.retry() {
                Ok(ticket) => self.spawn_fetch(ticket),
                Err(err) => report::<()>(Err(err)),
            },
            Action::Exit => self.done = true,
            Action::Nothing => {}
        }
    }

    fn start_again(&mut self) {
        let config = self.engine.last_config().cloned().unwrap_or_default();
        match self.engine.begin_start(config) {
            Ok(ticket) => self.spawn_fetch(ticket),
            Err(err) => report::<()>(Err(err)),
        }
    }

    fn render_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                QuizEvent::PhaseChanged { to, .. } => self.render_phase(to),
                QuizEvent::QuestionStarted { .. } => self.reprint_question(),
                QuizEvent::Tick { remaining_secs } => {
                    if remaining_secs % 10 == 0 || remaining_secs <= 5 {
                        println!("{}", format!("⏱  {}s left", remaining_secs).yellow());
                    }
                }
                QuizEvent::Answered(record) => print_answer(&record),
                QuizEvent::Finished(results) => print_results(&results),
                QuizEvent::Failed(reason) => {
                    println!("{}", format!("✘ {}", reason).bright_red());
                    println!(
                        "{}",
                        "r to retry, n for a new quiz, q to exit.".cyan()
                    );
                }
            }
        }
    }

    fn render_phase(&mut self, phase: Phase) {
        match phase {
            Phase::Loading => println!(
                "{}",
                format!("Loading questions from {}... (q to cancel)", self.source.name()).cyan()
            ),
            Phase::Setup => {
                self.shown = None;
                println!("{}", "Back at the start. s to start a quiz, q to exit.".cyan());
            }
            Phase::AwaitingNext => println!(
                "{}",
                "Enter (or n) for the next question, q to quit.".cyan()
            ),
            _ => {}
        }
    }

    fn reprint_question(&mut self) {
        if self.engine.phase() == Phase::InProgress {
            match self.engine.present_current_question() {
                Ok(presentation) => {
                    print_question(&presentation);
                    self.shown = Some(presentation);
                }
                Err(err) => warn!("[Setup] {}", err),
            }
        }
    }
}

fn report<T>(result: Result<T>) {
    if let Err(err) = result {
        match err {
            Error::InvalidTransition { .. } => debug!("{}", err),
            err => println!("{}", format!("✘ {}", err).bright_red()),
        }
    }
}

fn print_question(presentation: &Presentation) {
    let leading = format!("{}/{}. ", presentation.index + 1, presentation.total);
    println!(
        "{}",
        format!(
            "==========> Score: {} | Progress: {}% | {}s <==========",
            presentation.score,
            presentation.progress_percent(),
            presentation.time_remaining_secs
        )
        .cyan()
    );
    if let Some(category) = &presentation.category {
        println!("{}{}", " ".repeat(leading.len()), category.dimmed());
    }
    println!(
        "{}{}",
        leading.cyan(),
        presentation.prompt.black().bold().on_white()
    );
    let indent = " ".repeat(leading.len());
    for (i, option) in presentation.options.iter().enumerate() {
        println!("{}{}. {}", indent, format!("{}", i + 1).bold(), option);
    }
    prompt(format!("Answer (1-{}, q to quit):", presentation.options.len()).cyan());
}

fn prompt(text: colored::ColoredString) {
    print!("{} ", text);
    let _ = std::io::stdout().flush();
}

fn print_answer(record: &AnswerRecord) {
    println!();
    if record.timed_out {
        println!("{}", "Time Up!".bright_red());
        println!(
            "{}",
            format!("The correct answer was {:?}.", record.correct_answer).green()
        );
    } else if record.was_correct {
        println!("{}", "Correct!".bright_green());
    } else {
        println!(
            "{}",
            format!("Incorrect: {:?}", record.chosen_answer).bright_red()
        );
        println!(
            "{}",
            format!("The correct answer was {:?}.", record.correct_answer).green()
        );
    }
}

fn print_results(results: &QuizResults) {
    let verdict = results.verdict();
    let message = match verdict {
        Verdict::Perfect | Verdict::Excellent => verdict.message().bright_green(),
        Verdict::Good => verdict.message().yellow(),
        Verdict::KeepLearning => verdict.message().bright_red(),
    };
    println!("{}", "==========> Results <==========".cyan());
    println!("Final score:     {}", results.score.to_string().bold());
    println!("Correct answers: {}/{}", results.correct_count, results.total);
    println!("Percentage:      {}%", results.percentage);
    println!("{}", message);
    println!("{}", "p to play again, n for a new quiz, q to exit.".cyan());
}

/// Forwards stdin lines from a blocking thread.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("[Setup] Cannot read stdin: {}", err);
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_parsing() {
        assert_eq!(Choice::from_str(4, "2"), Choice::Option(1));
        assert_eq!(Choice::from_str(4, " 4 "), Choice::Option(3));
        assert_eq!(Choice::from_str(4, "q"), Choice::Quit);
        assert_eq!(Choice::from_str(4, ""), Choice::Next);
        assert_eq!(Choice::from_str(4, "n"), Choice::Next);
        assert_eq!(Choice::from_str(4, "5"), Choice::Other("5".into()));
        assert_eq!(Choice::from_str(4, "0"), Choice::Other("0".into()));
        assert_eq!(Choice::from_str(2, "P"), Choice::Other("p".into()));
    }

    #[test]
    fn test_dispatch_table() {
        let cases = [
            (Phase::InProgress, "2", false, Action::Submit(1)),
            (Phase::InProgress, "9", false, Action::PickHint),
            (Phase::InProgress, "q", false, Action::ConfirmQuit),
            (Phase::AwaitingNext, "q", false, Action::ConfirmQuit),
            (Phase::AwaitingNext, "", false, Action::Advance),
            (Phase::AwaitingNext, "1", false, Action::Nothing),
            (Phase::Loading, "q", false, Action::Abort),
            (Phase::Loading, "1", false, Action::Nothing),
            (Phase::Finished, "p", false, Action::PlayAgain),
            (Phase::Finished, "n", false, Action::NewQuiz),
            (Phase::Finished, "q", false, Action::Exit),
            (Phase::Error, "R", false, Action::Retry),
            (Phase::Error, "n", false, Action::Abort),
            (Phase::Error, "q", false, Action::Exit),
            (Phase::Setup, "s", false, Action::NewQuiz),
            (Phase::Setup, "q", false, Action::Exit),
        ];
        for (phase, input, confirming, expected) in cases {
            assert_eq!(
                dispatch(phase, Choice::from_str(4, input), confirming),
                expected,
                "{:?} with {:?}",
                phase,
                input
            );
        }
    }

    #[test]
    fn test_quit_confirmation() {
        assert_eq!(dispatch(Phase::InProgress, Choice::from_str(4, "y"), true), Action::Abort);
        assert_eq!(dispatch(Phase::AwaitingNext, Choice::from_str(4, "Y"), true), Action::Abort);
        assert_eq!(dispatch(Phase::AwaitingNext, Choice::from_str(4, ""), true), Action::Resume);
        assert_eq!(dispatch(Phase::InProgress, Choice::from_str(4, "2"), true), Action::Resume);
    }
}
