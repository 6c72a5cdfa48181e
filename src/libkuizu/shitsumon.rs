use clap::ValueEnum;
use log::warn;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

macro_rules! api_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_api_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
            pub fn from_api_str(value: &str) -> Option<$ty> {
                match value {
                    $($name => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum QuestionKind {
    #[serde(rename = "multiple")]
    #[value(name = "multiple")]
    MultipleChoice,
    #[serde(rename = "boolean")]
    #[value(name = "boolean")]
    TrueFalse,
}
api_names!(QuestionKind { MultipleChoice => "multiple", TrueFalse => "boolean" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}
api_names!(Difficulty { Easy => "easy", Medium => "medium", Hard => "hard" });

/// A trivia question. Text is stored decoded, so answers compare as plain
/// strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub prompt: String,
    pub correct_answer: String,
    pub distractors: Vec<String>,
    pub kind: QuestionKind,
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
}

impl Question {
    pub fn new(
        prompt: impl Into<String>,
        correct_answer: impl Into<String>,
        distractors: Vec<String>,
        kind: QuestionKind,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            correct_answer: correct_answer.into(),
            distractors,
            kind,
            category: None,
            difficulty: None,
        }
    }

    /// Builds a question from HTML-escaped text as served by trivia APIs.
    pub fn from_encoded(
        prompt: &str,
        correct_answer: &str,
        distractors: &[String],
        kind: QuestionKind,
    ) -> Self {
        Self::new(
            decode_html(prompt),
            decode_html(correct_answer),
            distractors.iter().map(|d| decode_html(d)).collect(),
            kind,
        )
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_difficulty(mut self, difficulty: Option<Difficulty>) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn all_options(&self) -> Vec<String> {
        let mut vec = vec![self.correct_answer.clone()];
        vec.extend(self.distractors.iter().cloned());
        vec
    }

    /// Returns the options in a fresh uniformly random order together with
    /// the index of the correct one.
    pub fn options_randomize<R: Rng + ?Sized>(&self, rng: &mut R) -> (Vec<String>, usize) {
        let mut opts = self.all_options();
        opts.shuffle(rng);
        let index = opts
            .iter()
            .position(|o| *o == self.correct_answer)
            .unwrap_or_else(|| {
                warn!("[Setup] Correct answer vanished from options of {:?}", self.prompt);
                0
            });
        (opts, index)
    }

    pub fn is_correct(&self, choice: &str) -> bool {
        choice == self.correct_answer
    }
}

/// Decodes HTML character references. Unknown or malformed references are
/// kept as written.
pub fn decode_html(html: &str) -> String {
    html_escape::decode_html_entities(html).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn capital_question() -> Question {
        Question::new(
            "Capital of France?",
            "Paris",
            vec!["Lyon".into(), "Nice".into(), "Lille".into()],
            QuestionKind::MultipleChoice,
        )
    }

    #[test]
    fn test_decode_named_and_numeric() {
        assert_eq!(decode_html("&quot;Hi&quot; &amp; bye"), "\"Hi\" & bye");
        assert_eq!(decode_html("Don&#039;t"), "Don't");
        assert_eq!(decode_html("&#x27;x&#x27;"), "'x'");
        assert_eq!(decode_html("Pok&eacute;mon"), "Pokémon");
    }

    #[test]
    fn test_decode_less_common_entities() {
        assert_eq!(decode_html("&iquest;Qu&eacute;?"), "¿Qué?");
        assert_eq!(decode_html("&Uacute;nico &Iacute;ndice"), "Único Índice");
        assert_eq!(decode_html("&Egrave;re"), "Ère");
        assert_eq!(decode_html("&alpha; particle"), "α particle");
        assert_eq!(decode_html("1&ordm; lugar"), "1º lugar");
    }

    #[test]
    fn test_decode_leaves_garbage_alone() {
        assert_eq!(decode_html("AT&T"), "AT&T");
        assert_eq!(decode_html("a & b; c"), "a & b; c");
        assert_eq!(decode_html("&bogus;"), "&bogus;");
        assert_eq!(decode_html("trailing &"), "trailing &");
    }

    #[test]
    fn test_from_encoded_decodes_every_field() {
        let q = Question::from_encoded(
            "Who wrote &quot;Hamlet&quot;?",
            "Shakespeare &amp; co",
            &["Marlowe&#039;s".to_string()],
            QuestionKind::MultipleChoice,
        );
        assert_eq!(q.prompt, "Who wrote \"Hamlet\"?");
        assert!(q.is_correct("Shakespeare & co"));
        assert_eq!(q.distractors, vec!["Marlowe's".to_string()]);
    }

    #[test]
    fn test_options_randomize_keeps_every_option() {
        let q = capital_question();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let (opts, correct) = q.options_randomize(&mut rng);
            assert_eq!(opts.len(), 4);
            assert_eq!(opts[correct], "Paris");
            let mut sorted = opts.clone();
            sorted.sort();
            assert_eq!(sorted, vec!["Lille", "Lyon", "Nice", "Paris"]);
        }
    }

    #[test]
    fn test_shuffle_is_roughly_uniform() {
        let q = capital_question();
        let options = q.all_options();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let rounds = 40_000;
        let mut counts = [[0usize; 4]; 4];
        for _ in 0..rounds {
            let (opts, _) = q.options_randomize(&mut rng);
            for (pos, opt) in opts.iter().enumerate() {
                let which = options.iter().position(|o| o == opt).unwrap();
                counts[which][pos] += 1;
            }
        }
        let expected = rounds / 4;
        for row in counts {
            for count in row {
                assert!(
                    count.abs_diff(expected) < 500,
                    "count {count} too far from {expected}"
                );
            }
        }
    }

    #[test]
    fn test_api_names() {
        assert_eq!(QuestionKind::TrueFalse.as_api_str(), "boolean");
        assert_eq!(QuestionKind::from_api_str("multiple"), Some(QuestionKind::MultipleChoice));
        assert_eq!(Difficulty::from_api_str("hard"), Some(Difficulty::Hard));
        assert_eq!(Difficulty::from_api_str("extreme"), None);
    }
}
