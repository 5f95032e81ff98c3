use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use glimpse_contracts::session::{ImageBytes, Session, Turn};
use glimpse_contracts::uploads::ImageUpload;

pub const DESCRIBE_USER_TEXT: &str = "Please describe this image:";
pub const DESCRIBE_PROMPT: &str = "Describe this image in detail. What objects, people, or scenes do you see? What are the colors, composition, and mood?";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Mode {
    /// Every upload is described once with a fixed prompt.
    Describe,
    /// Uploads pin an image; free-text questions are answered against it.
    QandA,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Describe => "describe",
            Mode::QandA => "qa",
        }
    }

    pub fn strategy(&self) -> Box<dyn TurnStrategy> {
        match self {
            Mode::Describe => Box::new(DescribeStrategy),
            Mode::QandA => Box::new(QuestionStrategy),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "describe" => Ok(Mode::Describe),
            "qa" | "q&a" | "qanda" | "ask" => Ok(Mode::QandA),
            other => bail!("unknown mode '{other}' (expected 'describe' or 'qa')"),
        }
    }
}

/// What the model is asked for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCall {
    pub prompt: String,
    pub image: ImageBytes,
}

/// The strategy's decision for one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Append `turn`, then make `call` and append its answer.
    Ask { turn: Turn, call: ModelCall },
    /// A new image was pinned (the session already holds the announcement).
    Pinned { name: String },
    Unchanged,
    Rejected { reason: String },
}

/// Mode-specific prompt construction and trigger wiring.
///
/// Strategies only touch the session through [`Session::set_pinned_image`];
/// every other append goes through the controller.
pub trait TurnStrategy: Send + Sync {
    fn mode(&self) -> Mode;
    fn on_upload(&self, session: &mut Session, upload: &ImageUpload) -> Step;
    fn on_question(&self, session: &Session, question: &str) -> Step;
}

pub struct DescribeStrategy;

impl TurnStrategy for DescribeStrategy {
    fn mode(&self) -> Mode {
        Mode::Describe
    }

    fn on_upload(&self, _session: &mut Session, upload: &ImageUpload) -> Step {
        let image = upload.bytes().clone();
        Step::Ask {
            turn: Turn::user_with_image(DESCRIBE_USER_TEXT, image.clone()),
            call: ModelCall {
                prompt: DESCRIBE_PROMPT.to_string(),
                image,
            },
        }
    }

    fn on_question(&self, _session: &Session, _question: &str) -> Step {
        Step::Rejected {
            reason: "Describe mode only reacts to uploads; start a Q&A session to ask questions."
                .to_string(),
        }
    }
}

pub struct QuestionStrategy;

impl TurnStrategy for QuestionStrategy {
    fn mode(&self) -> Mode {
        Mode::QandA
    }

    fn on_upload(&self, session: &mut Session, upload: &ImageUpload) -> Step {
        if session.set_pinned_image(upload.name(), upload.bytes().clone()) {
            Step::Pinned {
                name: upload.name().to_string(),
            }
        } else {
            Step::Unchanged
        }
    }

    fn on_question(&self, session: &Session, question: &str) -> Step {
        let Some(pinned) = session.pinned() else {
            return Step::Rejected {
                reason: "Upload an image before asking a question.".to_string(),
            };
        };
        if question.trim().is_empty() {
            return Step::Rejected {
                reason: "Question is empty.".to_string(),
            };
        }
        Step::Ask {
            turn: Turn::user(question),
            call: ModelCall {
                prompt: question.to_string(),
                image: pinned.bytes().clone(),
            },
        }
    }
}
