pub mod config;
mod controller;
pub mod providers;
mod strategy;

pub use config::{ModelConfig, ModelOverrides};
pub use controller::{format_model_failure, TurnController, TurnOutcome, REMEDIATION_HINT};
pub use providers::{
    build_provider, ChatReply, ChatRequest, FailureKind, ModelCallFailure, VisionModel,
};
pub use strategy::{
    DescribeStrategy, Mode, ModelCall, QuestionStrategy, Step, TurnStrategy, DESCRIBE_PROMPT,
    DESCRIBE_USER_TEXT,
};
