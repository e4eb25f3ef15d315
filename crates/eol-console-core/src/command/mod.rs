//! Command Pipeline
//!
//! Operator commands are a [`Verb`] addressed to one target. The verb
//! table ([`verbs`]) knows each verb's endpoint, single-flight class and
//! the mirror mutation its success implies; the [`CommandPipeline`] runs
//! commands through the safety gate, confirmation and transport.

mod error;
mod flight;
mod pipeline;
mod verbs;

pub use error::CommandError;
pub use flight::{FlightClass, FlightGuard, SingleFlight};
pub use pipeline::{
    Command, CommandOptions, CommandPipeline, CommandRecord, CommandStatus, PipelineContext,
    PipelineHooks, COMMAND_HISTORY,
};
pub use verbs::{
    CommandTarget, DigitalIoVerb, LoadcellVerb, McuVerb, MotionProfile, PowerVerb, RobotVerb,
    TestStart, TestVerb, Verb,
};
