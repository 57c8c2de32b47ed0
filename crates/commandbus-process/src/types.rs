//! A process type's base contract (spec §4.7) and its erasure into an
//! object-safe handler. Grounded in the worker crate's own `Handler`/
//! `HandlerRegistry` split (`commandbus_worker::registry`): the core
//! traffics in opaque JSON and a trait object, typed state lives only at
//! the user boundary (SPEC_FULL §9 "Dynamic JSON payloads").

use std::str::FromStr;

use commandbus_core::ReplyMessage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ProcessError, ProcessResult};

/// The typed contract a process type implements. `State` is the process's
/// own data, round-tripped through JSON at the storage boundary; `Step` is
/// a closed set of step names with a JSON-free textual representation
/// (e.g. a `String` or a small enum implementing `Display`/`FromStr`).
pub trait ProcessDefinition: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned + Send + Sync;
    type Step: std::fmt::Display + FromStr + Clone + Eq + Send + Sync;

    fn process_type(&self) -> &str;
    fn domain(&self) -> &str;

    fn create_initial_state(&self, initial_data: Value) -> Self::State;
    fn get_first_step(&self, state: &Self::State) -> Self::Step;
    fn build_command(&self, step: &Self::Step, state: &Self::State) -> (String, Value);
    fn update_state(&self, state: &mut Self::State, step: &Self::Step, reply: &ReplyMessage);
    fn get_next_step(
        &self,
        current_step: &Self::Step,
        reply: &ReplyMessage,
        state: &Self::State,
    ) -> Option<Self::Step>;

    /// Compensation step for saga rollback. Absent by default: most steps
    /// have no meaningful undo.
    fn get_compensation_step(&self, _step: &Self::Step) -> Option<Self::Step> {
        None
    }
}

/// Object-safe view of a [`ProcessDefinition`], used by the registry and
/// router so processes of different types can share one map and one reply
/// loop. `TypedProcess` is the only implementation; it round-trips state
/// and step names through JSON/text at each call.
pub trait ProcessHandler: Send + Sync {
    fn process_type(&self) -> &str;
    fn domain(&self) -> &str;

    fn create_initial_state(&self, initial_data: Value) -> ProcessResult<Value>;
    fn first_step(&self, state: &Value) -> ProcessResult<String>;
    fn build_command(&self, step: &str, state: &Value) -> ProcessResult<(String, Value)>;
    fn update_state(&self, state: &mut Value, step: &str, reply: &ReplyMessage) -> ProcessResult<()>;
    fn next_step(
        &self,
        current_step: &str,
        reply: &ReplyMessage,
        state: &Value,
    ) -> ProcessResult<Option<String>>;
    fn compensation_step(&self, step: &str) -> ProcessResult<Option<String>>;
}

/// Adapter from a typed [`ProcessDefinition`] to the object-safe
/// [`ProcessHandler`] the registry and router deal in.
pub struct TypedProcess<D>(pub D);

fn parse_step<D: ProcessDefinition>(raw: &str) -> ProcessResult<D::Step> {
    raw.parse::<D::Step>()
        .map_err(|_| ProcessError::InvalidStep(raw.to_string(), std::any::type_name::<D>()))
}

impl<D: ProcessDefinition> ProcessHandler for TypedProcess<D> {
    fn process_type(&self) -> &str {
        self.0.process_type()
    }

    fn domain(&self) -> &str {
        self.0.domain()
    }

    fn create_initial_state(&self, initial_data: Value) -> ProcessResult<Value> {
        let state = self.0.create_initial_state(initial_data);
        Ok(serde_json::to_value(state)?)
    }

    fn first_step(&self, state: &Value) -> ProcessResult<String> {
        let state: D::State = serde_json::from_value(state.clone())?;
        Ok(self.0.get_first_step(&state).to_string())
    }

    fn build_command(&self, step: &str, state: &Value) -> ProcessResult<(String, Value)> {
        let step = parse_step::<D>(step)?;
        let state: D::State = serde_json::from_value(state.clone())?;
        Ok(self.0.build_command(&step, &state))
    }

    fn update_state(&self, state: &mut Value, step: &str, reply: &ReplyMessage) -> ProcessResult<()> {
        let step = parse_step::<D>(step)?;
        let mut typed: D::State = serde_json::from_value(state.clone())?;
        self.0.update_state(&mut typed, &step, reply);
        *state = serde_json::to_value(typed)?;
        Ok(())
    }

    fn next_step(
        &self,
        current_step: &str,
        reply: &ReplyMessage,
        state: &Value,
    ) -> ProcessResult<Option<String>> {
        let step = parse_step::<D>(current_step)?;
        let typed: D::State = serde_json::from_value(state.clone())?;
        Ok(self.0.get_next_step(&step, reply, &typed).map(|s| s.to_string()))
    }

    fn compensation_step(&self, step: &str) -> ProcessResult<Option<String>> {
        let step = parse_step::<D>(step)?;
        Ok(self.0.get_compensation_step(&step).map(|s| s.to_string()))
    }
}
