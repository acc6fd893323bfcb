/// Scripted command gateway for tests and dry runs
///
/// Records every call and answers from rules matched by command prefix.
/// Matching uses the unquoted `CommandSpec::plain` rendering.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{CommandGateway, CommandOutput, CommandSpec, ExecutionTarget};
use crate::error::GatewayError;

/// Canned answer for a matching command.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Succeed(String),
    Fail { exit_code: i32, stderr: String },
    Cancel,
}

impl ScriptedResponse {
    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        ScriptedResponse::Fail {
            exit_code,
            stderr: stderr.into(),
        }
    }

    fn answer(&self, command: &CommandSpec) -> Result<CommandOutput, GatewayError> {
        match self {
            ScriptedResponse::Succeed(stdout) => Ok(CommandOutput::success(stdout.clone())),
            ScriptedResponse::Fail { exit_code, stderr } => Err(GatewayError::Failed {
                command: command.display(),
                exit_code: Some(*exit_code),
                stderr: stderr.clone(),
            }),
            ScriptedResponse::Cancel => Err(GatewayError::Cancelled {
                command: command.display(),
            }),
        }
    }
}

struct Rule {
    prefix: String,
    /// Answered in order; the last answer repeats.
    responses: VecDeque<ScriptedResponse>,
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: CommandSpec,
    pub target: ExecutionTarget,
}

impl RecordedCall {
    pub fn plain(&self) -> String {
        self.command.plain()
    }
}

/// Gateway double: first rule whose prefix matches `CommandSpec::plain()`
/// answers; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedGateway {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command starting with `prefix` with `response`.
    pub fn on(self, prefix: impl Into<String>, response: ScriptedResponse) -> Self {
        self.on_sequence(prefix, vec![response])
    }

    /// Answer successive matching commands in order, repeating the last answer.
    pub fn on_sequence(self, prefix: impl Into<String>, responses: Vec<ScriptedResponse>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.into(),
                responses: responses.into(),
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Unquoted command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::plain).collect()
    }

    /// Number of calls whose rendered command starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn respond(&self, command: &CommandSpec) -> Result<CommandOutput, GatewayError> {
        let rendered = command.plain();
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Ok(CommandOutput::default()),
        };
        for rule in rules.iter_mut() {
            if rendered.starts_with(&rule.prefix) {
                let response = if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                };
                if let Some(response) = response {
                    return response.answer(command);
                }
            }
        }
        Ok(CommandOutput::default())
    }
}

impl CommandGateway for ScriptedGateway {
    fn execute<'a>(
        &'a self,
        command: &'a CommandSpec,
        target: &'a ExecutionTarget,
    ) -> BoxFuture<'a, Result<CommandOutput, GatewayError>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                command: command.clone(),
                target: target.clone(),
            });
        }
        let result = self.respond(command);
        async move { result }.boxed()
    }
}
