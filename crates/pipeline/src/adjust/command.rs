use std::path::Path;

use serde_json::Value;
use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::process::{self, ProcessSpec};

/// An alignment tool run as an external program inside the working tree.
///
/// The request's parameters are written to the program's stdin as JSON.
/// If its stdout (or, failing that, its last stdout line) is a JSON
/// object, that object is the provider's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandProvider {
    pub program: String,
    pub args: Vec<String>,
    /// Exit codes meaning the caller's input was rejected.
    pub user_error_exit_codes: Vec<i32>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            user_error_exit_codes: Vec::new(),
        }
    }

    pub fn with_user_error_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.user_error_exit_codes = codes;
        self
    }

    /// Parse `program arg...`, split on whitespace.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self::new(program, words.collect()))
    }

    pub fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn run(
        &self,
        ctx: &JobContext,
        work_tree: &Path,
        params: &Value,
    ) -> CoreResult<Option<Value>> {
        let stdin = serde_json::to_vec(params)
            .map_err(|e| CoreError::Internal(format!("could not encode parameters: {e}")))?;
        let spec = ProcessSpec::new(self.program.as_str())
            .args(self.args.iter().cloned())
            .cwd(work_tree)
            .env("SOURCEPIN_JOB_ID", ctx.job_id().as_str())
            .stdin(stdin)
            .describe(format!("Alignment with {} failed", self.program));

        let output = process::run(ctx, spec).await.map_err(|e| match e {
            CoreError::Command(failure)
                if failure
                    .exit_code
                    .is_some_and(|code| self.user_error_exit_codes.contains(&code)) =>
            {
                CoreError::Command(failure.into_user_error())
            }
            other => other,
        })?;

        Ok(parse_result(&output.stdout))
    }
}

fn parse_result(stdout: &str) -> Option<Value> {
    let as_object = |text: &str| {
        serde_json::from_str::<Value>(text)
            .ok()
            .filter(Value::is_object)
    };
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    as_object(trimmed).or_else(|| {
        trimmed
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| as_object(l.trim()))
    })
}
