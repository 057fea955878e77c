use std::time::Instant;

use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime, Value};
use serde_json::Value as JsonValue;

use crate::config::SandboxConfig;
use crate::models::Descriptor;

/// Name of the global function a rule script defines.
pub const DESCRIBE_HOOK: &str = "describe";

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to create script runtime: {0}")]
    Runtime(String),
    #[error("script failed to load: {0}")]
    Load(String),
    #[error("describe hook failed: {0}")]
    Hook(String),
    #[error("describe hook returned an invalid descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
}

fn caught(err: &CaughtError<'_>) -> String {
    match err {
        CaughtError::Exception(exception) => exception
            .message()
            .unwrap_or_else(|| exception.to_string()),
        other => other.to_string(),
    }
}

/// Builds one isolated interpreter per classification attempt.
#[derive(Debug, Clone, Copy)]
pub struct RuleSandbox {
    config: SandboxConfig,
}

impl RuleSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Evaluates `script` in a fresh runtime. The returned VM exposes the
    /// script's hooks until it is released.
    pub fn load(&self, script: &str) -> Result<RuleVm, SandboxError> {
        let runtime = Runtime::new().map_err(|err| SandboxError::Runtime(err.to_string()))?;
        runtime.set_memory_limit(self.config.memory_limit_bytes);
        let deadline = Instant::now() + self.config.timeout();
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));

        let context =
            Context::full(&runtime).map_err(|err| SandboxError::Runtime(err.to_string()))?;
        context.with(|ctx| {
            ctx.eval::<(), _>(script)
                .catch(&ctx)
                .map_err(|err| SandboxError::Load(caught(&err)))
        })?;
        Ok(RuleVm { context, runtime })
    }
}

/// A loaded rule script. Not `Send`; create, call and release it on one
/// thread.
pub struct RuleVm {
    // Dropped before the runtime that owns it.
    context: Context,
    runtime: Runtime,
}

impl RuleVm {
    /// Calls the script's `describe(entry, file, files)` hook.
    ///
    /// Arguments are JSON documents. A missing hook, or one returning
    /// `undefined` or `null`, yields an empty descriptor; promises are
    /// resolved before decoding.
    pub fn describe(
        &self,
        entry: &str,
        file: &str,
        files: &str,
    ) -> Result<Descriptor, SandboxError> {
        let output = self.context.with(|ctx| {
            call_describe(&ctx, entry, file, files)
                .catch(&ctx)
                .map_err(|err| SandboxError::Hook(caught(&err)))
        })?;
        match output {
            None => Ok(Descriptor::default()),
            Some(json) => match serde_json::from_str::<JsonValue>(&json)? {
                JsonValue::Null => Ok(Descriptor::default()),
                value => Ok(serde_json::from_value(value)?),
            },
        }
    }

    /// Tears the interpreter down.
    pub fn release(self) {
        let Self { context, runtime } = self;
        drop(context);
        runtime.run_gc();
    }
}

fn call_describe<'js>(
    ctx: &Ctx<'js>,
    entry: &str,
    file: &str,
    files: &str,
) -> rquickjs::Result<Option<String>> {
    let hook: Option<Function> = ctx.globals().get(DESCRIBE_HOOK)?;
    let Some(hook) = hook else {
        return Ok(None);
    };
    let args = (
        ctx.json_parse(entry)?,
        ctx.json_parse(file)?,
        ctx.json_parse(files)?,
    );
    let result: Value = hook.call(args)?;
    let result = match result.clone().into_promise() {
        Some(promise) => promise.finish::<Value>()?,
        None => result,
    };
    if result.is_undefined() || result.is_null() {
        return Ok(None);
    }
    match ctx.json_stringify(result)? {
        Some(json) => Ok(Some(json.to_string()?)),
        None => Ok(None),
    }
}
