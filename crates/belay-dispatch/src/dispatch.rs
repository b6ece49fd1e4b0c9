//! `DeviceBuilder` / `Dispatcher`: a builder pattern standing in for
//! runtime reflection — operations are registered into a dispatch table
//! at construction time. `Dispatcher` is the one place user-declared
//! operations turn into `Session` calls.

use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use belay_session::{Session, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::descriptor::{Operation, OperationKind, OperationOptions, SetupOptions, TaskOptions, TeardownOptions, ThreadOptions};
use crate::error::{DispatchError, Result};
use crate::template::{default_deny_list, synthesize_call, Template};

/// Session-default task timeout when an attribute doesn't supply its own.
const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;

/// Bookkeeping for a launched background thread. The host tracks it by name
/// for later stop requests but never monitors its output.
struct ThreadHandle {
    #[allow(dead_code)]
    priority: i32,
}

/// Registers declared operations into a dispatch table. No runtime
/// reflection is used — Rust has none to use.
#[derive(Default)]
pub struct DeviceBuilder {
    operations: Vec<Operation>,
    deny_list: Vec<String>,
    next_declaration_order: u64,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        Self { operations: Vec::new(), deny_list: default_deny_list(), next_declaration_order: 0 }
    }

    /// Overrides the best-effort template deny-list (default is the three
    /// patterns named in `default_deny_list`).
    pub fn deny_list(mut self, patterns: Vec<String>) -> Self {
        self.deny_list = patterns;
        self
    }

    pub fn task(mut self, name: impl Into<String>, options: TaskOptions, template: Option<Template>) -> Self {
        self.push(name, OperationOptions::Task(options), template);
        self
    }

    pub fn setup(mut self, name: impl Into<String>, options: SetupOptions, template: Option<Template>) -> Self {
        self.push(name, OperationOptions::Setup(options), template);
        self
    }

    pub fn teardown(mut self, name: impl Into<String>, options: TeardownOptions, template: Option<Template>) -> Self {
        self.push(name, OperationOptions::Teardown(options), template);
        self
    }

    pub fn thread(mut self, name: impl Into<String>, options: ThreadOptions, template: Option<Template>) -> Self {
        self.push(name, OperationOptions::Thread(options), template);
        self
    }

    fn push(&mut self, name: impl Into<String>, options: OperationOptions, template: Option<Template>) {
        let declaration_order = self.next_declaration_order;
        self.next_declaration_order += 1;
        self.operations.push(Operation { name: name.into(), options, template, declaration_order });
    }

    /// Binds this dispatch table to a `Session`. This is the one
    /// registration point; `Dispatcher` owns the session outright rather
    /// than borrowing it, avoiding a self-referential lifetime while
    /// preserving "dispatch never outlives one session".
    pub fn build(self, session: Session) -> Dispatcher {
        Dispatcher { session, operations: self.operations, deny_list: self.deny_list, threads: HashMap::new() }
    }
}

pub struct Dispatcher {
    session: Session,
    operations: Vec<Operation>,
    deny_list: Vec<String>,
    threads: HashMap<String, ThreadHandle>,
}

impl Dispatcher {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Connects the underlying session, then runs every declared `setup`
    /// operation in ascending `order` (ties broken by declaration order).
    #[instrument(skip(self, cancel))]
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.session.connect(cancel).await?;
        self.run_setups(cancel).await
    }

    /// Runs every declared `teardown` operation, then disconnects the
    /// session unconditionally. Failures are logged but do not prevent
    /// disconnect when a teardown's `ignore_errors` is set.
    #[instrument(skip(self, cancel))]
    pub async fn disconnect(&mut self, cancel: &CancellationToken) -> Result<()> {
        let result = self.run_teardowns(cancel).await;
        self.session.disconnect(cancel).await;
        result
    }

    async fn run_setups(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut setups: Vec<Operation> = self
            .operations
            .iter()
            .filter(|op| op.kind() == OperationKind::Setup)
            .cloned()
            .collect();
        setups.sort_by_key(|op| (op.as_setup().expect("filtered to setups").order, op.declaration_order));

        for op in setups {
            let opts = op.as_setup().expect("filtered to setups").clone();
            let code = self.render_code(&op, &[], &HashMap::new())?;
            match self.run_with_timeout(&op.name, &code, opts.timeout_ms, cancel).await {
                Ok(_) => debug!(setup = %op.name, "setup completed"),
                Err(err) if opts.critical => {
                    warn!(setup = %op.name, error = %err, "critical setup failed; aborting connect");
                    return Err(DispatchError::CriticalSetupFailed(op.name.clone()));
                }
                Err(err) => warn!(setup = %op.name, error = %err, "non-critical setup failed"),
            }
        }
        Ok(())
    }

    async fn run_teardowns(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut teardowns: Vec<Operation> = self
            .operations
            .iter()
            .filter(|op| op.kind() == OperationKind::Teardown)
            .cloned()
            .collect();
        teardowns.sort_by_key(|op| (op.as_teardown().expect("filtered to teardowns").order, op.declaration_order));

        let mut first_hard_error = None;
        for op in teardowns {
            let opts = op.as_teardown().expect("filtered to teardowns").clone();
            let code = self.render_code(&op, &[], &HashMap::new())?;
            if let Err(err) = self.run_with_timeout(&op.name, &code, opts.timeout_ms, cancel).await {
                if opts.ignore_errors {
                    warn!(teardown = %op.name, error = %err, "teardown failed, ignored");
                } else {
                    warn!(teardown = %op.name, error = %err, "teardown failed");
                    first_hard_error.get_or_insert(err);
                }
            }
        }
        match first_hard_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs a declared task by name, honoring its template (or synthesized
    /// call), timeout, and cache flag.
    #[instrument(skip(self, args, params, cancel), fields(task = name))]
    pub async fn call_task(
        &mut self,
        name: &str,
        args: &[Value],
        params: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let op = self.find(name, OperationKind::Task)?.clone();
        let opts = op.as_task().expect("kind checked above").clone();
        let code = self.render_code(&op, args, params)?;

        let timeout_ms = opts.timeout_ms.unwrap_or(DEFAULT_TASK_TIMEOUT_MS);
        // Deadline is enforced as cancellation, not by dropping the execute
        // future: a dropped future skips the engine's own recovery (INTERRUPT
        // + drain back to Raw), leaving it desynced from the wire. A child
        // token keeps the timeout from cancelling the caller's other
        // in-flight operations on `cancel`.
        let child = cancel.child_token();
        let run = async {
            if opts.cache {
                let sig = signature_hash(&op.name, &code);
                self.session.execute_cached(sig, &code, &child).await
            } else {
                self.session.execute(&code, &child).await
            }
        };

        with_deadline(name, &child, timeout_ms, run).await
    }

    /// Launches a declared `thread` operation's Python snippet on the
    /// device and returns immediately. `auto_restart` wraps the body in a
    /// `while True: try: ... except: ...` loop.
    pub async fn start_thread(
        &mut self,
        name: &str,
        args: &[Value],
        params: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let op = self.find(name, OperationKind::Thread)?.clone();
        let opts = op.as_thread().expect("kind checked above").clone();
        let body = self.render_code(&op, args, params)?;

        let wrapped = if opts.auto_restart {
            format!("\nwhile True:\n  try:\n   {body}\n  except Exception:\n   pass\n")
        } else {
            body
        };
        let launch = format!(
            "import _thread; _thread.start_new_thread(lambda: exec({}), ())",
            belay_session::value::encode_python_literal(&Value::Str(wrapped))
        );
        self.session.execute(&launch, cancel).await?;
        self.threads.insert(name.to_string(), ThreadHandle { priority: opts.priority });
        Ok(())
    }

    /// Forgets a tracked thread by name. The host never monitors thread
    /// output, so this is bookkeeping only — it does not itself signal the
    /// device to stop.
    pub fn forget_thread(&mut self, name: &str) -> bool {
        self.threads.remove(name).is_some()
    }

    pub fn is_thread_tracked(&self, name: &str) -> bool {
        self.threads.contains_key(name)
    }

    fn find(&self, name: &str, kind: OperationKind) -> Result<&Operation> {
        let op = self
            .operations
            .iter()
            .find(|op| op.name == name)
            .ok_or_else(|| DispatchError::UnknownOperation(name.to_string()))?;
        if op.kind() != kind {
            return Err(DispatchError::WrongKind(name.to_string(), kind.label()));
        }
        Ok(op)
    }

    /// Template takes priority over a generated call. Without a template,
    /// synthesizes
    /// `snake_case_name(arg1, arg2, ...)`.
    fn render_code(&self, op: &Operation, args: &[Value], params: &HashMap<String, Value>) -> Result<String> {
        match &op.template {
            Some(template) => Ok(template.render(params, &self.deny_list)?),
            None => Ok(synthesize_call(&op.name, args)),
        }
    }

    async fn run_with_timeout(&mut self, label: &str, code: &str, timeout_ms: Option<u64>, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TASK_TIMEOUT_MS);
        let child = cancel.child_token();
        with_deadline(label, &child, timeout_ms, self.session.execute(code, &child)).await
    }
}

fn signature_hash(name: &str, code: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    code.hash(&mut hasher);
    hasher.finish()
}

/// Races `fut` against `timeout_ms`. On timeout, cancels `child` and awaits
/// `fut` to completion rather than dropping it, so an in-flight
/// `Session::execute` runs its own cancellation recovery before this
/// returns — the engine lands back in `Raw` or `Broken`, never mid-`Executing`.
async fn with_deadline<F>(label: &str, child: &CancellationToken, timeout_ms: u64, fut: F) -> Result<Vec<u8>>
where
    F: Future<Output = belay_session::Result<Vec<u8>>>,
{
    tokio::pin!(fut);
    tokio::select! {
        biased;
        result = &mut fut => Ok(result?),
        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
            child.cancel();
            let _ = fut.await;
            Err(DispatchError::Timeout(label.to_string()))
        }
    }
}
