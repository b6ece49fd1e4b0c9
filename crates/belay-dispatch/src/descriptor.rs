//! The attribute descriptor: kind, optional name override, timeout,
//! cache/exclusive flags, setup/teardown ordering, thread auto-restart/
//! priority, and an optional embedded Python template.

use crate::template::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Task,
    Setup,
    Teardown,
    Thread,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Task => "task",
            OperationKind::Setup => "setup",
            OperationKind::Teardown => "teardown",
            OperationKind::Thread => "thread",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// `None` defers to the session-default operation deadline.
    pub timeout_ms: Option<u64>,
    pub cache: bool,
    pub exclusive: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self { timeout_ms: None, cache: false, exclusive: false }
    }
}

#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Ascending run order; ties broken by declaration order.
    pub order: i32,
    /// A failing critical setup aborts `connect()`.
    pub critical: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self { order: 0, critical: false, timeout_ms: None }
    }
}

#[derive(Debug, Clone)]
pub struct TeardownOptions {
    pub order: i32,
    /// Failures are logged but do not prevent disconnect when true.
    pub ignore_errors: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for TeardownOptions {
    fn default() -> Self {
        Self { order: 0, ignore_errors: true, timeout_ms: None }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadOptions {
    /// Wraps the launched body in `while True: try: ... except: ...`.
    pub auto_restart: bool,
    pub priority: i32,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self { auto_restart: false, priority: 0 }
    }
}

#[derive(Debug, Clone)]
pub enum OperationOptions {
    Task(TaskOptions),
    Setup(SetupOptions),
    Teardown(TeardownOptions),
    Thread(ThreadOptions),
}

impl OperationOptions {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationOptions::Task(_) => OperationKind::Task,
            OperationOptions::Setup(_) => OperationKind::Setup,
            OperationOptions::Teardown(_) => OperationKind::Teardown,
            OperationOptions::Thread(_) => OperationKind::Thread,
        }
    }
}

/// A declared operation: a tagged variant replacing the source's
/// per-attribute classes with one tagged-variant `Operation`.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub options: OperationOptions,
    pub template: Option<Template>,
    /// Monotonic counter assigned at registration time; breaks ties in
    /// setup/teardown `order`.
    pub declaration_order: u64,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        self.options.kind()
    }

    pub fn as_task(&self) -> Option<&TaskOptions> {
        match &self.options {
            OperationOptions::Task(opts) => Some(opts),
            _ => None,
        }
    }

    pub fn as_setup(&self) -> Option<&SetupOptions> {
        match &self.options {
            OperationOptions::Setup(opts) => Some(opts),
            _ => None,
        }
    }

    pub fn as_teardown(&self) -> Option<&TeardownOptions> {
        match &self.options {
            OperationOptions::Teardown(opts) => Some(opts),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&ThreadOptions> {
        match &self.options {
            OperationOptions::Thread(opts) => Some(opts),
            _ => None,
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match &self.options {
            OperationOptions::Task(opts) => opts.timeout_ms,
            OperationOptions::Setup(opts) => opts.timeout_ms,
            OperationOptions::Teardown(opts) => opts.timeout_ms,
            OperationOptions::Thread(_) => None,
        }
    }
}
