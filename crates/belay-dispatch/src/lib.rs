//! Declarative attribute dispatch.
//!
//! Turns user-declared operations — tagged as `task`, `setup`, `teardown`,
//! or `thread`, each optionally carrying an embedded Python template — into
//! calls against a `belay_session::Session`. No runtime reflection: this is
//! modeled as a builder pattern, and [`DeviceBuilder`] is that builder.

mod descriptor;
mod dispatch;
mod error;
mod template;

pub use descriptor::{
    Operation, OperationKind, OperationOptions, SetupOptions, TaskOptions, TeardownOptions, ThreadOptions,
};
pub use dispatch::{DeviceBuilder, Dispatcher};
pub use error::{DispatchError, Result};
pub use template::{default_deny_list, synthesize_call, Template};
