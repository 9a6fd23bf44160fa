//! PyJIT Sandbox - restricted script language
//!
//! Scripts are parsed and checked by [`validate`] before anything runs,
//! then executed by an [`Executor`] against a [`CapabilityEnvironment`]
//! holding the allow-listed builtins and the single data binding.

pub mod ast;
pub mod capabilities;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod validator;
pub mod value;

mod builtins;

pub use capabilities::{
    Binding, CapabilityEnvironment, Console, DataHandle, ALLOWED_BUILTINS, DATA_BINDING,
};
pub use runtime::{
    ExecutionLimits, Executor, Interrupt, RuntimeError, WORKER_STACK_SIZE,
};
pub use validator::{validate, ExecutableUnit, ValidationError};
