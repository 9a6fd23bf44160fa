//! Capability environment for one invocation
//!
//! Scripts get a fixed allow-list of builtins, a fixed allow-list of
//! methods, a console, and exactly one data binding. Nothing else.
//! This is how you keep a data-munging script from reading `/etc/shadow`.

use crate::runtime::RuntimeError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Name under which the staged data is bound.
pub const DATA_BINDING: &str = "data_file";

/// Builtins visible to scripts. Fixed for the lifetime of the service.
pub const ALLOWED_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "chr", "dict", "divmod", "enumerate", "float", "int", "len",
    "list", "max", "min", "ord", "pow", "print", "range", "repr", "reversed", "round", "sorted",
    "str", "sum", "tuple", "zip",
];

/// Names that can reach interpreter internals, the filesystem or other
/// modules. Rejected by the validator and never resolvable at runtime.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "__import__", "__builtins__", "breakpoint", "classmethod", "compile", "delattr", "dir",
    "eval", "exec", "exit", "getattr", "globals", "hasattr", "help", "input", "locals",
    "memoryview", "object", "open", "property", "quit", "setattr", "staticmethod", "super",
    "type", "vars",
];

pub const STR_METHODS: &[&str] = &[
    "count", "endswith", "find", "isalpha", "isdigit", "isspace", "join", "lower", "lstrip",
    "replace", "rstrip", "split", "splitlines", "startswith", "strip", "title", "upper",
];

pub const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

pub const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];

pub const DATA_METHODS: &[&str] = &["lines", "read", "size"];

/// Whether `name` is a method of any allowed type.
pub fn is_allowed_attribute(name: &str) -> bool {
    [STR_METHODS, LIST_METHODS, DICT_METHODS, DATA_METHODS]
        .iter()
        .any(|methods| methods.contains(&name))
}

pub fn is_forbidden_name(name: &str) -> bool {
    (name.starts_with('_') && name != "_") || FORBIDDEN_NAMES.contains(&name)
}

/// Opaque, read-only handle to the staged data.
///
/// Scripts can read through it but can never observe where it lives.
#[derive(Clone)]
pub struct DataHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    path: PathBuf,
    byte_length: u64,
}

impl DataHandle {
    pub fn new(path: impl Into<PathBuf>, byte_length: u64) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                path: path.into(),
                byte_length,
            }),
        }
    }

    pub fn byte_length(&self) -> u64 {
        self.inner.byte_length
    }

    pub fn same_handle(&self, other: &DataHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read the whole resource, refusing anything larger than `limit` bytes.
    pub(crate) fn read(&self, limit: usize) -> Result<Vec<u8>, RuntimeError> {
        if self.inner.byte_length > limit as u64 {
            return Err(RuntimeError::ResourceExhausted(format!(
                "{} is larger than {} bytes",
                DATA_BINDING, limit
            )));
        }
        std::fs::read(&self.inner.path).map_err(|e| {
            tracing::warn!(kind = ?e.kind(), "staged data could not be read");
            RuntimeError::CapabilityDenied(format!("{} is unavailable", DATA_BINDING))
        })
    }
}

impl fmt::Debug for DataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataHandle")
            .field("byte_length", &self.inner.byte_length)
            .finish_non_exhaustive()
    }
}

/// Captured `print` output, capped at a byte budget.
#[derive(Clone, Debug)]
pub struct Console {
    inner: Arc<Mutex<ConsoleBuffer>>,
}

#[derive(Debug)]
struct ConsoleBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl Console {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConsoleBuffer {
                text: String::new(),
                limit,
                truncated: false,
            })),
        }
    }

    pub fn write(&self, s: &str) {
        let Ok(mut buf) = self.inner.lock() else {
            return;
        };
        if buf.truncated {
            return;
        }
        let room = buf.limit.saturating_sub(buf.text.len());
        if s.len() <= room {
            buf.text.push_str(s);
        } else {
            let mut cut = room;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            buf.text.push_str(&s[..cut]);
            buf.truncated = true;
        }
    }

    pub fn contents(&self) -> String {
        self.inner
            .lock()
            .map(|buf| buf.text.clone())
            .unwrap_or_default()
    }

    pub fn is_truncated(&self) -> bool {
        self.inner.lock().map(|buf| buf.truncated).unwrap_or(false)
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

/// A value bound into the environment by the service.
#[derive(Debug, Clone)]
pub enum Binding {
    Data(DataHandle),
}

/// Everything a script can see. Built fresh for every invocation.
#[derive(Debug)]
pub struct CapabilityEnvironment {
    allowed_builtins: BTreeSet<&'static str>,
    bindings: BTreeMap<&'static str, Binding>,
    console: Console,
}

impl CapabilityEnvironment {
    /// Build the environment for one invocation around its staged data.
    pub fn build(handle: DataHandle) -> Self {
        Self::with_console(handle, Console::default())
    }

    pub fn with_console(handle: DataHandle, console: Console) -> Self {
        let allowed_builtins = ALLOWED_BUILTINS
            .iter()
            .copied()
            .filter(|name| !is_forbidden_name(name))
            .collect();

        let mut bindings = BTreeMap::new();
        bindings.insert(DATA_BINDING, Binding::Data(handle));

        Self {
            allowed_builtins,
            bindings,
            console,
        }
    }

    /// Resolve a builtin by name, only if it is on the allow-list.
    pub fn builtin(&self, name: &str) -> Option<&'static str> {
        self.allowed_builtins.get(name).copied()
    }

    pub fn allows_builtin(&self, name: &str) -> bool {
        self.allowed_builtins.contains(name)
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn binding_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bindings.keys().copied()
    }

    pub fn console(&self) -> &Console {
        &self.console
    }
}
