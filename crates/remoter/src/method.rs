//! # Method Tables
//!
//! An explicit registry from method name to bound handler. Both sides of the
//! protocol use one: the session type publishes the methods peers may invoke,
//! and each peer type publishes the methods the session may invoke.
//!
//! ## Calling conventions
//!
//! Every entry declares, at registration, how it is run:
//!
//! - **Sync** (the default): the caller runs it to completion before doing
//!   anything else. On a peer this means the poll loop waits for it.
//! - **LongRunning**: the caller runs it concurrently. A peer method that calls
//!   back into the session with a long-running call must itself be long-running,
//!   otherwise the poll loop would wait on a future only the poll loop can resolve.

use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::args::Args;

/// How a bound method is run by whoever dispatches it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    #[default]
    Sync,
    LongRunning,
}

/// Why a handler did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The method failed. Delivered to the caller as a string result.
    Application(String),
    /// The method asked the hosting process to stop with this exit code.
    Exit(i32),
}

impl CallError {
    pub fn application(e: impl std::fmt::Display) -> Self {
        Self::Application(e.to_string())
    }

    /// The value delivered to the remote caller in place of a result.
    pub fn into_value(self) -> Value {
        match self {
            Self::Application(msg) => Value::String(msg),
            Self::Exit(code) => Value::String(code.to_string()),
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application(msg) => write!(f, "{}", msg),
            Self::Exit(code) => write!(f, "exit requested with status {}", code),
        }
    }
}

impl std::error::Error for CallError {}

pub type CallResult = Result<Value, CallError>;

/// A bound method: receives the target object and the call's arguments.
pub type Handler<T> = Arc<dyn Fn(Arc<T>, Args) -> BoxFuture<'static, CallResult> + Send + Sync>;

pub struct Method<T> {
    pub convention: CallingConvention,
    pub handler: Handler<T>,
}

impl<T> Clone for Method<T> {
    fn clone(&self) -> Self {
        Self {
            convention: self.convention,
            handler: self.handler.clone(),
        }
    }
}

/// The calling conventions of a method table, detached from its handlers.
///
/// Peers hold one of these for the session type so the `SessionProxy` can pick
/// the right call path without seeing the session's code.
pub type Conventions = HashMap<String, CallingConvention>;

/// Name-to-handler registry for one target type, built once and then shared.
pub struct MethodTable<T> {
    methods: HashMap<String, Method<T>>,
}

impl<T> Clone for MethodTable<T> {
    fn clone(&self) -> Self {
        Self { methods: self.methods.clone() }
    }
}

impl<T> Default for MethodTable<T> {
    fn default() -> Self {
        Self { methods: HashMap::new() }
    }
}

impl<T: Send + Sync + 'static> MethodTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method with an explicit calling convention. Re-registering a
    /// name replaces the previous entry.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, convention: CallingConvention, f: F) -> Self
    where
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        let handler: Handler<T> = Arc::new(move |target, args| f(target, args).boxed());
        self.methods.insert(name.into(), Method { convention, handler });
        self
    }

    #[must_use]
    pub fn sync<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        self.method(name, CallingConvention::Sync, f)
    }

    #[must_use]
    pub fn long_running<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        self.method(name, CallingConvention::LongRunning, f)
    }

    /// Adds `print`, `input` and `exit`, which every peer answers.
    #[must_use]
    pub fn with_builtins(self) -> Self {
        self.sync("print", |_, args| async move { builtin_print(&args) })
            .sync("input", |_, args| builtin_input(args))
            .sync("exit", |_, args| builtin_exit(args))
    }
}

impl<T> MethodTable<T> {
    pub fn get(&self, name: &str) -> Option<&Method<T>> {
        self.methods.get(name)
    }

    /// Unknown methods are treated as synchronous.
    pub fn convention(&self, name: &str) -> CallingConvention {
        self.methods
            .get(name)
            .map(|m| m.convention)
            .unwrap_or_default()
    }

    pub fn conventions(&self) -> Conventions {
        self.methods
            .iter()
            .map(|(name, m)| (name.clone(), m.convention))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Runs `name` against `target`. A missing method is an application error.
    pub async fn invoke(&self, target: Arc<T>, name: &str, args: Args) -> CallResult {
        let Some(method) = self.methods.get(name) else {
            return Err(CallError::Application(format!("no such method '{}'", name)));
        };
        (method.handler)(target, args).await
    }
}

/// Renders a value the way a console shows it: strings bare, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn builtin_print(args: &Args) -> CallResult {
    let sep = match args.keyword.get("sep") {
        Some(Value::String(s)) => s.clone(),
        _ => " ".to_string(),
    };
    let line = args
        .positional
        .iter()
        .map(display_value)
        .collect::<Vec<_>>()
        .join(&sep);
    println!("{}", line);
    Ok(Value::Null)
}

async fn builtin_exit(args: Args) -> CallResult {
    let status = args.get_or(0, "status", 0)?;
    Err(CallError::Exit(status))
}

async fn builtin_input(args: Args) -> CallResult {
    let prompt = args.value(0, "prompt").map(display_value).unwrap_or_default();

    let line = tokio::task::spawn_blocking(move || {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line)
    })
    .await
    .map_err(CallError::application)?
    .map_err(CallError::application)?;

    Ok(Value::String(line.trim_end_matches(['\r', '\n']).to_string()))
}
