//! Haiku tree-walking evaluator.
//!
//! The [`Evaluator`] walks a parsed [`Program`], binds variables, expands
//! conditionals and loops, and synthesizes one [`RequestDescriptor`] per
//! `request` statement it reaches.  Actual HTTP is delegated to an optional
//! request callback; without one, each descriptor itself becomes the
//! previous response so `$_` chains still resolve.
//!
//! Expression evaluation is synchronous and fail-soft.  Only statements can
//! suspend (on the callback, or on a parallel loop's concurrency gate).

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Serialize, Serializer};
use tracing::{debug, info, trace};

use crate::error::{EvalError, ParseErrors};
use super::{
    ast::{BinOp, Block, Expr, ForStmt, IfStmt, Method, Program, RequestStmt, Stmt, UnaryOp},
    expand::{decode_processed, format_timeout, infer, interpolate, parse_timeout, Resolver},
    parallel::{self, ParallelStats},
    parser,
    value::{Map, Value},
};

/// Timeout attached to descriptors when neither the request nor `@timeout`
/// sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Imports may nest at most this deep unless configured otherwise.
pub const DEFAULT_MAX_IMPORT_DEPTH: usize = 32;

// ── Collaborator hooks ────────────────────────────────────────────────────────

/// Executes a descriptor and returns the response mapping used for `$_`.
pub type RequestCallback =
    Arc<dyn Fn(RequestDescriptor) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Re-enters the parser for imported files.
pub type ParseHook = Arc<dyn Fn(&str) -> Result<Program, ParseErrors> + Send + Sync>;

/// Reads imported files and `file` literals.
pub type FileReader = Arc<dyn Fn(&Path) -> io::Result<String> + Send + Sync>;

// ── RequestDescriptor ─────────────────────────────────────────────────────────

/// One synthesized request, the unit handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Value,
    pub headers: Option<Map>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// Mapping form: `{<method>: url, headers?, body?, timeout?}`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.method.as_str().to_owned(), self.url.clone());
        if let Some(headers) = &self.headers {
            map.insert("headers".into(), Value::Map(headers.clone()));
        }
        if let Some(body) = &self.body {
            map.insert("body".into(), body.clone());
        }
        if let Some(timeout) = self.timeout {
            map.insert("timeout".into(), Value::Str(format_timeout(timeout)));
        }
        Value::Map(map)
    }

    /// The URL as text.
    pub fn url_text(&self) -> String {
        self.url.to_string()
    }
}

impl Serialize for RequestDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

// ── Scope ─────────────────────────────────────────────────────────────────────

/// One frame of variable bindings.  Lookup walks outward through parents.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(parent: Arc<Scope>) -> Self {
        Scope {
            vars: HashMap::new(),
            parent: Some(parent),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut frame = self;
        loop {
            if let Some(v) = frame.vars.get(name) {
                return Some(v);
            }
            frame = frame.parent.as_deref()?;
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluation state for one program run.
pub struct Evaluator {
    pub(super) scope: Arc<Scope>,
    prev_response: Option<Value>,
    base_path: PathBuf,
    default_timeout: Option<Duration>,
    callback: Option<RequestCallback>,
    parse_hook: ParseHook,
    file_reader: FileReader,
    import_stack: Vec<PathBuf>,
    max_import_depth: usize,
    pub(super) requests: Vec<RequestDescriptor>,
    pub(super) parallel_stats: Vec<ParallelStats>,
    /// Lines printed by `echo`, in execution order.
    pub output: Vec<String>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            scope: Arc::new(Scope::new()),
            prev_response: None,
            base_path: PathBuf::from("."),
            default_timeout: Some(DEFAULT_TIMEOUT),
            callback: None,
            parse_hook: Arc::new(parser::parse),
            file_reader: Arc::new(|path: &Path| std::fs::read_to_string(path)),
            import_stack: Vec::new(),
            max_import_depth: DEFAULT_MAX_IMPORT_DEPTH,
            requests: Vec::new(),
            parallel_stats: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Directory that relative imports and `file` literals resolve against.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = path.into();
        self
    }

    /// `None` leaves descriptors without a timeout unless one is set.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_import_depth(mut self, depth: usize) -> Self {
        self.max_import_depth = depth;
        self
    }

    /// Execute each request as it is synthesized.
    pub fn with_request_callback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let callback: RequestCallback = Arc::new(move |req: RequestDescriptor| f(req).boxed());
        self.callback = Some(callback);
        self
    }

    pub fn with_parse_hook(mut self, hook: ParseHook) -> Self {
        self.parse_hook = hook;
        self
    }

    pub fn with_file_reader(mut self, reader: FileReader) -> Self {
        self.file_reader = reader;
        self
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.scope).set(name, value);
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.scope.get(name)
    }

    /// Descriptors collected so far, including those of a run that failed.
    pub fn requests(&self) -> &[RequestDescriptor] {
        &self.requests
    }

    /// One entry per parallel loop, in the order the loops were reached.
    pub fn parallel_stats(&self) -> &[ParallelStats] {
        &self.parallel_stats
    }

    pub fn prev_response(&self) -> Option<&Value> {
        self.prev_response.as_ref()
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Parse `src` with the configured hook and evaluate it.
    pub async fn eval_source(&mut self, src: &str) -> Result<Vec<RequestDescriptor>, EvalError> {
        let program = (self.parse_hook)(src)?;
        self.eval(&program).await
    }

    /// Run a whole program and return the synthesized descriptors.
    ///
    /// On error the descriptors collected before the failure stay
    /// available through [`requests`](Self::requests).
    pub async fn eval(&mut self, program: &Program) -> Result<Vec<RequestDescriptor>, EvalError> {
        self.requests.clear();
        self.parallel_stats.clear();
        self.output.clear();
        self.exec_block(&program.statements).await?;
        Ok(self.requests.clone())
    }

    /// Copy of this evaluator for one parallel task: same collaborators,
    /// previous-response snapshot and timeout, but its own scope and
    /// empty accumulators.
    pub(super) fn fork(&self, scope: Scope) -> Evaluator {
        Evaluator {
            scope: Arc::new(scope),
            prev_response: self.prev_response.clone(),
            base_path: self.base_path.clone(),
            default_timeout: self.default_timeout,
            callback: self.callback.clone(),
            parse_hook: Arc::clone(&self.parse_hook),
            file_reader: Arc::clone(&self.file_reader),
            import_stack: self.import_stack.clone(),
            max_import_depth: self.max_import_depth,
            requests: Vec::new(),
            parallel_stats: Vec::new(),
            output: Vec::new(),
        }
    }

    // ── Statements ────────────────────────────────────────────────────────

    pub(super) async fn exec_block(&mut self, stmts: &[Stmt]) -> Result<(), EvalError> {
        for stmt in stmts {
            self.exec_stmt(stmt).await?;
        }
        Ok(())
    }

    // Boxed: loops and imports recurse back into `exec_block`.
    fn exec_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, Result<(), EvalError>> {
        Box::pin(async move {
            match stmt {
                Stmt::Import { path, .. } => self.exec_import(path).await,
                Stmt::VarDef { name, value, .. } => self.exec_var_def(name, value.as_ref()),
                Stmt::Request(req) => self.exec_request(req).await,
                Stmt::For(f) => self.exec_for(f).await,
                Stmt::If(i) => self.exec_if(i).await,
                Stmt::Echo { value, .. } => {
                    self.exec_echo(value.as_ref());
                    Ok(())
                }
                Stmt::Separator { pos } => {
                    trace!(line = pos.line, "separator");
                    Ok(())
                }
            }
        })
    }

    fn exec_var_def(&mut self, name: &str, value: Option<&Expr>) -> Result<(), EvalError> {
        let value = value.map_or(Value::Null, |e| self.eval_expr(e));
        if name == "timeout" {
            self.default_timeout = Some(parse_timeout(&value)?);
        }
        self.set_var(name, value);
        Ok(())
    }

    fn exec_echo(&mut self, value: Option<&Expr>) {
        let text = value.map(|e| self.eval_expr(e).to_string()).unwrap_or_default();
        info!(target: "haiku::echo", "{text}");
        self.output.push(text);
    }

    async fn exec_request(&mut self, req: &RequestStmt) -> Result<(), EvalError> {
        let descriptor = self.build_request(req)?;
        debug!(method = %descriptor.method, url = %descriptor.url, "request");
        self.requests.push(descriptor.clone());

        match self.callback.clone() {
            Some(callback) => {
                let response = callback(descriptor).await.map_err(EvalError::Transport)?;
                self.prev_response = Some(response);
            }
            None => self.prev_response = Some(descriptor.to_value()),
        }
        Ok(())
    }

    /// Evaluate a request statement into a descriptor without sending it.
    pub fn build_request(&self, req: &RequestStmt) -> Result<RequestDescriptor, EvalError> {
        let timeout = match &req.timeout {
            Some(expr) => Some(parse_timeout(&self.eval_expr(expr))?),
            None => self.default_timeout,
        };
        Ok(RequestDescriptor {
            method: req.method,
            url: self.eval_expr(&req.url),
            headers: req.headers.as_ref().map(|b| self.eval_block_to_map(b)),
            body: req.body.as_ref().map(|e| self.eval_expr(e)),
            timeout,
        })
    }

    async fn exec_if(&mut self, stmt: &IfStmt) -> Result<(), EvalError> {
        // Conditionals share the enclosing scope.
        for branch in &stmt.branches {
            if self.eval_expr(&branch.condition).is_truthy() {
                return self.exec_block(&branch.body).await;
            }
        }
        match &stmt.else_body {
            Some(body) => self.exec_block(body).await,
            None => Ok(()),
        }
    }

    async fn exec_for(&mut self, stmt: &ForStmt) -> Result<(), EvalError> {
        let items = iterable_items(self.eval_expr(&stmt.iterable))?;
        if stmt.parallel {
            return parallel::run(self, stmt, items.collect()).await;
        }

        let parent = Arc::clone(&self.scope);
        self.scope = Arc::new(Scope::child(Arc::clone(&parent)));
        let result = self.run_sequential(stmt, items).await;
        self.scope = parent;
        result
    }

    async fn run_sequential(&mut self, stmt: &ForStmt, items: LoopItems) -> Result<(), EvalError> {
        for (i, item) in items.enumerate() {
            let scope = Arc::make_mut(&mut self.scope);
            scope.set(stmt.item.as_str(), item);
            if let Some(index) = &stmt.index {
                scope.set(index.as_str(), Value::Int(i as i64));
            }
            self.exec_block(&stmt.body).await?;
        }
        Ok(())
    }

    async fn exec_import(&mut self, path: &str) -> Result<(), EvalError> {
        let full = self.resolve_path(path);
        if self.import_stack.contains(&full) {
            return Err(EvalError::ImportCycle(full));
        }
        if self.import_stack.len() >= self.max_import_depth {
            return Err(EvalError::ImportTooDeep(self.max_import_depth));
        }

        debug!(path = %full.display(), "import");
        let text = (self.file_reader)(&full).map_err(|source| EvalError::Import {
            path: full.clone(),
            source,
        })?;
        let program = (self.parse_hook)(&text).map_err(|source| EvalError::ImportParse {
            path: full.clone(),
            source,
        })?;

        let dir = full.parent().map(Path::to_path_buf).unwrap_or_default();
        let saved_base = std::mem::replace(&mut self.base_path, dir);
        self.import_stack.push(full.clone());
        let result = self.exec_block(&program.statements).await;
        self.import_stack.pop();
        self.base_path = saved_base;

        result.map_err(|e| match e {
            // Keep only the innermost file in nested import errors.
            EvalError::InImport { .. } | EvalError::ImportCycle(_) | EvalError::ImportTooDeep(_) => e,
            other => EvalError::InImport {
                path: full,
                source: Box::new(other),
            },
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let joined = self.base_path.join(path);
        joined
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }

    // ── Expressions ───────────────────────────────────────────────────────

    /// Evaluate an expression.  Unresolvable references become null.
    pub fn eval_expr(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Str { value, quoted: true } => Value::Str(interpolate(value, self)),
            Expr::Str { value, quoted: false } => infer(value),
            Expr::Int(n) => Value::Int(*n),
            Expr::Float(x) => Value::Float(*x),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null => Value::Null,
            Expr::EmptyArray => Value::List(Vec::new()),
            Expr::EmptyObject => Value::Map(Map::new()),
            Expr::VarRef(r) => {
                let path: Vec<&str> = r.path.iter().map(String::as_str).collect();
                self.resolve(&r.name, &path).unwrap_or_default()
            }
            Expr::Processed { processor, content } => {
                decode_processed(processor, content, |p| {
                    (self.file_reader)(&self.resolve_path(p)).ok()
                })
            }
            Expr::Block(block) => self.eval_block(block),
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => Value::Bool(!self.eval_expr(operand).is_truthy()),
        }
    }

    fn eval_binary(&self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Value {
        use std::cmp::Ordering::*;

        let l = self.eval_expr(lhs);
        match op {
            BinOp::And => return Value::Bool(l.is_truthy() && self.eval_expr(rhs).is_truthy()),
            BinOp::Or => return Value::Bool(l.is_truthy() || self.eval_expr(rhs).is_truthy()),
            _ => {}
        }
        let r = self.eval_expr(rhs);
        let ord = l.cmp_value(&r);
        match op {
            BinOp::Concat => Value::Str(format!("{l}{r}")),
            BinOp::Eq => Value::Bool(l.loose_eq(&r)),
            BinOp::Ne => Value::Bool(!l.loose_eq(&r)),
            BinOp::Lt => Value::Bool(ord == Less),
            BinOp::Le => Value::Bool(ord != Greater),
            BinOp::Gt => Value::Bool(ord == Greater),
            BinOp::Ge => Value::Bool(ord != Less),
            BinOp::And | BinOp::Or => Value::Null,
        }
    }

    fn eval_block(&self, block: &Block) -> Value {
        if block.is_array() {
            Value::List(block.entries.iter().map(|e| self.eval_expr(&e.value)).collect())
        } else {
            Value::Map(self.eval_block_to_map(block))
        }
    }

    /// Keyed entries only; unkeyed ones are dropped.
    fn eval_block_to_map(&self, block: &Block) -> Map {
        block
            .entries
            .iter()
            .filter_map(|e| {
                let key = e.key.as_deref().filter(|k| !k.is_empty())?;
                Some((key.to_owned(), self.eval_expr(&e.value)))
            })
            .collect()
    }
}

impl Resolver for Evaluator {
    fn resolve(&self, name: &str, path: &[&str]) -> Option<Value> {
        match (name, path) {
            ("_", _) => self.prev_response.as_ref()?.lookup_path(path).cloned(),
            ("env", [var, ..]) => Some(Value::Str(std::env::var(var).unwrap_or_default())),
            _ => self.scope.get(name)?.lookup_path(path).cloned(),
        }
    }
}

// ── Iteration ─────────────────────────────────────────────────────────────────

/// Items a loop walks: list elements, mapping values, or `0..n` for a
/// non-negative whole number.  Counts are produced lazily.
#[derive(Debug)]
pub enum LoopItems {
    Values(std::vec::IntoIter<Value>),
    Count(std::ops::Range<i64>),
}

impl Iterator for LoopItems {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            LoopItems::Values(it) => it.next(),
            LoopItems::Count(range) => range.next().map(Value::Int),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            LoopItems::Values(it) => it.size_hint(),
            LoopItems::Count(range) => range.size_hint(),
        }
    }
}

pub fn iterable_items(value: Value) -> Result<LoopItems, EvalError> {
    match value {
        Value::List(items) => Ok(LoopItems::Values(items.into_iter())),
        Value::Map(map) => Ok(LoopItems::Values(map.into_values().collect::<Vec<_>>().into_iter())),
        Value::Int(n) if n < 0 => Err(EvalError::InvalidIterable(format!("negative count {n}"))),
        Value::Int(n) => Ok(LoopItems::Count(0..n)),
        Value::Float(x) if x >= 0.0 && x.fract() == 0.0 && x <= i64::MAX as f64 => {
            Ok(LoopItems::Count(0..x as i64))
        }
        Value::Float(x) => Err(EvalError::InvalidIterable(format!("non-integer count {x}"))),
        other => Err(EvalError::InvalidIterable(other.type_name().to_owned())),
    }
}
