//! A small state graph: named nodes that each take the whole state and
//! return it updated, joined by direct or conditional edges.
//!
//! Execution is strictly sequential. Each node has exactly one outgoing
//! edge; a conditional edge picks its target from the state at run time.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::error::{AgentError, Result};
use crate::state::GraphState;

pub const START: &str = "__start__";
pub const END: &str = "__end__";

/// LangGraph's default step budget for a single invocation.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    async fn run(&self, state: S) -> Result<S>;
}

/// Adapter that turns an async closure into a [`Node`].
pub struct FnNode<F, S> {
    f: F,
    _state: PhantomData<fn(S) -> S>,
}

pub fn node_fn<S, F, Fut>(f: F) -> FnNode<F, S>
where
    S: GraphState,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S>> + Send + 'static,
{
    FnNode {
        f,
        _state: PhantomData,
    }
}

#[async_trait]
impl<S, F, Fut> Node<S> for FnNode<F, S>
where
    S: GraphState,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S>> + Send + 'static,
{
    async fn run(&self, state: S) -> Result<S> {
        (self.f)(state).await
    }
}

type Router<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

enum Edge<S> {
    Direct(String),
    Conditional { router: Router<S>, targets: Vec<String> },
}

impl<S> Clone for Edge<S> {
    fn clone(&self) -> Self {
        match self {
            Edge::Direct(to) => Edge::Direct(to.clone()),
            Edge::Conditional { router, targets } => Edge::Conditional {
                router: Arc::clone(router),
                targets: targets.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompilationError {
    #[error("no entry point set")]
    MissingEntryPoint,

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' added twice")]
    DuplicateNode(String),

    #[error("'{0}' is a reserved node name")]
    ReservedName(String),

    #[error("node '{0}' has more than one outgoing edge")]
    BranchingEdges(String),

    #[error("node '{0}' has no outgoing edge")]
    NoOutgoingEdge(String),
}

/// Builder for a [`CompiledGraph`].
pub struct StateGraph<S: GraphState> {
    nodes: Vec<(String, Arc<dyn Node<S>>)>,
    edges: Vec<(String, Edge<S>)>,
    entry: Option<String>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    recursion_limit: usize,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
            checkpointer: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> &mut Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry = Some(name.into());
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), Edge::Direct(to.into())));
        self
    }

    /// Route from `from` to whichever of `targets` the router names.
    pub fn add_conditional_edges<R>(
        &mut self,
        from: impl Into<String>,
        router: R,
        targets: &[&str],
    ) -> &mut Self
    where
        R: Fn(&S) -> String + Send + Sync + 'static,
    {
        self.edges.push((
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                targets: targets.iter().map(|t| t.to_string()).collect(),
            },
        ));
        self
    }

    pub fn with_checkpointer(&mut self, checkpointer: Arc<dyn Checkpointer>) -> &mut Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_recursion_limit(&mut self, limit: usize) -> &mut Self {
        self.recursion_limit = limit;
        self
    }

    pub fn compile(&self) -> std::result::Result<CompiledGraph<S>, CompilationError> {
        let mut nodes = BTreeMap::new();
        let mut order = Vec::new();
        for (name, node) in &self.nodes {
            if name == START || name == END {
                return Err(CompilationError::ReservedName(name.clone()));
            }
            if nodes.insert(name.clone(), Arc::clone(node)).is_some() {
                return Err(CompilationError::DuplicateNode(name.clone()));
            }
            order.push(name.clone());
        }

        let entry = self.entry.clone().ok_or(CompilationError::MissingEntryPoint)?;
        if !nodes.contains_key(&entry) {
            return Err(CompilationError::UnknownNode(entry));
        }

        let known = |name: &str| name == END || nodes.contains_key(name);
        let mut edges = BTreeMap::new();
        for (from, edge) in &self.edges {
            if !nodes.contains_key(from) {
                return Err(CompilationError::UnknownNode(from.clone()));
            }
            let targets: Vec<&String> = match edge {
                Edge::Direct(to) => vec![to],
                Edge::Conditional { targets, .. } => targets.iter().collect(),
            };
            if let Some(bad) = targets.into_iter().find(|t| !known(t.as_str())) {
                return Err(CompilationError::UnknownNode(bad.clone()));
            }
            if edges.insert(from.clone(), edge.clone()).is_some() {
                return Err(CompilationError::BranchingEdges(from.clone()));
            }
        }

        if let Some(dead_end) = order.iter().find(|n| !edges.contains_key(*n)) {
            return Err(CompilationError::NoOutgoingEdge(dead_end.clone()));
        }

        Ok(CompiledGraph {
            nodes,
            edges,
            order,
            entry,
            checkpointer: self.checkpointer.clone(),
            recursion_limit: self.recursion_limit,
        })
    }
}

/// Per-invocation settings.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Checkpoints are only written when both this and a checkpointer are set.
    pub thread_id: Option<String>,
}

impl RunConfig {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
        }
    }
}

pub struct CompiledGraph<S: GraphState> {
    nodes: BTreeMap<String, Arc<dyn Node<S>>>,
    edges: BTreeMap<String, Edge<S>>,
    order: Vec<String>,
    entry: String,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    recursion_limit: usize,
}

impl<S: GraphState> CompiledGraph<S> {
    /// Run from the entry point until END.
    pub async fn invoke(&self, state: S, config: &RunConfig) -> Result<S> {
        let first_step = match self.saver_for(config) {
            Some((saver, thread)) => saver
                .latest(thread)
                .await?
                .map(|c| c.step + 1)
                .unwrap_or(0),
            None => 0,
        };
        self.run_from(self.entry.clone(), state, first_step, config)
            .await
    }

    /// Continue a thread from its latest checkpoint. Returns `None` when the
    /// thread has no checkpoints.
    pub async fn resume(&self, config: &RunConfig) -> Result<Option<S>> {
        let Some((saver, thread)) = self.saver_for(config) else {
            return Err(AgentError::Graph(
                "resume requires a checkpointer and a thread_id".to_string(),
            ));
        };
        let Some(latest) = saver.latest(thread).await? else {
            return Ok(None);
        };
        let state: S = latest.state_as()?;
        if latest.next == END {
            return Ok(Some(state));
        }
        if !self.nodes.contains_key(&latest.next) {
            return Err(AgentError::Graph(format!(
                "checkpoint refers to unknown node '{}'",
                latest.next
            )));
        }
        tracing::info!(thread_id = thread, next = %latest.next, step = latest.step, "Resuming thread");
        self.run_from(latest.next.clone(), state, latest.step + 1, config)
            .await
            .map(Some)
    }

    fn saver_for<'a>(&'a self, config: &'a RunConfig) -> Option<(&'a Arc<dyn Checkpointer>, &'a str)> {
        match (&self.checkpointer, &config.thread_id) {
            (Some(saver), Some(thread)) => Some((saver, thread.as_str())),
            _ => None,
        }
    }

    async fn run_from(&self, start: String, mut state: S, first_step: u64, config: &RunConfig) -> Result<S> {
        let mut current = start;
        let mut step = first_step;
        let mut executed = 0usize;

        while current != END {
            if executed >= self.recursion_limit {
                return Err(AgentError::RecursionLimit(self.recursion_limit));
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| AgentError::Graph(format!("unknown node '{}'", current)))?;

            tracing::debug!(node = %current, step, "Running node");
            state = node.run(state).await?;
            executed += 1;

            let next = self.next_after(&current, &state)?;

            if let Some((saver, thread)) = self.saver_for(config) {
                saver
                    .put(&Checkpoint {
                        thread_id: thread.to_string(),
                        step,
                        node: current.clone(),
                        next: next.clone(),
                        state: serde_json::to_value(&state)?,
                        created_at: Utc::now(),
                    })
                    .await?;
            }

            step += 1;
            current = next;
        }

        Ok(state)
    }

    fn next_after(&self, node: &str, state: &S) -> Result<String> {
        match self.edges.get(node) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional { router, targets }) => {
                let to = router(state);
                if targets.iter().any(|t| *t == to) {
                    Ok(to)
                } else {
                    Err(AgentError::Graph(format!(
                        "router for '{}' returned '{}', expected one of {:?}",
                        node, to, targets
                    )))
                }
            }
            None => Err(AgentError::Graph(format!("node '{}' has no outgoing edge", node))),
        }
    }

    /// Mermaid flowchart of the graph, in node insertion order.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD;\n");
        out.push_str(&format!("\t{}([<p>{}</p>]):::first\n", START, START));
        for name in &self.order {
            out.push_str(&format!("\t{}({})\n", name, name));
        }
        out.push_str(&format!("\t{}([<p>{}</p>]):::last\n", END, END));

        out.push_str(&format!("\t{} --> {};\n", START, self.entry));
        let mut seen = HashSet::new();
        for name in &self.order {
            match self.edges.get(name) {
                Some(Edge::Direct(to)) => out.push_str(&format!("\t{} --> {};\n", name, to)),
                Some(Edge::Conditional { targets, .. }) => {
                    for to in targets {
                        if seen.insert((name.clone(), to.clone())) {
                            out.push_str(&format!("\t{} -.-> |{}| {};\n", name, to, to));
                        }
                    }
                }
                None => {}
            }
        }
        out.push_str("\tclassDef default fill:#f2f0ff,line-height:1.2\n");
        out.push_str("\tclassDef first fill-opacity:0\n");
        out.push_str("\tclassDef last fill:#bfb6fc\n");
        out
    }
}
