//! Flat shader-graph data structure: nodes, edges and discovered inputs.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use crate::strategy::Strategy;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Unique node identifier, issued by an [IdGenerator].
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, Default)]
/// Explicit id source, passed into graph-construction code so no hidden
/// global counter survives across invocations.
pub struct IdGenerator {
    next: u32,
}

impl IdGenerator {
    /// Fresh generator starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next id.
    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Shader stage. Stages compile independently; vertex/fragment sibling pairs
/// cross-reference through a shared mangling suffix.
pub enum Stage {
    #[allow(missing_docs)]
    Vertex,
    #[allow(missing_docs)]
    Fragment,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// What kind of value an input expects.
pub enum InputCategory {
    /// Generated shader code spliced into an expression site.
    Code,
    /// Plain data realized outside the compiler as an inline literal.
    Data,
    /// Node property (uniforms, named attributes).
    Property,
    /// Internal splice point (texture calls, hidden main-statement input).
    Filler,
}

#[derive(Clone, Debug, PartialEq)]
/// Discovered input slot on a node.
pub struct Input {
    /// Stable id, unique within the node.
    pub id: String,
    /// Display name, after the node's remap table.
    pub name: String,
    #[allow(missing_docs)]
    pub category: InputCategory,
    /// When set, a wired edge is informational only; the value arrives some
    /// other way and the filler must not run.
    pub baked: bool,
}

impl Input {
    /// New unbaked input with identical id and display name.
    pub fn new(id: &str, category: InputCategory) -> Self {
        Self {
            id: id.to_owned(),
            name: id.to_owned(),
            category,
            baked: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Static output slot on a node.
pub struct OutputSlot {
    #[allow(missing_docs)]
    pub name: String,
}

impl OutputSlot {
    #[allow(missing_docs)]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// How a node's source text is parsed.
pub enum ParseMode {
    /// Full translation unit.
    #[default]
    Program,
    /// Single bare expression.
    Expression,
}

#[derive(Clone, Debug)]
/// Static per-node compile configuration.
pub struct NodeConfig {
    #[allow(missing_docs)]
    pub parse_mode: ParseMode,
    /// Declared GLSL version of the source text.
    pub version: u32,
    /// Run the macro/conditional preprocessing pass before parsing.
    pub preprocess: bool,
    /// Strategies run in declared order; duplicate input ids are suppressed,
    /// first occurrence wins.
    pub strategies: Vec<Strategy>,
    /// Input display-name remapping, keyed by input id.
    pub input_remap: HashMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            parse_mode: ParseMode::Program,
            version: 300,
            preprocess: true,
            strategies: Vec::new(),
            input_remap: HashMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Arithmetic combinator operator.
pub enum BinaryOperator {
    #[allow(missing_docs)]
    Add,
    #[allow(missing_docs)]
    Subtract,
    #[allow(missing_docs)]
    Multiply,
    #[allow(missing_docs)]
    Divide,
}

impl BinaryOperator {
    /// The GLSL operator token.
    pub fn token(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Typed literal carried by a data node.
pub enum DataValue {
    #[allow(missing_docs)]
    Float(f32),
    #[allow(missing_docs)]
    Vec2([f32; 2]),
    #[allow(missing_docs)]
    Vec3([f32; 3]),
    #[allow(missing_docs)]
    Vec4([f32; 4]),
}

impl DataValue {
    /// Render the inline GLSL constructor call for this literal.
    pub fn render(&self) -> String {
        fn join(values: &[f32]) -> String {
            values
                .iter()
                .map(|v| format!("{v:?}"))
                .collect::<Vec<_>>()
                .join(", ")
        }

        match self {
            DataValue::Float(v) => format!("{v:?}"),
            DataValue::Vec2(v) => format!("vec2({})", join(v)),
            DataValue::Vec3(v) => format!("vec3({})", join(v)),
            DataValue::Vec4(v) => format!("vec4({})", join(v)),
        }
    }
}

#[derive(Clone, Debug)]
/// Closed set of node kinds.
pub enum NodeKind {
    /// Hand-authored or engine-supplied GLSL program.
    Source {
        #[allow(missing_docs)]
        source: String,
        /// Engine-managed node type tag; set when an engine hook refreshes
        /// the source text before compilation.
        engine_type: Option<String>,
    },
    /// Designated per-stage output node.
    Output {
        #[allow(missing_docs)]
        source: String,
    },
    /// Arithmetic combinator over lettered expression parameters.
    Binary {
        #[allow(missing_docs)]
        operator: BinaryOperator,
    },
    /// Constant value realized as an inline literal.
    Data(DataValue),
}

#[derive(Clone, Debug)]
/// A unit of shader- or value-producing logic in the graph.
pub struct Node {
    #[allow(missing_docs)]
    pub id: NodeId,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub kind: NodeKind,
    /// `None` means bi-stage: the stage is resolved from usage.
    pub stage: Option<Stage>,
    /// Next-stage counterpart id: a vertex node points at its fragment
    /// sibling so the pair mangles to the same suffix.
    pub sibling: Option<NodeId>,
    #[allow(missing_docs)]
    pub config: NodeConfig,
    /// Discovered inputs, merged by id across recompiles so toggled
    /// metadata persists.
    pub inputs: Vec<Input>,
    #[allow(missing_docs)]
    pub outputs: Vec<OutputSlot>,
}

impl Node {
    /// Node name reduced to identifier-safe characters, used to rename
    /// `main` into a uniquely callable entry point.
    pub fn sanitized_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    /// Suffix key for mangling: the next-stage sibling's id when present,
    /// otherwise this node's own id.
    pub fn mangle_key(&self) -> NodeId {
        self.sibling.unwrap_or(self.id)
    }

    /// Whether the node's source parses to a bare expression.
    pub fn is_expression(&self) -> bool {
        matches!(self.kind, NodeKind::Binary { .. })
            || self.config.parse_mode == ParseMode::Expression
    }

    /// Whether this node produces a full shader program (as opposed to a
    /// pure expression, a constant or the terminal output).
    pub fn produces_shader(&self) -> bool {
        matches!(self.kind, NodeKind::Source { .. }) && !self.is_expression()
    }

    /// Merge freshly discovered inputs into the persisted list by id,
    /// preserving the `baked` flag of entries that survive.
    pub fn merge_inputs(&mut self, found: Vec<Input>) {
        let previous: HashMap<String, bool> = self
            .inputs
            .iter()
            .map(|input| (input.id.clone(), input.baked))
            .collect();

        self.inputs = found
            .into_iter()
            .map(|mut input| {
                if let Some(&baked) = previous.get(&input.id) {
                    input.baked = baked;
                }
                input
            })
            .collect();
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Directed wire from one node's output slot to another node's input slot.
pub struct Edge {
    #[allow(missing_docs)]
    pub from: NodeId,
    #[allow(missing_docs)]
    pub to: NodeId,
    /// Source output slot name.
    pub output: String,
    /// Target input slot id.
    pub input: String,
    /// Restrict the edge to one stage's compile walk.
    pub stage: Option<Stage>,
}

impl Edge {
    /// Edge between default slots, unrestricted by stage.
    pub fn new(from: NodeId, to: NodeId, input: &str) -> Self {
        Self {
            from,
            to,
            output: "out".to_owned(),
            input: input.to_owned(),
            stage: None,
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
/// [Graph] lookup errors.
pub enum Error {
    #[error("No node with id {0} in graph")]
    /// Edge or query referencing a node id that is not in the graph.
    MissingNode(NodeId),

    #[error("No {0} output node in graph")]
    /// Every compiled stage needs exactly one designated output node.
    MissingOutputNode(Stage),
}

#[derive(Clone, Debug, Default)]
/// Node-and-edge container, acyclic by construction of the caller.
pub struct Graph {
    #[allow(missing_docs)]
    pub nodes: Vec<Node>,
    #[allow(missing_docs)]
    pub edges: Vec<Edge>,
}

impl Graph {
    #[allow(missing_docs)]
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Result<&Node, Error> {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .ok_or(Error::MissingNode(id))
    }

    /// Look up a node by id, mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, Error> {
        self.nodes
            .iter_mut()
            .find(|node| node.id == id)
            .ok_or(Error::MissingNode(id))
    }

    /// The designated output node for a stage.
    pub fn output_node(&self, stage: Stage) -> Result<&Node, Error> {
        self.nodes
            .iter()
            .find(|node| matches!(node.kind, NodeKind::Output { .. }) && node.stage == Some(stage))
            .ok_or(Error::MissingOutputNode(stage))
    }

    /// Inbound edges of a node relevant to a stage, in insertion order.
    pub fn inbound(&self, id: NodeId, stage: Stage) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|edge| edge.to == id && edge.stage.map_or(true, |s| s == stage))
            .collect()
    }

    /// Outbound edges of a node, in insertion order.
    pub fn outbound(&self, id: NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|edge| edge.from == id).collect()
    }

    /// Inbound edges deduplicated per input slot. Fan-in on one slot is
    /// unspecified; the last wired edge wins and the loser is dropped with
    /// a warning.
    pub fn inbound_deduped(&self, id: NodeId, stage: Stage) -> Vec<&Edge> {
        let mut per_input: Vec<&Edge> = Vec::new();

        for edge in self.inbound(id, stage) {
            if let Some(slot) = per_input.iter_mut().find(|prev| prev.input == edge.input) {
                log::warn!(
                    "multiple edges target input `{}` of node {}; keeping the later edge from node {}",
                    edge.input,
                    id,
                    edge.from
                );
                *slot = edge;
            } else {
                per_input.push(edge);
            }
        }

        per_input
    }
}
