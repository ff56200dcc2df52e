//! Engine adapter contract: what a runtime integration supplies so its
//! managed node types, reserved identifiers and assembly preferences are
//! honored during compilation.

use std::collections::{HashMap, HashSet};

use dyn_clone::DynClone;

use crate::{
    glsl::ShaderAst,
    graph::{Graph, Node, NodeId, NodeKind, Stage},
    sections::MergeOptions,
};

/// Produces the current source text of an engine-managed node right before
/// compilation. The next-stage sibling is passed along since engines often
/// derive both stages from one material description.
pub trait OnBeforeCompile: DynClone {
    #[allow(missing_docs)]
    fn source(&self, node: &Node, sibling: Option<&Node>) -> anyhow::Result<String>;
}

dyn_clone::clone_trait_object!(OnBeforeCompile);

/// Engine-specific tree rewrite, run right after parsing and before any
/// conversion or mangling.
pub trait ManipulateAst: DynClone {
    #[allow(missing_docs)]
    fn manipulate(&self, node: &Node, ast: &mut ShaderAst) -> anyhow::Result<()>;
}

dyn_clone::clone_trait_object!(ManipulateAst);

/// Hook pair for one engine-managed node type.
#[derive(Clone, Default)]
pub struct NodeHooks {
    #[allow(missing_docs)]
    pub on_before_compile: Option<Box<dyn OnBeforeCompile>>,
    #[allow(missing_docs)]
    pub manipulate_ast: Option<Box<dyn ManipulateAst>>,
}

/// One runtime integration.
#[derive(Clone, Default)]
pub struct Engine {
    #[allow(missing_docs)]
    pub name: String,
    /// Identifiers the mangler must leave untouched (engine-provided
    /// uniforms, attributes and varyings).
    pub preserve: HashSet<String>,
    /// Hooks keyed by the node's engine type tag.
    pub hooks: HashMap<String, NodeHooks>,
    #[allow(missing_docs)]
    pub merge_options: MergeOptions,
}

impl Engine {
    /// Engine with a reserved-identifier list and no hooks.
    pub fn with_preserved(name: &str, preserved: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            preserve: preserved.iter().map(|s| (*s).to_owned()).collect(),
            hooks: HashMap::new(),
            merge_options: MergeOptions::default(),
        }
    }

    /// The hook pair for a node, when the node carries an engine type tag
    /// this engine knows.
    pub fn hooks_for(&self, node: &Node) -> Option<&NodeHooks> {
        match &node.kind {
            NodeKind::Source {
                engine_type: Some(tag),
                ..
            } => self.hooks.get(tag),
            _ => None,
        }
    }
}

/// Structural cache key: the node plus a sorted fingerprint of its inbound
/// wiring. Two compiles of an unchanged subgraph hit the same entry no
/// matter what order the edges were inserted in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    #[allow(missing_docs)]
    pub node: NodeId,
    /// `(source node, input id)` per inbound edge, sorted.
    pub edges: Vec<(NodeId, String)>,
}

impl CacheKey {
    /// Key for a node's current wiring in one stage.
    pub fn of(graph: &Graph, node: NodeId, stage: Stage) -> Self {
        let mut edges: Vec<(NodeId, String)> = graph
            .inbound(node, stage)
            .iter()
            .map(|edge| (edge.from, edge.input.clone()))
            .collect();
        edges.sort();

        Self { node, edges }
    }
}

/// Memo of engine-produced source texts, so a mega-shader extraction only
/// reruns when the node's wiring changed.
#[derive(Clone, Debug, Default)]
pub struct TextCache {
    entries: HashMap<CacheKey, String>,
}

impl TextCache {
    #[allow(missing_docs)]
    pub fn get(&self, key: &CacheKey) -> Option<&String> {
        self.entries.get(key)
    }

    #[allow(missing_docs)]
    pub fn insert(&mut self, key: CacheKey, text: String) {
        self.entries.insert(key, text);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::Edge;

    #[test]
    fn cache_key_ignores_edge_insertion_order() {
        let edges_ab = vec![
            Edge::new(NodeId(1), NodeId(0), "a"),
            Edge::new(NodeId(2), NodeId(0), "b"),
        ];
        let edges_ba = vec![
            Edge::new(NodeId(2), NodeId(0), "b"),
            Edge::new(NodeId(1), NodeId(0), "a"),
        ];

        let a = CacheKey::of(&Graph::new(Vec::new(), edges_ab), NodeId(0), Stage::Fragment);
        let b = CacheKey::of(&Graph::new(Vec::new(), edges_ba), NodeId(0), Stage::Fragment);

        assert_eq!(a, b);
    }

    #[test]
    fn rewiring_changes_the_key() {
        let before = CacheKey::of(
            &Graph::new(Vec::new(), vec![Edge::new(NodeId(1), NodeId(0), "a")]),
            NodeId(0),
            Stage::Fragment,
        );
        let after = CacheKey::of(
            &Graph::new(Vec::new(), vec![Edge::new(NodeId(3), NodeId(0), "a")]),
            NodeId(0),
            Stage::Fragment,
        );

        assert_ne!(before, after);
    }

    #[test]
    fn text_cache_round_trips() {
        let mut cache = TextCache::default();
        let key = CacheKey {
            node: NodeId(5),
            edges: Vec::new(),
        };

        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), "void main() {}".to_owned());
        assert_eq!(cache.get(&key).map(String::as_str), Some("void main() {}"));
    }
}
