//! Recursive graph compiler: walks a stage's dependency tree from its output
//! node, grafting each node's generated code into its consumer and merging
//! declaration sections in dependency order.

use std::collections::{HashMap, HashSet};

use crate::{
    context::{self, build_context, BuildArgs, NodeContext},
    engine::{CacheKey, Engine, TextCache},
    glsl::{Expr, ShaderAst},
    graph::{Edge, Graph, InputCategory, NodeId, NodeKind, Stage},
    mangle,
    sections::ShaderSections,
    strategy::MAIN_STMTS_INPUT,
};

#[derive(Debug, thiserror::Error)]
/// Compile errors. All of these abort the walk; a failed compile yields no
/// partial result.
pub enum Error {
    #[error(transparent)]
    /// Graph integrity failure: dangling edge endpoint or missing stage
    /// output node.
    Graph(#[from] crate::graph::Error),

    #[error("Failed to compile node {id} (`{name}`): {source}")]
    /// A node the walk reached failed context construction or filling.
    Node {
        #[allow(missing_docs)]
        id: NodeId,
        #[allow(missing_docs)]
        name: String,
        #[allow(missing_docs)]
        source: context::Error,
    },

    #[error("Node {id} (`{name}`) has no context for the {stage} stage")]
    /// An edge pulled in a node that was excluded from this stage's
    /// context pre-pass.
    MissingContext {
        #[allow(missing_docs)]
        id: NodeId,
        #[allow(missing_docs)]
        name: String,
        #[allow(missing_docs)]
        stage: Stage,
    },
}

/// Rendered source text per stage.
#[derive(Clone, Debug, PartialEq)]
pub struct StagePrograms {
    #[allow(missing_docs)]
    pub vertex: String,
    #[allow(missing_docs)]
    pub fragment: String,
}

/// Compile both stages and render them with the engine's merge options.
pub fn compile(
    graph: &mut Graph,
    engine: &Engine,
    cache: &mut TextCache,
) -> Result<StagePrograms, Error> {
    let vertex = compile_stage(graph, engine, cache, Stage::Vertex)?;
    let fragment = compile_stage(graph, engine, cache, Stage::Fragment)?;

    Ok(StagePrograms {
        vertex: vertex.render(&engine.merge_options),
        fragment: fragment.render(&engine.merge_options),
    })
}

/// Compile one stage of the graph into its merged declaration sections.
///
/// Contexts are rebuilt first for every node the stage output reaches, so
/// each node's discovered inputs refresh even when an unrelated node fails;
/// the walk itself is all-or-nothing and aborts when it reaches a failed
/// node.
pub fn compile_stage(
    graph: &mut Graph,
    engine: &Engine,
    cache: &mut TextCache,
    stage: Stage,
) -> Result<ShaderSections, Error> {
    let output_id = graph.output_node(stage)?.id;

    if stage == Stage::Vertex {
        include_orphan_vertices(graph, output_id);
    }

    // Only nodes the output can reach get a context; anything else in the
    // graph stays untouched, including its engine hooks.
    let relevant = reachable_from(graph, output_id, stage);
    let ids: Vec<NodeId> = graph
        .nodes
        .iter()
        .filter(|node| relevant.contains(&node.id))
        .map(|node| node.id)
        .collect();
    let mut contexts: HashMap<NodeId, NodeContext> = HashMap::new();
    let mut failures: HashMap<NodeId, context::Error> = HashMap::new();

    for id in ids {
        let node = graph.node(id)?;
        if matches!(node.kind, NodeKind::Data(_)) {
            continue;
        }
        if node.stage.is_some_and(|s| s != stage) {
            continue;
        }

        let hooks = engine.hooks_for(node);

        let literal = match &node.kind {
            NodeKind::Source { source, .. } | NodeKind::Output { source } => source.clone(),
            _ => String::new(),
        };
        let source = match hooks.and_then(|hooks| hooks.on_before_compile.as_ref()) {
            Some(hook) => {
                let key = CacheKey::of(graph, id, stage);
                match cache.get(&key) {
                    Some(text) => {
                        log::trace!("source cache hit for node {id}");
                        text.clone()
                    }
                    None => {
                        let sibling = node.sibling.and_then(|sid| graph.node(sid).ok());
                        match hook.source(node, sibling) {
                            Ok(text) => {
                                cache.insert(key, text.clone());
                                text
                            }
                            Err(err) => {
                                failures.insert(id, context::Error::Hook(err));
                                continue;
                            }
                        }
                    }
                }
            }
            None => literal,
        };

        let links_through = links_through_shader(graph, id, stage);
        let arity = graph.inbound_deduped(id, stage).len();
        let args = BuildArgs {
            source,
            stage,
            preserve: &engine.preserve,
            hooks,
            links_through,
            arity,
        };

        let node = graph.node_mut(id)?;
        match build_context(node, args) {
            Ok(context) => {
                contexts.insert(id, context);
            }
            Err(err) => {
                failures.insert(id, err);
            }
        }
    }

    let mut sections = ShaderSections::default();
    let mut done: HashMap<NodeId, Expr> = HashMap::new();
    compile_node(
        graph,
        stage,
        &mut contexts,
        &mut failures,
        &mut done,
        &mut sections,
        output_id,
    )?;

    Ok(sections)
}

/// Compile one node, its dependencies first, and return the expression its
/// consumer splices in. Revisits of an already-compiled node reuse the memo
/// so shared dependencies contribute their sections once.
fn compile_node(
    graph: &Graph,
    stage: Stage,
    contexts: &mut HashMap<NodeId, NodeContext>,
    failures: &mut HashMap<NodeId, context::Error>,
    done: &mut HashMap<NodeId, Expr>,
    sections: &mut ShaderSections,
    id: NodeId,
) -> Result<Expr, Error> {
    if let Some(expr) = done.get(&id) {
        return Ok(expr.clone());
    }

    let node = graph.node(id)?;

    if let NodeKind::Data(value) = &node.kind {
        let expr = Expr::Ident(value.render());
        done.insert(id, expr.clone());
        return Ok(expr);
    }

    if let Some(err) = failures.remove(&id) {
        return Err(Error::Node {
            id,
            name: node.name.clone(),
            source: err,
        });
    }
    if !contexts.contains_key(&id) {
        return Err(Error::MissingContext {
            id,
            name: node.name.clone(),
            stage,
        });
    }

    log::debug!("compiling node {id} (`{}`) for the {stage} stage", node.name);

    for edge in graph.inbound_deduped(id, stage) {
        let skip = contexts
            .get(&id)
            .and_then(|context| context.inputs.iter().find(|input| input.id == edge.input))
            .is_some_and(|input| input.category == InputCategory::Data || input.baked);
        if skip {
            continue;
        }

        let child = compile_node(graph, stage, contexts, failures, done, sections, edge.from)?;

        let Some(context) = contexts.get_mut(&id) else {
            return Err(Error::MissingContext {
                id,
                name: node.name.clone(),
                stage,
            });
        };
        context.fill(&edge.input, &child).map_err(|err| Error::Node {
            id,
            name: node.name.clone(),
            source: err,
        })?;
    }

    // This node's declarations come after everything it depends on.
    if let Some(unit) = contexts.get(&id).and_then(|context| context.ast.program()) {
        sections.merge(ShaderSections::from_unit(unit));
    }

    let expr = match &node.kind {
        // Nothing consumes the terminal node's value.
        NodeKind::Output { .. } => Expr::ident(""),
        NodeKind::Source { .. } if !node.is_expression() => {
            Expr::call(&mangle::mangled_main(node), vec![])
        }
        _ => match contexts.get(&id).map(|context| &context.ast) {
            Some(ShaderAst::Expression(expr)) => expr.clone(),
            _ => Expr::ident(""),
        },
    };

    done.insert(id, expr.clone());
    Ok(expr)
}

/// Whether a node's result flows through some downstream full-shader node
/// before reaching the stage output.
fn links_through_shader(graph: &Graph, id: NodeId, stage: Stage) -> bool {
    let mut queue = vec![id];
    let mut seen: HashSet<NodeId> = HashSet::new();

    while let Some(current) = queue.pop() {
        if !seen.insert(current) {
            continue;
        }
        for edge in graph.outbound(current) {
            if edge.stage.is_some_and(|s| s != stage) {
                continue;
            }
            let Ok(next) = graph.node(edge.to) else {
                continue;
            };
            if next.produces_shader() {
                return true;
            }
            queue.push(next.id);
        }
    }

    false
}

/// Wire every vertex shader node that has an in-graph next-stage sibling but
/// no path to the vertex output into the output's hidden statement input, so
/// its varyings still reach the fragment stage.
fn include_orphan_vertices(graph: &mut Graph, output_id: NodeId) {
    let reached = reachable_from(graph, output_id, Stage::Vertex);
    let orphans: Vec<NodeId> = graph
        .nodes
        .iter()
        .filter(|node| {
            node.stage == Some(Stage::Vertex)
                && node.produces_shader()
                && !reached.contains(&node.id)
                && node
                    .sibling
                    .is_some_and(|sibling| graph.node(sibling).is_ok())
        })
        .map(|node| node.id)
        .collect();

    for id in orphans {
        let wired = graph
            .edges
            .iter()
            .any(|edge| edge.from == id && edge.to == output_id && edge.input == MAIN_STMTS_INPUT);
        if !wired {
            log::debug!("including orphan vertex node {id} through the hidden statement input");
            graph.edges.push(Edge {
                from: id,
                to: output_id,
                output: "out".to_owned(),
                input: MAIN_STMTS_INPUT.to_owned(),
                stage: Some(Stage::Vertex),
            });
        }
    }
}

/// Backward reachability over one stage's edges.
fn reachable_from(graph: &Graph, start: NodeId, stage: Stage) -> HashSet<NodeId> {
    let mut queue = vec![start];
    let mut seen: HashSet<NodeId> = HashSet::new();

    while let Some(current) = queue.pop() {
        if !seen.insert(current) {
            continue;
        }
        for edge in graph.inbound(current, stage) {
            queue.push(edge.from);
        }
    }

    seen
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{BinaryOperator, IdGenerator, Node, Stage};
    use crate::nodelib;
    use crate::sections::MergeOptions;

    const SHADER_A: &str = "out vec4 fragColor;\nvoid main() { fragColor = vec4(2.0); }";
    const SHADER_B: &str = "out vec4 fragColor;\nvoid main() { fragColor = vec4(4.0); }";

    fn add_graph() -> Graph {
        let mut ids = IdGenerator::new();
        let output = nodelib::fragment_output(&mut ids);
        let add = nodelib::binary(&mut ids, BinaryOperator::Add);
        let a = nodelib::source_node(&mut ids, "shaderA", SHADER_A, Stage::Fragment);
        let b = nodelib::source_node(&mut ids, "shaderB", SHADER_B, Stage::Fragment);

        let edges = vec![
            Edge::new(a.id, add.id, "a"),
            Edge::new(b.id, add.id, "b"),
            Edge::new(add.id, output.id, "fragColor"),
        ];
        Graph::new(vec![output, add, a, b], edges)
    }

    fn rendered_fragment(graph: &mut Graph) -> String {
        let engine = Engine::default();
        let mut cache = TextCache::default();
        compile_stage(graph, &engine, &mut cache, Stage::Fragment)
            .unwrap()
            .render(&MergeOptions::default())
    }

    #[test]
    fn addition_graph_sums_both_entry_points() {
        let mut graph = add_graph();
        let text = rendered_fragment(&mut graph);

        assert!(text.contains("fragColor = main_shaderA() + main_shaderB();"));
        assert!(text.contains("vec4 main_shaderA() {"));
        assert!(text.contains("vec4 main_shaderB() {"));
        assert!(text.contains("vec4(2.0)"));
        assert!(text.contains("vec4(4.0)"));
    }

    #[test]
    fn recompilation_is_deterministic() {
        let mut graph = add_graph();
        let first = rendered_fragment(&mut graph);
        let second = rendered_fragment(&mut graph);

        assert_eq!(first, second);
    }

    #[test]
    fn data_nodes_splice_as_literals() {
        let mut ids = IdGenerator::new();
        let output = nodelib::fragment_output(&mut ids);
        let add = nodelib::binary(&mut ids, BinaryOperator::Add);
        let a = nodelib::source_node(&mut ids, "shaderA", SHADER_A, Stage::Fragment);
        let c = nodelib::constant(
            &mut ids,
            "tint",
            crate::graph::DataValue::Vec4([0.5, 0.5, 0.5, 1.0]),
        );

        let edges = vec![
            Edge::new(a.id, add.id, "a"),
            Edge::new(c.id, add.id, "b"),
            Edge::new(add.id, output.id, "fragColor"),
        ];
        let mut graph = Graph::new(vec![output, add, a, c], edges);

        let text = rendered_fragment(&mut graph);
        assert!(text.contains("fragColor = main_shaderA() + vec4(0.5, 0.5, 0.5, 1.0);"));
    }

    #[test]
    fn orphan_vertex_siblings_are_pulled_in() {
        let mut ids = IdGenerator::new();
        let vertex_output = nodelib::vertex_output(&mut ids);
        let fragment: Node =
            nodelib::source_node(&mut ids, "height frag", "void main() {}", Stage::Fragment);
        let mut vertex = nodelib::source_node(
            &mut ids,
            "height vert",
            "out float height;\nvoid main() { height = 1.0; gl_Position = vec4(position, 1.0); }",
            Stage::Vertex,
        );
        vertex.sibling = Some(fragment.id);
        let vertex_id = vertex.id;

        let mut graph = Graph::new(vec![vertex_output, fragment, vertex], Vec::new());

        let engine = Engine::default();
        let mut cache = TextCache::default();
        let text = compile_stage(&mut graph, &engine, &mut cache, Stage::Vertex)
            .unwrap()
            .render(&MergeOptions::default());

        // The orphan's entry point is defined and invoked from main.
        assert!(text.contains("vec4 main_height_vert() {"));
        assert!(text.contains("main_height_vert();"));
        assert!(graph
            .edges
            .iter()
            .any(|edge| edge.from == vertex_id && edge.input == MAIN_STMTS_INPUT));
    }

    #[test]
    fn uniform_inputs_wire_by_their_declared_name() {
        let mut ids = IdGenerator::new();
        let output = nodelib::fragment_output(&mut ids);
        let shader = nodelib::source_node(
            &mut ids,
            "tinted",
            "uniform vec3 tint;\nout vec4 fragColor;\nvoid main() { fragColor = vec4(tint, 1.0); }",
            Stage::Fragment,
        );
        let red = nodelib::constant(
            &mut ids,
            "red",
            crate::graph::DataValue::Vec3([1.0, 0.0, 0.0]),
        );

        let edges = vec![
            Edge::new(red.id, shader.id, "tint"),
            Edge::new(shader.id, output.id, "fragColor"),
        ];
        let mut graph = Graph::new(vec![output, shader, red], edges);

        let text = rendered_fragment(&mut graph);
        // The literal replaced every reference and the declaration is gone.
        assert!(text.contains("vec4(vec3(1.0, 0.0, 0.0), 1.0)"));
        assert!(!text.contains("uniform vec3"));
    }

    #[test]
    fn preserved_identifiers_survive_compilation_unmangled() {
        let mut ids = IdGenerator::new();
        let output = nodelib::fragment_output(&mut ids);
        let shader = nodelib::source_node(
            &mut ids,
            "lit",
            "uniform mat4 projectionMatrix;\nout vec4 fragColor;\nvoid main() { fragColor = projectionMatrix * vec4(1.0); }",
            Stage::Fragment,
        );

        let edges = vec![Edge::new(shader.id, output.id, "fragColor")];
        let mut graph = Graph::new(vec![output, shader], edges);

        let engine = Engine::with_preserved("three", &["projectionMatrix"]);
        let mut cache = TextCache::default();
        let text = compile_stage(&mut graph, &engine, &mut cache, Stage::Fragment)
            .unwrap()
            .render(&MergeOptions::default());

        assert!(text.contains("uniform mat4 projectionMatrix;"));
        assert!(!text.contains("projectionMatrix_"));
    }

    #[derive(Clone)]
    struct CountingSource(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl crate::engine::OnBeforeCompile for CountingSource {
        fn source(&self, _node: &Node, _sibling: Option<&Node>) -> anyhow::Result<String> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("out vec4 fragColor;\nvoid main() { fragColor = vec4(1.0); }".to_owned())
        }
    }

    #[test]
    fn hooks_only_fire_for_reachable_nodes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));

        let mut ids = IdGenerator::new();
        let output = nodelib::fragment_output(&mut ids);
        let mut wired = nodelib::source_node(&mut ids, "wired", "", Stage::Fragment);
        let mut stray = nodelib::source_node(&mut ids, "stray", "", Stage::Fragment);
        for node in [&mut wired, &mut stray] {
            if let NodeKind::Source { engine_type, .. } = &mut node.kind {
                *engine_type = Some("material".to_owned());
            }
        }

        let edges = vec![Edge::new(wired.id, output.id, "fragColor")];
        let mut graph = Graph::new(vec![output, wired, stray], edges);

        let mut engine = Engine::default();
        engine.hooks.insert(
            "material".to_owned(),
            crate::engine::NodeHooks {
                on_before_compile: Some(Box::new(CountingSource(Arc::clone(&calls)))),
                manipulate_ast: None,
            },
        );

        let mut cache = TextCache::default();
        compile_stage(&mut graph, &engine, &mut cache, Stage::Fragment).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_output_node_is_fatal() {
        let mut graph = Graph::default();
        let engine = Engine::default();
        let mut cache = TextCache::default();

        assert!(matches!(
            compile_stage(&mut graph, &engine, &mut cache, Stage::Fragment),
            Err(Error::Graph(crate::graph::Error::MissingOutputNode(
                Stage::Fragment
            )))
        ));
    }

    #[test]
    fn parse_failures_name_the_node() {
        let mut ids = IdGenerator::new();
        let output = nodelib::fragment_output(&mut ids);
        let broken = nodelib::source_node(&mut ids, "broken", "void main( {", Stage::Fragment);
        let broken_id = broken.id;

        let edges = vec![Edge::new(broken_id, output.id, "fragColor")];
        let mut graph = Graph::new(vec![output, broken], edges);

        let engine = Engine::default();
        let mut cache = TextCache::default();
        match compile_stage(&mut graph, &engine, &mut cache, Stage::Fragment) {
            Err(Error::Node { id, name, .. }) => {
                assert_eq!(id, broken_id);
                assert_eq!(name, "broken");
            }
            other => panic!("expected a node error, got {other:?}"),
        }
    }
}
