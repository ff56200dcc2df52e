//! Prebuilt nodes: stage outputs, source-code nodes, arithmetic combinators
//! and inline constants.

use crate::{
    graph::{
        BinaryOperator, DataValue, IdGenerator, Node, NodeConfig, NodeId, NodeKind, OutputSlot,
        Stage,
    },
    strategy::Strategy,
};

const FRAGMENT_OUTPUT_SOURCE: &str = "\
precision highp float;
out vec4 fragColor;
void main() {
    fragColor = vec4(0.0);
}
";

const VERTEX_OUTPUT_SOURCE: &str = "\
void main() {
    gl_Position = vec4(0.0);
}
";

/// Terminal fragment node; upstream code grafts into the `fragColor`
/// assignment.
pub fn fragment_output(ids: &mut IdGenerator) -> Node {
    output_node(
        ids.next_id(),
        "Fragment Output",
        Stage::Fragment,
        FRAGMENT_OUTPUT_SOURCE,
        "fragColor",
    )
}

/// Terminal vertex node; upstream code grafts into the `gl_Position`
/// assignment.
pub fn vertex_output(ids: &mut IdGenerator) -> Node {
    output_node(
        ids.next_id(),
        "Vertex Output",
        Stage::Vertex,
        VERTEX_OUTPUT_SOURCE,
        "gl_Position",
    )
}

fn output_node(id: NodeId, name: &str, stage: Stage, source: &str, target: &str) -> Node {
    Node {
        id,
        name: name.to_owned(),
        kind: NodeKind::Output {
            source: source.to_owned(),
        },
        stage: Some(stage),
        sibling: None,
        config: NodeConfig {
            strategies: vec![Strategy::AssignmentTo {
                target: target.to_owned(),
            }],
            ..NodeConfig::default()
        },
        inputs: Vec::new(),
        outputs: Vec::new(),
    }
}

/// Hand-authored GLSL program node with the default input discovery
/// (uniforms, then texture calls).
pub fn source_node(ids: &mut IdGenerator, name: &str, source: &str, stage: Stage) -> Node {
    Node {
        id: ids.next_id(),
        name: name.to_owned(),
        kind: NodeKind::Source {
            source: source.to_owned(),
            engine_type: None,
        },
        stage: Some(stage),
        sibling: None,
        config: NodeConfig {
            strategies: vec![Strategy::Uniform, Strategy::Texture2D],
            ..NodeConfig::default()
        },
        inputs: Vec::new(),
        outputs: vec![OutputSlot::new("out")],
    }
}

/// Bi-stage arithmetic combinator over lettered inputs.
pub fn binary(ids: &mut IdGenerator, operator: BinaryOperator) -> Node {
    let name = match operator {
        BinaryOperator::Add => "Add",
        BinaryOperator::Subtract => "Subtract",
        BinaryOperator::Multiply => "Multiply",
        BinaryOperator::Divide => "Divide",
    };

    Node {
        id: ids.next_id(),
        name: name.to_owned(),
        kind: NodeKind::Binary { operator },
        stage: None,
        sibling: None,
        config: NodeConfig::default(),
        inputs: Vec::new(),
        outputs: vec![OutputSlot::new("out")],
    }
}

/// Constant node realized as an inline literal at its use sites.
pub fn constant(ids: &mut IdGenerator, name: &str, value: DataValue) -> Node {
    Node {
        id: ids.next_id(),
        name: name.to_owned(),
        kind: NodeKind::Data(value),
        stage: None,
        sibling: None,
        config: NodeConfig::default(),
        inputs: Vec::new(),
        outputs: vec![OutputSlot::new("out")],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constructors_draw_from_one_id_sequence() {
        let mut ids = IdGenerator::new();
        let out = fragment_output(&mut ids);
        let add = binary(&mut ids, BinaryOperator::Add);
        let c = constant(&mut ids, "half", DataValue::Float(0.5));

        assert_eq!(out.id, NodeId(0));
        assert_eq!(add.id, NodeId(1));
        assert_eq!(c.id, NodeId(2));
    }

    #[test]
    fn source_nodes_discover_uniforms_then_textures() {
        let mut ids = IdGenerator::new();
        let node = source_node(&mut ids, "noise", "void main() {}", Stage::Fragment);

        assert_eq!(
            node.config.strategies,
            vec![Strategy::Uniform, Strategy::Texture2D]
        );
    }
}
