//! Identifier mangling: rename every outer-scope binding and function of a
//! node's program to a namespaced form so independently-authored programs can
//! be concatenated without collisions.

use std::collections::{HashMap, HashSet};

use crate::{
    glsl::{
        ast::{ExternalItem, Stmt, TranslationUnit},
        visit::{walk_stmt_exprs, walk_unit_exprs},
        Expr,
    },
    graph::Node,
};

lazy_static::lazy_static! {
    /// Identifiers that always keep their name, on top of the engine's
    /// preserve set. `gl_`-prefixed builtins are handled by prefix.
    static ref GLSL_BUILTINS: HashSet<&'static str> = [
        "main",
        "texture",
        "texture2D",
        "textureCube",
        "textureLod",
    ]
    .into_iter()
    .collect();
}

/// Entry-point name for a node: `main` is always renamed so every node's
/// entry point is uniquely callable.
pub fn mangled_main(node: &Node) -> String {
    format!("main_{}", node.sanitized_name())
}

/// Suffixed form of one identifier for a node.
pub fn mangled_name(name: &str, node: &Node) -> String {
    format!("{name}_{}", node.mangle_key())
}

/// Rename every outer-scope binding and function of `unit`, returning the
/// applied old-name to new-name map.
///
/// The suffix key is the node's own id, or the next-stage sibling's id when
/// one is designated, so a vertex/fragment pair mangles same-named bindings
/// identically and can cross-reference. Preserved identifiers are left
/// untouched. Renaming is scope-aware: locals and parameters shadowing a
/// global keep their name inside that function.
pub fn mangle(
    unit: &mut TranslationUnit,
    node: &Node,
    preserve: &HashSet<String>,
) -> HashMap<String, String> {
    let mut renames: HashMap<String, String> = HashMap::new();

    for item in &unit.items {
        match item {
            ExternalItem::Declaration(decl) => {
                for declarator in &decl.declarators {
                    insert_rename(&mut renames, &declarator.name, node, preserve);
                }
            }
            ExternalItem::Function(func) => {
                insert_rename(&mut renames, &func.name, node, preserve);
            }
            _ => {}
        }
    }

    if renames.is_empty() {
        return renames;
    }

    // Rename the bindings themselves.
    for item in &mut unit.items {
        match item {
            ExternalItem::Declaration(decl) => {
                for declarator in &mut decl.declarators {
                    if let Some(new) = renames.get(&declarator.name) {
                        declarator.name = new.clone();
                    }
                }
            }
            ExternalItem::Function(func) => {
                if let Some(new) = renames.get(&func.name) {
                    func.name = new.clone();
                }
            }
            _ => {}
        }
    }

    // Rename references. Global initializers see the full map; function
    // bodies see the map minus whatever the function shadows.
    for item in &mut unit.items {
        match item {
            ExternalItem::Declaration(decl) => {
                for declarator in &mut decl.declarators {
                    if let Some(init) = &mut declarator.init {
                        crate::glsl::visit::walk_expr(init, &mut |expr| {
                            rename_ident(expr, &renames)
                        });
                    }
                }
            }
            ExternalItem::Function(func) => {
                let mut shadowed: HashSet<String> = func
                    .params
                    .iter()
                    .filter_map(|param| param.name.clone())
                    .collect();
                for stmt in &func.body {
                    collect_locals(stmt, &mut shadowed);
                }

                for stmt in &mut func.body {
                    walk_stmt_exprs(stmt, &mut |expr| {
                        if let Expr::Ident(name) = expr {
                            if shadowed.contains(name.as_str()) {
                                return;
                            }
                        }
                        rename_ident(expr, &renames);
                    });
                }
            }
            _ => {}
        }
    }

    renames
}

fn insert_rename(
    renames: &mut HashMap<String, String>,
    name: &str,
    node: &Node,
    preserve: &HashSet<String>,
) {
    if name.starts_with("gl_") || preserve.contains(name) {
        return;
    }

    let renamed = if name == "main" {
        mangled_main(node)
    } else if GLSL_BUILTINS.contains(name) {
        return;
    } else {
        mangled_name(name, node)
    };

    renames.insert(name.to_owned(), renamed);
}

fn rename_ident(expr: &mut Expr, renames: &HashMap<String, String>) {
    if let Expr::Ident(name) = expr {
        if let Some(new) = renames.get(name.as_str()) {
            *name = new.clone();
        }
    }
}

/// Collect declaration names under a statement, ignoring inner block
/// nesting: a local shadowing a global anywhere in the function is enough
/// to keep the bare name inside it.
fn collect_locals(stmt: &Stmt, locals: &mut HashSet<String>) {
    match stmt {
        Stmt::Decl(decl) => {
            for declarator in &decl.declarators {
                locals.insert(declarator.name.clone());
            }
        }
        Stmt::Block(stmts) => {
            for stmt in stmts {
                collect_locals(stmt, locals);
            }
        }
        Stmt::If {
            then, otherwise, ..
        } => {
            collect_locals(then, locals);
            if let Some(otherwise) = otherwise {
                collect_locals(otherwise, locals);
            }
        }
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_locals(init, locals);
            }
            collect_locals(body, locals);
        }
        Stmt::While { body, .. } => collect_locals(body, locals),
        _ => {}
    }
}

/// Rename `texture2D`/`textureCube` calls to the canonical `texture`.
pub fn modernize_texture_calls(unit: &mut TranslationUnit) {
    walk_unit_exprs(unit, &mut |expr| {
        if let Expr::Call { callee, .. } = expr {
            if matches!(callee.as_ref(), Expr::Ident(name) if name == "texture2D" || name == "textureCube")
            {
                *callee = Box::new(Expr::ident("texture"));
            }
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::glsl::parse_program;
    use crate::graph::{Node, NodeConfig, NodeId, NodeKind, OutputSlot, Stage};

    fn node(id: u32, name: &str, sibling: Option<u32>) -> Node {
        Node {
            id: NodeId(id),
            name: name.to_owned(),
            kind: NodeKind::Source {
                source: String::new(),
                engine_type: None,
            },
            stage: Some(Stage::Fragment),
            sibling: sibling.map(NodeId),
            config: NodeConfig::default(),
            inputs: Vec::new(),
            outputs: vec![OutputSlot::new("out")],
        }
    }

    fn mangled(source: &str, node: &Node) -> String {
        let mut unit = parse_program(source).unwrap();
        mangle(&mut unit, node, &HashSet::new());
        unit.to_string()
    }

    #[test]
    fn bindings_and_references_share_the_suffix() {
        let text = mangled(
            "float brightness = 2.0;\nvoid main() { gl_FragColor = vec4(brightness); }",
            &node(3, "glow", None),
        );

        assert!(text.contains("float brightness_3 = 2.0;"));
        assert!(text.contains("vec4(brightness_3)"));
        assert!(text.contains("void main_glow()"));
    }

    #[test]
    fn sibling_pair_mangles_to_the_same_suffix() {
        let vertex = node(4, "wave vert", Some(9));
        let fragment = node(9, "wave frag", None);

        let vertex_text = mangled("float phase = 0.0;\nvoid main() {}", &vertex);
        let fragment_text = mangled("float phase = 1.0;\nvoid main() {}", &fragment);

        assert!(vertex_text.contains("phase_9"));
        assert!(fragment_text.contains("phase_9"));
    }

    #[test]
    fn unrelated_nodes_never_collide() {
        let a = mangled("float t = 0.0;", &node(1, "a", None));
        let b = mangled("float t = 0.0;", &node(2, "b", None));

        assert!(a.contains("t_1"));
        assert!(b.contains("t_2"));
    }

    #[test]
    fn preserved_and_builtin_names_are_untouched() {
        let source = "uniform mat4 projectionMatrix;\nuniform sampler2D map;\nvoid main() { gl_FragColor = projectionMatrix * texture2D(map, vec2(0.0)); }";
        let mut unit = parse_program(source).unwrap();
        let preserve: HashSet<String> = ["projectionMatrix".to_owned()].into_iter().collect();
        mangle(&mut unit, &node(7, "lit", None), &preserve);
        let text = unit.to_string();

        assert!(text.contains("uniform mat4 projectionMatrix;"));
        assert!(text.contains("gl_FragColor = projectionMatrix * texture2D(map_7, vec2(0.0));"));
    }

    #[test]
    fn locals_shadowing_globals_keep_their_name() {
        let source =
            "float speed = 1.0;\nfloat scaled(float speed) { return speed * 2.0; }\nvoid main() { float t = speed; }";
        let text = mangled(source, &node(5, "drift", None));

        assert!(text.contains("float speed_5 = 1.0;"));
        assert!(text.contains("return speed * 2.0;"));
        assert!(text.contains("float t = speed_5;"));
    }

    #[test]
    fn texture_calls_modernize_to_canonical_name() {
        let mut unit =
            parse_program("void main() { gl_FragColor = texture2D(map, uv); }").unwrap();
        modernize_texture_calls(&mut unit);
        assert!(unit.to_string().contains("texture(map, uv)"));
    }
}