//! Pattern-matching strategies that discover pluggable input sites inside a
//! node's syntax tree, and the fillers that later graft other nodes' code
//! into those sites.

use crate::{
    glsl::{
        ast::{Expr, ExternalItem, ShaderAst, Stmt, StorageQual},
        visit::{substitute_ident, substitute_ident_expr, walk_expr, walk_unit_exprs},
    },
    graph::{Input, InputCategory, Node},
};

/// Hidden input on output nodes taking whole statements instead of an
/// expression splice.
pub const MAIN_STMTS_INPUT: &str = "mainStmts";

/// Sampling functions matched by the texture strategy, across GLSL versions.
const TEXTURE_FNS: [&str; 2] = ["texture2D", "texture"];

#[derive(Debug, PartialEq, thiserror::Error)]
/// Filler application errors. Any of these signals a stale
/// [NodeContext](crate::context::NodeContext): the wired input no longer
/// has a matching site in the current tree.
pub enum Error {
    #[error("No assignment to `{0}` left in tree")]
    /// The assignment statement targeted by the filler is gone.
    AssignmentGone(String),

    #[error("No texture call with argument `{0}` left in tree")]
    /// The uniquified texture call targeted by the filler is gone.
    TextureCallGone(String),

    #[error("Filler for `{0}` expects a full program, found an expression")]
    /// Program-level filler applied to an expression-only tree.
    NotAProgram(String),
}

#[derive(Clone, Debug, PartialEq)]
/// Closed set of input-discovery strategies. Configured per node, run in
/// declared order.
pub enum Strategy {
    /// Expose the right-hand side of the assignment to `target`.
    AssignmentTo {
        #[allow(missing_docs)]
        target: String,
    },
    /// Expose every two-argument texture-sample call.
    Texture2D,
    /// Expose a named binding/parameter, substituting its references.
    NamedAttribute {
        #[allow(missing_docs)]
        name: String,
    },
    /// Expose every declared non-sampler uniform variable.
    Uniform,
}

#[derive(Clone, Debug, PartialEq)]
/// Splice point captured during strategy execution, valid only against the
/// tree instance it was discovered on.
pub enum Filler {
    /// Overwrite the right-hand expression of the assignment to `target`.
    AssignmentRhs {
        #[allow(missing_docs)]
        target: String,
    },
    /// Replace the whole texture call whose first argument is `arg` (the
    /// strategy uniquified repeated arguments, so `arg` addresses one call).
    TextureCall {
        #[allow(missing_docs)]
        arg: String,
    },
    /// Textually substitute every reference to `name`.
    Reference {
        #[allow(missing_docs)]
        name: String,
    },
    /// Substitute `name`, then strip the variable from its uniform
    /// declaration, dropping the declaration once empty.
    UniformRef {
        #[allow(missing_docs)]
        name: String,
    },
    /// Substitute a lettered combinator parameter in an expression tree.
    ExpressionParam {
        #[allow(missing_docs)]
        name: String,
    },
    /// Insert the argument as a new first statement of `main`.
    MainStatement,
}

impl Strategy {
    /// Scan the tree for input sites. Zero matches is not an error. The
    /// texture strategy rewrites repeated sampler arguments to uniquified
    /// names as it scans.
    pub fn run(&self, node: &Node, ast: &mut ShaderAst) -> Vec<(Input, Filler)> {
        let Some(unit) = ast.program_mut() else {
            return Vec::new();
        };

        match self {
            Strategy::AssignmentTo { target } => {
                let mut found = false;
                walk_unit_exprs(unit, &mut |expr| {
                    if let Expr::Assign { op, left, .. } = expr {
                        if op == "=" && matches!(left.as_ref(), Expr::Ident(name) if name == target)
                        {
                            found = true;
                        }
                    }
                });

                if !found {
                    return Vec::new();
                }

                vec![(
                    remapped_input(node, target, InputCategory::Code),
                    Filler::AssignmentRhs {
                        target: target.clone(),
                    },
                )]
            }

            Strategy::Texture2D => {
                // First pass: candidate names in visitation order.
                let mut names = Vec::new();
                walk_unit_exprs(unit, &mut |expr| {
                    if let Some(arg) = texture_call_arg(expr) {
                        names.push(arg);
                    }
                });

                let mut results = Vec::new();
                let mut seen_per_name = 0usize;
                let mut previous = String::new();

                for (index, name) in names.iter().enumerate() {
                    let total = names.iter().filter(|n| *n == name).count();
                    if *name == previous {
                        seen_per_name += 1;
                    } else {
                        previous = name.clone();
                        seen_per_name = names[..index].iter().filter(|n| *n == name).count();
                    }

                    let id = if total == 1 {
                        name.clone()
                    } else {
                        format!("{name}_{seen_per_name}")
                    };

                    // Uniquify the call site so the filler can address it
                    // after unrelated sites have been rewritten.
                    if total > 1 {
                        rewrite_texture_arg(unit, name, index, &id);
                    }

                    results.push((
                        remapped_input(node, &id, InputCategory::Filler),
                        Filler::TextureCall { arg: id },
                    ));
                }

                results
            }

            Strategy::NamedAttribute { name } => {
                let bound = unit.items.iter().any(|item| match item {
                    ExternalItem::Declaration(decl) => {
                        decl.declarators.iter().any(|d| d.name == *name)
                    }
                    ExternalItem::Function(func) => func
                        .params
                        .iter()
                        .any(|param| param.name.as_deref() == Some(name)),
                    _ => false,
                });

                if !bound {
                    return Vec::new();
                }

                vec![(
                    remapped_input(node, name, InputCategory::Property),
                    Filler::Reference { name: name.clone() },
                )]
            }

            Strategy::Uniform => {
                let mut results = Vec::new();

                for item in &unit.items {
                    let ExternalItem::Declaration(decl) = item else {
                        continue;
                    };
                    if !decl.has_storage(StorageQual::Uniform)
                        || decl.ty.name.contains("sampler")
                    {
                        continue;
                    }

                    for declarator in &decl.declarators {
                        results.push((
                            remapped_input(node, &declarator.name, InputCategory::Property),
                            Filler::UniformRef {
                                name: declarator.name.clone(),
                            },
                        ));
                    }
                }

                results
            }
        }
    }
}

impl Filler {
    /// Graft the argument expression into the captured site. The argument is
    /// another node's generated tree; substitution-style fillers write its
    /// rendered text, splice-style fillers move the tree in whole.
    pub fn apply(&self, ast: &mut ShaderAst, arg: &Expr) -> Result<(), Error> {
        match self {
            Filler::ExpressionParam { name } => {
                if let ShaderAst::Expression(root) = ast {
                    substitute_ident_expr(root, name, &arg.to_string());
                    return Ok(());
                }
                Err(Error::NotAProgram(name.clone()))
            }

            Filler::AssignmentRhs { target } => {
                let unit = ast
                    .program_mut()
                    .ok_or_else(|| Error::NotAProgram(target.clone()))?;

                let mut done = false;
                walk_unit_exprs(unit, &mut |expr| {
                    if done {
                        return;
                    }
                    if let Expr::Assign { op, left, right } = expr {
                        if op == "="
                            && matches!(left.as_ref(), Expr::Ident(name) if name == target)
                        {
                            *right = Box::new(arg.clone());
                            done = true;
                        }
                    }
                });

                done.then_some(())
                    .ok_or_else(|| Error::AssignmentGone(target.clone()))
            }

            Filler::TextureCall { arg: target_arg } => {
                let unit = ast
                    .program_mut()
                    .ok_or_else(|| Error::NotAProgram(target_arg.clone()))?;

                let mut done = false;
                walk_unit_exprs(unit, &mut |expr| {
                    if done {
                        return;
                    }
                    if texture_call_arg(expr).as_deref() == Some(target_arg) {
                        *expr = arg.clone();
                        done = true;
                    }
                });

                done.then_some(())
                    .ok_or_else(|| Error::TextureCallGone(target_arg.clone()))
            }

            Filler::Reference { name } => {
                let unit = ast
                    .program_mut()
                    .ok_or_else(|| Error::NotAProgram(name.clone()))?;
                substitute_ident(unit, name, &arg.to_string());
                Ok(())
            }

            Filler::UniformRef { name } => {
                let unit = ast
                    .program_mut()
                    .ok_or_else(|| Error::NotAProgram(name.clone()))?;
                substitute_ident(unit, name, &arg.to_string());
                strip_uniform(unit, name);
                Ok(())
            }

            Filler::MainStatement => {
                let unit = ast
                    .program_mut()
                    .ok_or_else(|| Error::NotAProgram(MAIN_STMTS_INPUT.to_owned()))?;
                let main = unit
                    .function_mut("main")
                    .ok_or_else(|| Error::AssignmentGone("main".to_owned()))?;
                main.body.insert(0, Stmt::Expr(arg.clone()));
                Ok(())
            }
        }
    }

    /// Re-key the captured site name through a rename map, so a filler
    /// discovered before mangling still addresses the mangled tree.
    pub fn rename(&mut self, renames: &std::collections::HashMap<String, String>) {
        let name = match self {
            Filler::AssignmentRhs { target } => target,
            Filler::TextureCall { arg } => arg,
            Filler::Reference { name }
            | Filler::UniformRef { name }
            | Filler::ExpressionParam { name } => name,
            Filler::MainStatement => return,
        };

        if let Some(new) = renames.get(name.as_str()) {
            *name = new.clone();
        }
    }
}

/// First-argument rendered text of a two-argument texture-sample call.
fn texture_call_arg(expr: &Expr) -> Option<String> {
    let Expr::Call { callee, args } = expr else {
        return None;
    };
    let Expr::Ident(name) = callee.as_ref() else {
        return None;
    };

    (TEXTURE_FNS.contains(&name.as_str()) && args.len() == 2).then(|| args[0].to_string())
}

/// Rewrite the first argument of the `index`-th texture call (counted over
/// all texture calls) whose argument currently renders as `name`.
fn rewrite_texture_arg(
    unit: &mut crate::glsl::TranslationUnit,
    name: &str,
    index: usize,
    unique: &str,
) {
    let mut position = 0usize;
    walk_unit_exprs(unit, &mut |expr| {
        if let Expr::Call { callee, args } = expr {
            if matches!(callee.as_ref(), Expr::Ident(n) if TEXTURE_FNS.contains(&n.as_str()))
                && args.len() == 2
            {
                if position == index && args[0].to_string() == name {
                    args[0] = Expr::Ident(unique.to_owned());
                }
                position += 1;
            }
        }
    });
}

/// Remove `name` from the declarator list of any uniform declaration,
/// dropping a declaration that just lost its last name.
fn strip_uniform(unit: &mut crate::glsl::TranslationUnit, name: &str) {
    for item in &mut unit.items {
        if let ExternalItem::Declaration(decl) = item {
            if decl.has_storage(StorageQual::Uniform) {
                decl.declarators.retain(|d| d.name != name);
            }
        }
    }

    unit.items.retain(|item| {
        !matches!(
            item,
            ExternalItem::Declaration(decl)
                if decl.has_storage(StorageQual::Uniform) && decl.declarators.is_empty()
        )
    });
}

fn remapped_input(node: &Node, id: &str, category: InputCategory) -> Input {
    Input {
        id: id.to_owned(),
        name: node
            .config
            .input_remap
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_owned()),
        category,
        baked: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::glsl::parse_program;
    use crate::graph::{NodeConfig, NodeId, NodeKind, OutputSlot, Stage};

    fn node_for_tests() -> Node {
        Node {
            id: NodeId(1),
            name: "test".to_owned(),
            kind: NodeKind::Source {
                source: String::new(),
                engine_type: None,
            },
            stage: Some(Stage::Fragment),
            sibling: None,
            config: NodeConfig::default(),
            inputs: Vec::new(),
            outputs: vec![OutputSlot::new("out")],
        }
    }

    fn program(source: &str) -> ShaderAst {
        ShaderAst::Program(parse_program(source).unwrap())
    }

    mod texture2d {
        use super::*;

        #[test]
        fn single_call_keeps_bare_name() {
            let node = node_for_tests();
            let mut ast = program("void main() { vec4 c = texture2D(noiseImage, uv); }");

            let found = Strategy::Texture2D.run(&node, &mut ast);

            assert_eq!(found.len(), 1);
            assert_eq!(found[0].0.id, "noiseImage");
        }

        #[test]
        fn repeated_calls_are_uniquified_in_source_order() {
            let node = node_for_tests();
            let mut ast = program(
                r#"
                void main() {
                    vec4 a = texture2D(noiseImage, uv);
                    vec4 b = texture2D(noiseImage, uv * 2.0);
                }
                "#,
            );

            let found = Strategy::Texture2D.run(&node, &mut ast);

            let ids: Vec<&str> = found.iter().map(|(input, _)| input.id.as_str()).collect();
            assert_eq!(ids, vec!["noiseImage_0", "noiseImage_1"]);

            // Both call sites were rewritten to their unique argument.
            let text = ast.to_string();
            assert!(text.contains("texture2D(noiseImage_0, uv)"));
            assert!(text.contains("texture2D(noiseImage_1, uv * 2.0)"));
        }

        #[test]
        fn filler_replaces_whole_call() {
            let node = node_for_tests();
            let mut ast = program("void main() { vec4 c = texture2D(noiseImage, uv); }");

            let mut found = Strategy::Texture2D.run(&node, &mut ast);
            let (_, filler) = found.remove(0);

            filler
                .apply(&mut ast, &Expr::call("sampleNoise_2", vec![]))
                .unwrap();

            assert!(ast.to_string().contains("vec4 c = sampleNoise_2();"));
        }
    }

    mod uniform {
        use super::*;

        #[test]
        fn one_input_per_declared_variable() {
            let node = node_for_tests();
            let mut ast = program("uniform vec4 input, output, other;\nvoid main() {}");

            let found = Strategy::Uniform.run(&node, &mut ast);

            let ids: Vec<&str> = found.iter().map(|(input, _)| input.id.as_str()).collect();
            assert_eq!(ids, vec!["input", "output", "other"]);
        }

        #[test]
        fn samplers_and_layout_defaults_are_skipped() {
            let node = node_for_tests();
            let mut ast = program(
                "layout(std140) uniform;\nuniform sampler2D tex;\nuniform float t;\nvoid main() {}",
            );

            let found = Strategy::Uniform.run(&node, &mut ast);

            assert_eq!(found.len(), 1);
            assert_eq!(found[0].0.id, "t");
        }

        #[test]
        fn filling_two_of_three_leaves_the_third_declared() {
            let node = node_for_tests();
            let mut ast = program(
                "uniform vec4 input, output, other;\nvoid main() { gl_FragColor = input + output + other; }",
            );

            let found = Strategy::Uniform.run(&node, &mut ast);
            for (input, filler) in &found {
                if input.id != "other" {
                    filler
                        .apply(&mut ast, &Expr::call(&format!("fill_{}", input.id), vec![]))
                        .unwrap();
                }
            }

            let text = ast.to_string();
            assert!(text.contains("uniform vec4 other;"));
            assert!(text.contains("fill_input() + fill_output() + other"));
        }
    }

    mod assignment {
        use super::*;

        #[test]
        fn missing_target_yields_zero_inputs() {
            let node = node_for_tests();
            let mut ast = program("void main() { other = vec4(1.0); }");

            assert!(Strategy::AssignmentTo {
                target: "fragColor".to_owned()
            }
            .run(&node, &mut ast)
            .is_empty());
        }

        #[test]
        fn filler_overwrites_right_hand_side() {
            let node = node_for_tests();
            let mut ast = program("void main() { fragColor = vec4(0.0); }");

            let mut found = Strategy::AssignmentTo {
                target: "fragColor".to_owned(),
            }
            .run(&node, &mut ast);
            assert_eq!(found.len(), 1);

            let (_, filler) = found.remove(0);
            filler
                .apply(&mut ast, &Expr::call("main_shaderA", vec![]))
                .unwrap();

            assert!(ast.to_string().contains("fragColor = main_shaderA();"));
        }

        #[test]
        fn stale_filler_is_an_error() {
            let mut ast = program("void main() {}");
            let filler = Filler::AssignmentRhs {
                target: "fragColor".to_owned(),
            };

            assert_eq!(
                filler.apply(&mut ast, &Expr::ident("x")),
                Err(Error::AssignmentGone("fragColor".to_owned()))
            );
        }
    }
}
