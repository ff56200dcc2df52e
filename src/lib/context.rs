//! Per-node compile context: the node's parsed and converted tree plus the
//! fillers discovered on it. Rebuilt wholesale on every compile; a filler is
//! only ever valid against the tree instance it was discovered on.

use std::collections::{HashMap, HashSet};

use crate::{
    engine::NodeHooks,
    glsl::{
        ast::{
            Declaration, Declarator, ExternalItem, Qualifier, StorageQual, TranslationUnit,
            TypeSpec,
        },
        parse_expression, parse_program,
        preprocess::preprocess,
        visit::{substitute_ident, walk_unit_exprs},
        Expr, ShaderAst, Stmt,
    },
    graph::{Input, InputCategory, Node, NodeKind, ParseMode, Stage},
    mangle,
    strategy::{self, Filler, MAIN_STMTS_INPUT},
};

#[derive(Debug, thiserror::Error)]
/// Context construction and fill errors.
pub enum Error {
    #[error(transparent)]
    /// The node's source text failed to parse.
    Parse(#[from] crate::glsl::parse::Error),

    #[error("Engine hook failed: {0}")]
    /// An engine-supplied hook reported a failure.
    Hook(#[from] anyhow::Error),

    #[error(transparent)]
    /// A filler no longer matches the tree it was discovered on.
    Stale(#[from] strategy::Error),

    #[error("No filler registered for input `{0}`")]
    /// Fill request for an input id this context never discovered. The
    /// caller is holding a context from a previous compile.
    UnknownInput(String),
}

/// Everything needed to compile one node and graft upstream code into it.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// The converted tree; fillers mutate it in place.
    pub ast: ShaderAst,
    /// Inputs discovered this compile, in strategy order.
    pub inputs: Vec<Input>,
    /// Filler per input id.
    pub fillers: HashMap<String, Filler>,
}

impl NodeContext {
    /// Graft `arg` into the splice site registered for `input_id`.
    pub fn fill(&mut self, input_id: &str, arg: &Expr) -> Result<(), Error> {
        let filler = self
            .fillers
            .get(input_id)
            .ok_or_else(|| Error::UnknownInput(input_id.to_owned()))?;
        filler.apply(&mut self.ast, arg)?;
        Ok(())
    }
}

/// Inputs to one context construction, gathered by the compiler.
pub struct BuildArgs<'a> {
    /// Resolved source text (literal or engine-produced). Ignored for
    /// binary combinator nodes, whose expression is generated.
    pub source: String,
    /// Stage being compiled.
    pub stage: Stage,
    /// Engine's reserved identifiers.
    pub preserve: &'a HashSet<String>,
    /// Hooks for the node's engine type, when any.
    pub hooks: Option<&'a NodeHooks>,
    /// Whether the node links through another full shader node downstream.
    pub links_through: bool,
    /// Wired inbound edge count, sizing binary combinator parameter lists.
    pub arity: usize,
}

/// Build a node's context: preprocess, parse, convert, mangle, then run the
/// node's strategies and record the discovered inputs on the node.
pub fn build_context(node: &mut Node, args: BuildArgs) -> Result<NodeContext, Error> {
    if let NodeKind::Binary { operator } = node.kind {
        // Combinator nodes get a generated expression over lettered
        // parameters, at least binary, wider when more edges are wired.
        let arity = args.arity.max(2);
        let letters: Vec<String> = (0..arity)
            .map(|i| ((b'a' + i as u8) as char).to_string())
            .collect();

        let expr = letters
            .iter()
            .skip(1)
            .fold(Expr::ident(&letters[0]), |left, letter| Expr::Binary {
                op: operator.token().to_owned(),
                left: Box::new(left),
                right: Box::new(Expr::ident(letter)),
            });

        let inputs: Vec<Input> = letters
            .iter()
            .map(|letter| Input::new(letter, InputCategory::Code))
            .collect();
        let fillers: HashMap<String, Filler> = letters
            .into_iter()
            .map(|letter| {
                (
                    letter.clone(),
                    Filler::ExpressionParam { name: letter },
                )
            })
            .collect();

        node.merge_inputs(inputs.clone());
        return Ok(NodeContext {
            ast: ShaderAst::Expression(expr),
            inputs,
            fillers,
        });
    }

    let text = if node.config.preprocess {
        preprocess(&args.source)
    } else {
        args.source.clone()
    };

    let mut ast = match node.config.parse_mode {
        ParseMode::Program => ShaderAst::Program(parse_program(&text)?),
        ParseMode::Expression => ShaderAst::Expression(parse_expression(&text)?),
    };

    if let Some(manipulate) = args.hooks.and_then(|hooks| hooks.manipulate_ast.as_ref()) {
        manipulate.manipulate(node, &mut ast)?;
    }

    if let Some(unit) = ast.program_mut() {
        if node.config.version < 300 {
            convert_legacy(unit, args.stage);
        }

        if node.produces_shader() {
            match args.stage {
                Stage::Fragment => convert_fragment_main(unit),
                Stage::Vertex => convert_vertex_main(unit, args.links_through),
            }
        }
    }

    // Discover inputs on the unmangled tree, so ids are the source names a
    // graph wires against and the remap table keys by.
    let mut inputs: Vec<Input> = Vec::new();
    let mut fillers: HashMap<String, Filler> = HashMap::new();

    for strategy in node.config.strategies.clone() {
        for (input, filler) in strategy.run(node, &mut ast) {
            // Duplicate ids across strategies: first wins.
            if fillers.contains_key(&input.id) {
                continue;
            }
            fillers.insert(input.id.clone(), filler);
            inputs.push(input);
        }
    }

    let exempt = node.is_expression() || matches!(node.kind, NodeKind::Output { .. });
    if !exempt {
        if let Some(unit) = ast.program_mut() {
            // Fillers captured pre-mangle names; re-key them against the
            // renamed tree.
            let renames = mangle::mangle(unit, node, args.preserve);
            for filler in fillers.values_mut() {
                filler.rename(&renames);
            }
        }
    }

    if matches!(node.kind, NodeKind::Output { .. }) {
        fillers.insert(MAIN_STMTS_INPUT.to_owned(), Filler::MainStatement);
        inputs.push(Input::new(MAIN_STMTS_INPUT, InputCategory::Filler));
    }

    node.merge_inputs(inputs.clone());

    Ok(NodeContext {
        ast,
        inputs,
        fillers,
    })
}

/// Convert a pre-300 program to the modern interface: `texture` calls,
/// `in`/`out` storage and, for fragment programs writing `gl_FragColor`, an
/// explicit output variable.
fn convert_legacy(unit: &mut TranslationUnit, stage: Stage) {
    mangle::modernize_texture_calls(unit);

    for item in &mut unit.items {
        if let ExternalItem::Declaration(decl) = item {
            for qual in &mut decl.qualifiers {
                if let Qualifier::Storage(storage) = qual {
                    *storage = match (*storage, stage) {
                        (StorageQual::Attribute, _) => StorageQual::In,
                        (StorageQual::Varying, Stage::Vertex) => StorageQual::Out,
                        (StorageQual::Varying, Stage::Fragment) => StorageQual::In,
                        (other, _) => other,
                    };
                }
            }
        }
    }

    if stage == Stage::Fragment {
        let mut writes_frag_color = false;
        walk_unit_exprs(unit, &mut |expr| {
            if matches!(expr, Expr::Ident(name) if name == "gl_FragColor") {
                writes_frag_color = true;
            }
        });

        if writes_frag_color {
            substitute_ident(unit, "gl_FragColor", "fragColor");
            unit.items.insert(
                0,
                ExternalItem::Declaration(Declaration {
                    qualifiers: vec![Qualifier::Storage(StorageQual::Out)],
                    ty: TypeSpec::named("vec4"),
                    declarators: vec![Declarator::named("fragColor")],
                }),
            );
        }
    }
}

/// Turn a fragment program's `main` into a `vec4`-returning function: the
/// stage output variable becomes a local that `main` returns, so any number
/// of converted mains can coexist as callables in one program.
fn convert_fragment_main(unit: &mut TranslationUnit) {
    let color = unit.items.iter().find_map(|item| match item {
        ExternalItem::Declaration(decl)
            if decl.has_storage(StorageQual::Out) && decl.ty.name == "vec4" =>
        {
            decl.declarators.first().map(|d| d.name.clone())
        }
        _ => None,
    });
    let Some(color) = color else {
        return;
    };

    unit.items.retain(|item| {
        !matches!(
            item,
            ExternalItem::Declaration(decl)
                if decl.has_storage(StorageQual::Out)
                    && decl.declarators.iter().all(|d| d.name == color)
        )
    });

    let Some(main) = unit.function_mut("main") else {
        return;
    };
    main.ret = TypeSpec::named("vec4");
    main.body.insert(
        0,
        Stmt::Decl(Declaration {
            qualifiers: Vec::new(),
            ty: TypeSpec::named("vec4"),
            declarators: vec![Declarator::named(&color)],
        }),
    );
    main.body.push(Stmt::Return(Some(Expr::ident(&color))));
}

/// Turn a vertex program's `main` into a `vec4`-returning function. The
/// clip-position assignment becomes a return: of the original right-hand
/// side when this node terminates the chain, or of the raw position cast
/// when its result flows through another shader node downstream.
fn convert_vertex_main(unit: &mut TranslationUnit, links_through: bool) {
    let Some(main) = unit.function_mut("main") else {
        return;
    };

    let index = main.body.iter().position(|stmt| {
        matches!(
            stmt,
            Stmt::Expr(Expr::Assign { op, left, .. })
                if op == "=" && matches!(left.as_ref(), Expr::Ident(name) if name == "gl_Position")
        )
    });
    let Some(index) = index else {
        return;
    };

    let value = if links_through {
        Expr::call(
            "vec4",
            vec![Expr::ident("position"), Expr::Float("1.0".to_owned())],
        )
    } else {
        match &main.body[index] {
            Stmt::Expr(Expr::Assign { right, .. }) => right.as_ref().clone(),
            _ => unreachable!(),
        }
    };

    main.ret = TypeSpec::named("vec4");
    main.body[index] = Stmt::Return(Some(value));
}
