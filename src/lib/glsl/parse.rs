//! GLSL text to [TranslationUnit]/[Expr] parsing built on pest.

use pest::{
    error::LineColLocation,
    iterators::{Pair, Pairs},
    pratt_parser::{Assoc, Op, PrattParser},
    Parser,
};
use pest_derive::Parser;

use super::ast::*;

#[derive(Parser)]
#[grammar = "lib/glsl/grammar.pest"]
struct GlslParser;

/// Parsing result shorthand.
pub type PResult<T> = Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("GLSL parse error at {}: {kind}", fmt_line(.line))]
/// Parse failure with its source location.
pub struct Error {
    kind: ErrorKind,
    line: LineColLocation,
}

fn fmt_line(line: &LineColLocation) -> String {
    match line {
        LineColLocation::Pos((line, col)) => format!("{line}:{col}"),
        LineColLocation::Span((line, col), _) => format!("{line}:{col}"),
    }
}

#[derive(Debug, Clone, thiserror::Error)]
/// Parse error variants.
pub enum ErrorKind {
    #[error("{0}")]
    /// Grammar-level failure reported by pest.
    Parsing(Box<pest::error::Error<Rule>>),
}

lazy_static::lazy_static! {
    static ref PRATT: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::lor, Assoc::Left))
        .op(Op::infix(Rule::land, Assoc::Left))
        .op(Op::infix(Rule::bor, Assoc::Left))
        .op(Op::infix(Rule::bxor, Assoc::Left))
        .op(Op::infix(Rule::band, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::neq, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left));
}

/// Parse a whole GLSL program.
pub fn parse_program(source: &str) -> PResult<TranslationUnit> {
    let mut pairs = GlslParser::parse(Rule::program, source).map_err(|err| Error {
        line: err.line_col.clone(),
        kind: ErrorKind::Parsing(Box::new(err)),
    })?;

    let program = pairs.next().unwrap();
    let items = program
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::external)
        .map(parse_external)
        .collect();

    Ok(TranslationUnit { items })
}

/// Parse a single bare expression (combinator-node sources).
pub fn parse_expression(source: &str) -> PResult<Expr> {
    let mut pairs = GlslParser::parse(Rule::expression_root, source).map_err(|err| Error {
        line: err.line_col.clone(),
        kind: ErrorKind::Parsing(Box::new(err)),
    })?;

    let root = pairs.next().unwrap();
    let expr = root
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::expr)
        .unwrap();

    Ok(parse_expr(expr))
}

fn parse_external(external: Pair<Rule>) -> ExternalItem {
    let inner = external.into_inner().next().unwrap();

    match inner.as_rule() {
        Rule::directive => ExternalItem::Directive(inner.as_str().trim_end().to_owned()),
        Rule::precision_decl => {
            let mut parts = inner.into_inner();
            parts.next(); // kw_precision
            let qual = parse_precision(parts.next().unwrap());
            let ty = parts.next().unwrap().as_str().to_owned();
            ExternalItem::Precision { qual, ty }
        }
        Rule::struct_decl => ExternalItem::Struct(parse_struct(inner)),
        Rule::function_def => ExternalItem::Function(parse_function(inner)),
        Rule::layout_default => {
            let mut parts = inner.into_inner();
            let layout = parse_layout_args(parts.next().unwrap());
            let storage = parse_storage(parts.next().unwrap());
            ExternalItem::LayoutDefault { layout, storage }
        }
        Rule::block_decl => ExternalItem::Block(parse_block_decl(inner)),
        Rule::declaration => ExternalItem::Declaration(parse_declaration(inner)),
        rule => unreachable!("unexpected external item rule {rule:?}"),
    }
}

fn parse_precision(pair: Pair<Rule>) -> PrecisionQual {
    match pair.as_str() {
        "lowp" => PrecisionQual::Lowp,
        "mediump" => PrecisionQual::Mediump,
        "highp" => PrecisionQual::Highp,
        text => unreachable!("unexpected precision qualifier `{text}`"),
    }
}

fn parse_storage(pair: Pair<Rule>) -> StorageQual {
    match pair.as_str() {
        "uniform" => StorageQual::Uniform,
        "attribute" => StorageQual::Attribute,
        "varying" => StorageQual::Varying,
        "in" => StorageQual::In,
        "out" => StorageQual::Out,
        "inout" => StorageQual::Inout,
        text => unreachable!("unexpected storage qualifier `{text}`"),
    }
}

fn parse_layout_args(pair: Pair<Rule>) -> String {
    // layout_qual > layout_args
    pair.into_inner()
        .find(|inner| inner.as_rule() == Rule::layout_args)
        .unwrap()
        .as_str()
        .to_owned()
}

fn parse_qualifier(pair: Pair<Rule>) -> Qualifier {
    let inner = pair.into_inner().next();

    match inner {
        Some(inner) => match inner.as_rule() {
            Rule::layout_qual => Qualifier::Layout(parse_layout_args(inner)),
            Rule::storage_qual => Qualifier::Storage(parse_storage(inner)),
            Rule::precision_qual => Qualifier::Precision(parse_precision(inner)),
            Rule::interp_qual => Qualifier::Interp(inner.as_str().to_owned()),
            Rule::kw_const => Qualifier::Const,
            Rule::kw_invariant => Qualifier::Invariant,
            rule => unreachable!("unexpected qualifier rule {rule:?}"),
        },
        None => unreachable!("empty qualifier"),
    }
}

fn parse_type_spec(pair: Pair<Rule>) -> TypeSpec {
    let mut parts = pair.into_inner();
    let name = parts.next().unwrap().as_str().to_owned();
    let array = parts.next().map(parse_array_spec);

    TypeSpec { name, array }
}

fn parse_array_spec(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|expr| parse_expr(expr).to_string())
        .unwrap_or_default()
}

fn parse_declarator(pair: Pair<Rule>) -> Declarator {
    let mut name = String::new();
    let mut array = None;
    let mut init = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::ident => name = part.as_str().to_owned(),
            Rule::array_spec => array = Some(parse_array_spec(part)),
            Rule::assign_expr => init = Some(parse_assign(part)),
            rule => unreachable!("unexpected declarator rule {rule:?}"),
        }
    }

    Declarator { name, array, init }
}

fn parse_declaration(pair: Pair<Rule>) -> Declaration {
    let mut qualifiers = Vec::new();
    let mut ty = TypeSpec::named("void");
    let mut declarators = Vec::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::qualifier => qualifiers.push(parse_qualifier(part)),
            Rule::type_spec => ty = parse_type_spec(part),
            Rule::declarator_list => {
                declarators = part.into_inner().map(parse_declarator).collect()
            }
            rule => unreachable!("unexpected declaration rule {rule:?}"),
        }
    }

    Declaration {
        qualifiers,
        ty,
        declarators,
    }
}

fn parse_struct(pair: Pair<Rule>) -> StructDef {
    let mut parts = pair.into_inner();
    parts.next(); // kw_struct
    let name = parts.next().unwrap().as_str().to_owned();

    let mut members = Vec::new();
    let mut instance = None;
    for part in parts {
        match part.as_rule() {
            Rule::member_decl => members.push(parse_declaration(part)),
            Rule::ident => instance = Some(part.as_str().to_owned()),
            rule => unreachable!("unexpected struct rule {rule:?}"),
        }
    }

    StructDef {
        name,
        members,
        instance,
    }
}

fn parse_block_decl(pair: Pair<Rule>) -> InterfaceBlock {
    let mut qualifiers = Vec::new();
    let mut name = String::new();
    let mut members = Vec::new();
    let mut instance = None;
    let mut array = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::qualifier => qualifiers.push(parse_qualifier(part)),
            Rule::ident => name = part.as_str().to_owned(),
            Rule::member_decl => members.push(parse_declaration(part)),
            Rule::block_instance => {
                let mut inner = part.into_inner();
                instance = Some(inner.next().unwrap().as_str().to_owned());
                array = inner.next().map(parse_array_spec);
            }
            rule => unreachable!("unexpected block rule {rule:?}"),
        }
    }

    InterfaceBlock {
        qualifiers,
        name,
        members,
        instance,
        array,
    }
}

fn parse_function(pair: Pair<Rule>) -> FunctionDef {
    let mut qualifiers = Vec::new();
    let mut ret = TypeSpec::named("void");
    let mut name = String::new();
    let mut params = Vec::new();
    let mut body = Vec::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::qualifier => qualifiers.push(parse_qualifier(part)),
            Rule::type_spec => ret = parse_type_spec(part),
            Rule::ident => name = part.as_str().to_owned(),
            Rule::param_list => params = part.into_inner().map(parse_param).collect(),
            Rule::block => body = parse_block_stmts(part),
            rule => unreachable!("unexpected function rule {rule:?}"),
        }
    }

    FunctionDef {
        qualifiers,
        ret,
        name,
        params,
        body,
    }
}

fn parse_param(pair: Pair<Rule>) -> Param {
    let mut qualifiers = Vec::new();
    let mut ty = TypeSpec::named("void");
    let mut name = None;
    let mut array = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::qualifier => qualifiers.push(parse_qualifier(part)),
            Rule::type_spec => ty = parse_type_spec(part),
            Rule::ident => name = Some(part.as_str().to_owned()),
            Rule::array_spec => array = Some(parse_array_spec(part)),
            rule => unreachable!("unexpected param rule {rule:?}"),
        }
    }

    Param {
        qualifiers,
        ty,
        name,
        array,
    }
}

fn parse_block_stmts(pair: Pair<Rule>) -> Vec<Stmt> {
    pair.into_inner().map(parse_stmt).collect()
}

fn parse_stmt(pair: Pair<Rule>) -> Stmt {
    let inner = pair.into_inner().next().unwrap();

    match inner.as_rule() {
        Rule::block => Stmt::Block(parse_block_stmts(inner)),
        Rule::if_stmt => {
            let mut cond = None;
            let mut branches = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::expr => cond = Some(parse_expr(part)),
                    Rule::stmt => branches.push(parse_stmt(part)),
                    _ => {}
                }
            }
            let mut branches = branches.into_iter();
            Stmt::If {
                cond: cond.unwrap(),
                then: Box::new(branches.next().unwrap()),
                otherwise: branches.next().map(Box::new),
            }
        }
        Rule::for_stmt => {
            let mut parts = inner.into_inner();
            parts.next(); // kw_for
            let init = {
                let init = parts.next().unwrap().into_inner().next().unwrap();
                match init.as_rule() {
                    Rule::empty_stmt => None,
                    _ => Some(Box::new(parse_stmt_inner(init))),
                }
            };

            let mut cond = None;
            let mut step = None;
            let mut body = None;
            for part in parts {
                match part.as_rule() {
                    // First bare expr is the condition, second the step.
                    Rule::expr if cond.is_none() => cond = Some(parse_expr(part)),
                    Rule::expr => step = Some(parse_expr(part)),
                    Rule::stmt => body = Some(parse_stmt(part)),
                    _ => {}
                }
            }

            Stmt::For {
                init,
                cond,
                step,
                body: Box::new(body.unwrap()),
            }
        }
        Rule::while_stmt => {
            let mut parts = inner.into_inner();
            parts.next(); // kw_while
            let cond = parse_expr(parts.next().unwrap());
            let body = parse_stmt(parts.next().unwrap());
            Stmt::While {
                cond,
                body: Box::new(body),
            }
        }
        Rule::return_stmt => Stmt::Return(
            inner
                .into_inner()
                .find(|part| part.as_rule() == Rule::expr)
                .map(parse_expr),
        ),
        Rule::break_stmt => Stmt::Break,
        Rule::continue_stmt => Stmt::Continue,
        Rule::discard_stmt => Stmt::Discard,
        Rule::decl_stmt => Stmt::Decl(parse_declaration(inner)),
        Rule::expr_stmt => Stmt::Expr(parse_expr(inner.into_inner().next().unwrap())),
        Rule::empty_stmt => Stmt::Empty,
        rule => unreachable!("unexpected statement rule {rule:?}"),
    }
}

fn parse_stmt_inner(pair: Pair<Rule>) -> Stmt {
    match pair.as_rule() {
        Rule::decl_stmt => Stmt::Decl(parse_declaration(pair)),
        Rule::expr_stmt => Stmt::Expr(parse_expr(pair.into_inner().next().unwrap())),
        Rule::empty_stmt => Stmt::Empty,
        rule => unreachable!("unexpected for-init rule {rule:?}"),
    }
}

fn parse_expr(pair: Pair<Rule>) -> Expr {
    parse_assign(pair.into_inner().next().unwrap())
}

fn parse_assign(pair: Pair<Rule>) -> Expr {
    let mut parts = pair.into_inner();
    let left = parse_ternary(parts.next().unwrap());

    match (parts.next(), parts.next()) {
        (Some(op), Some(right)) => Expr::Assign {
            op: op.as_str().to_owned(),
            left: Box::new(left),
            right: Box::new(parse_assign(right)),
        },
        _ => left,
    }
}

fn parse_ternary(pair: Pair<Rule>) -> Expr {
    let mut parts = pair.into_inner();
    let cond = parse_binary(parts.next().unwrap().into_inner());

    match (parts.next(), parts.next()) {
        (Some(then), Some(otherwise)) => Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(parse_expr(then)),
            otherwise: Box::new(parse_assign(otherwise)),
        },
        _ => cond,
    }
}

fn parse_binary(pairs: Pairs<Rule>) -> Expr {
    PRATT
        .map_primary(|primary| match primary.as_rule() {
            Rule::unary_expr => parse_unary(primary),
            rule => unreachable!("unexpected binary operand rule {rule:?}"),
        })
        .map_infix(|left, op, right| Expr::Binary {
            op: op.as_str().to_owned(),
            left: Box::new(left),
            right: Box::new(right),
        })
        .parse(pairs)
}

fn parse_unary(pair: Pair<Rule>) -> Expr {
    let mut ops = Vec::new();
    let mut expr = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::un_op => ops.push(part.as_str().to_owned()),
            Rule::postfix_expr => expr = Some(parse_postfix(part)),
            rule => unreachable!("unexpected unary rule {rule:?}"),
        }
    }

    let mut expr = expr.unwrap();
    for op in ops.into_iter().rev() {
        expr = Expr::Unary {
            op,
            expr: Box::new(expr),
        };
    }

    expr
}

fn parse_postfix(pair: Pair<Rule>) -> Expr {
    let mut parts = pair.into_inner();
    let mut expr = parse_primary(parts.next().unwrap());

    for postfix in parts {
        let postfix = postfix.into_inner().next().unwrap();
        expr = match postfix.as_rule() {
            Rule::call_args => Expr::Call {
                callee: Box::new(expr),
                args: postfix.into_inner().map(parse_assign).collect(),
            },
            Rule::index => Expr::Index {
                base: Box::new(expr),
                index: Box::new(parse_expr(postfix.into_inner().next().unwrap())),
            },
            Rule::member => Expr::Member {
                base: Box::new(expr),
                field: postfix.into_inner().next().unwrap().as_str().to_owned(),
            },
            Rule::inc => Expr::PostIncDec {
                op: "++".to_owned(),
                expr: Box::new(expr),
            },
            Rule::dec => Expr::PostIncDec {
                op: "--".to_owned(),
                expr: Box::new(expr),
            },
            rule => unreachable!("unexpected postfix rule {rule:?}"),
        };
    }

    expr
}

fn parse_primary(pair: Pair<Rule>) -> Expr {
    let inner = pair.into_inner().next().unwrap();

    match inner.as_rule() {
        Rule::float_lit => Expr::Float(inner.as_str().to_owned()),
        Rule::int_lit => Expr::Int(inner.as_str().to_owned()),
        Rule::bool_lit => Expr::Bool(inner.as_str() == "true"),
        Rule::ident => Expr::Ident(inner.as_str().to_owned()),
        Rule::paren => Expr::Paren(Box::new(parse_expr(inner.into_inner().next().unwrap()))),
        rule => unreachable!("unexpected primary rule {rule:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_declarations_and_main() {
        let unit = parse_program(
            r#"
            #version 300 es
            precision highp float;
            uniform vec4 tint, other;
            in vec2 uv;
            out vec4 fragColor;
            void main() {
                fragColor = tint * vec4(uv, 0.0, 1.0);
            }
            "#,
        )
        .unwrap();

        assert_eq!(unit.items.len(), 6);
        assert!(unit.function("main").is_some());
    }

    #[test]
    fn keeps_literal_forms() {
        let expr = parse_expression("vec4(2.0) + a * 3.0e-2").unwrap();
        assert_eq!(expr.to_string(), "vec4(2.0) + a * 3.0e-2");
    }

    #[test]
    fn precedence_is_conventional() {
        let expr = parse_expression("a + b * c == d && e").unwrap();
        assert_eq!(expr.to_string(), "a + b * c == d && e");

        let Expr::Binary { op, .. } = &expr else {
            panic!("expected a binary expression, got {expr:?}");
        };
        assert_eq!(op, "&&");
    }

    #[test]
    fn parses_interface_block() {
        let unit = parse_program("uniform Light0 { vec4 y; } x;").unwrap();

        let [ExternalItem::Block(block)] = unit.items.as_slice() else {
            panic!("expected a single interface block, got {:?}", unit.items);
        };
        assert_eq!(block.name, "Light0");
        assert_eq!(block.instance.as_deref(), Some("x"));
        assert_eq!(block.members.len(), 1);
    }

    #[test]
    fn parses_control_flow() {
        let unit = parse_program(
            r#"
            float sum(float n) {
                float acc = 0.0;
                for (int i = 0; i < 8; i++) {
                    if (acc > n) { break; }
                    acc += float(i);
                }
                return acc;
            }
            "#,
        )
        .unwrap();

        let func = unit.function("sum").unwrap();
        assert_eq!(func.params.len(), 1);
        assert_eq!(func.body.len(), 3);
    }

    #[test]
    fn identifiers_may_start_with_keywords() {
        let unit = parse_program("float inner = 1.0; float outline = 2.0;").unwrap();
        assert_eq!(unit.items.len(), 2);
    }

    #[test]
    fn error_carries_location() {
        let err = parse_program("void main( {").unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }
}
