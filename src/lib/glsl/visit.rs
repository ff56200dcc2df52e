//! Mutating traversals over the GLSL tree.
//!
//! All walks are pre-order: the callback sees a node before its children, so
//! a callback that replaces a node wholesale also owns what gets descended
//! into afterwards.

use super::ast::*;

/// Visit every expression of a translation unit, including global
/// initializers, mutably.
pub fn walk_unit_exprs(unit: &mut TranslationUnit, f: &mut impl FnMut(&mut Expr)) {
    for item in &mut unit.items {
        match item {
            ExternalItem::Declaration(decl) => walk_decl_exprs(decl, f),
            ExternalItem::Function(func) => {
                for stmt in &mut func.body {
                    walk_stmt_exprs(stmt, f);
                }
            }
            _ => {}
        }
    }
}

/// Visit every expression under a statement, mutably.
pub fn walk_stmt_exprs(stmt: &mut Stmt, f: &mut impl FnMut(&mut Expr)) {
    match stmt {
        Stmt::Block(stmts) => {
            for stmt in stmts {
                walk_stmt_exprs(stmt, f);
            }
        }
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(cond, f);
            walk_stmt_exprs(then, f);
            if let Some(otherwise) = otherwise {
                walk_stmt_exprs(otherwise, f);
            }
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
        } => {
            if let Some(init) = init {
                walk_stmt_exprs(init, f);
            }
            if let Some(cond) = cond {
                walk_expr(cond, f);
            }
            if let Some(step) = step {
                walk_expr(step, f);
            }
            walk_stmt_exprs(body, f);
        }
        Stmt::While { cond, body } => {
            walk_expr(cond, f);
            walk_stmt_exprs(body, f);
        }
        Stmt::Return(Some(expr)) => walk_expr(expr, f),
        Stmt::Decl(decl) => walk_decl_exprs(decl, f),
        Stmt::Expr(expr) => walk_expr(expr, f),
        Stmt::Return(None) | Stmt::Break | Stmt::Continue | Stmt::Discard | Stmt::Empty => {}
    }
}

fn walk_decl_exprs(decl: &mut Declaration, f: &mut impl FnMut(&mut Expr)) {
    for declarator in &mut decl.declarators {
        if let Some(init) = &mut declarator.init {
            walk_expr(init, f);
        }
    }
}

/// Visit an expression and all of its children, mutably, pre-order.
pub fn walk_expr(expr: &mut Expr, f: &mut impl FnMut(&mut Expr)) {
    f(expr);

    match expr {
        Expr::Unary { expr, .. } | Expr::PostIncDec { expr, .. } | Expr::Paren(expr) => {
            walk_expr(expr, f)
        }
        Expr::Binary { left, right, .. } | Expr::Assign { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(cond, f);
            walk_expr(then, f);
            walk_expr(otherwise, f);
        }
        Expr::Call { callee, args } => {
            walk_expr(callee, f);
            for arg in args {
                walk_expr(arg, f);
            }
        }
        Expr::Index { base, index } => {
            walk_expr(base, f);
            walk_expr(index, f);
        }
        Expr::Member { base, .. } => walk_expr(base, f),
        Expr::Ident(_) | Expr::Float(_) | Expr::Int(_) | Expr::Bool(_) => {}
    }
}

/// Replace every reference to `name` with the given rendered text.
///
/// The text lands verbatim in an identifier slot, reproducing plain textual
/// substitution when the tree is rendered back out.
pub fn substitute_ident(unit: &mut TranslationUnit, name: &str, text: &str) {
    walk_unit_exprs(unit, &mut |expr| {
        if matches!(expr, Expr::Ident(ident) if ident == name) {
            *expr = Expr::Ident(text.to_owned());
        }
    });
}

/// Same substitution over a bare expression tree.
pub fn substitute_ident_expr(root: &mut Expr, name: &str, text: &str) {
    walk_expr(root, &mut |expr| {
        if matches!(expr, Expr::Ident(ident) if ident == name) {
            *expr = Expr::Ident(text.to_owned());
        }
    });
}

#[cfg(test)]
mod test {
    use super::super::parse::parse_program;
    use super::*;

    #[test]
    fn substitution_reaches_nested_expressions() {
        let mut unit = parse_program(
            "void main() { if (x > 0.0) { y = f(x) + x; } }",
        )
        .unwrap();

        substitute_ident(&mut unit, "x", "vec4(1.0)");

        let text = unit.to_string();
        assert!(!text.contains("(x"), "unexpected bare `x` left in {text}");
        assert!(text.contains("f(vec4(1.0)) + vec4(1.0)"));
    }
}
