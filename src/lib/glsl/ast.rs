//! Typed GLSL syntax tree and its text renderer.
//!
//! The tree is a plain tagged union: splice points are re-resolved by key or
//! occurrence index rather than held as parent back-pointers, so mutating one
//! site never invalidates another.

use std::fmt::{self, Display, Formatter, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
/// Precision qualifier, ordered by precision.
pub enum PrecisionQual {
    Lowp,
    Mediump,
    Highp,
}

impl Display for PrecisionQual {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrecisionQual::Lowp => "lowp",
            PrecisionQual::Mediump => "mediump",
            PrecisionQual::Highp => "highp",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Storage qualifier, including the legacy pre-300 forms.
pub enum StorageQual {
    Uniform,
    Attribute,
    Varying,
    In,
    Out,
    Inout,
}

impl Display for StorageQual {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageQual::Uniform => "uniform",
            StorageQual::Attribute => "attribute",
            StorageQual::Varying => "varying",
            StorageQual::In => "in",
            StorageQual::Out => "out",
            StorageQual::Inout => "inout",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Any qualifier that may precede a declaration.
pub enum Qualifier {
    /// `layout(...)` with its raw argument text.
    Layout(String),
    Storage(StorageQual),
    Precision(PrecisionQual),
    /// Interpolation qualifier kept as raw text (`flat`, `smooth`, ...).
    Interp(String),
    Const,
    Invariant,
}

impl Display for Qualifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Layout(args) => write!(f, "layout({args})"),
            Qualifier::Storage(qual) => qual.fmt(f),
            Qualifier::Precision(qual) => qual.fmt(f),
            Qualifier::Interp(text) => f.write_str(text),
            Qualifier::Const => f.write_str("const"),
            Qualifier::Invariant => f.write_str("invariant"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Type name with an optional array suffix on the type itself.
pub struct TypeSpec {
    pub name: String,
    /// Rendered array size, `Some("")` for an unsized `[]`.
    pub array: Option<String>,
}

impl TypeSpec {
    /// Plain named type without array suffix.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            array: None,
        }
    }
}

impl Display for TypeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(size) = &self.array {
            write!(f, "[{size}]")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Single declared name inside a declaration statement.
pub struct Declarator {
    pub name: String,
    /// Rendered array size, `Some("")` for an unsized `[]`.
    pub array: Option<String>,
    pub init: Option<Expr>,
}

impl Declarator {
    /// Bare named declarator.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            array: None,
            init: None,
        }
    }
}

impl Display for Declarator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(size) = &self.array {
            write!(f, "[{size}]")?;
        }
        if let Some(init) = &self.init {
            write!(f, " = {init}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Declaration statement: qualifiers, a type and one or more declarators.
pub struct Declaration {
    pub qualifiers: Vec<Qualifier>,
    pub ty: TypeSpec,
    pub declarators: Vec<Declarator>,
}

impl Declaration {
    /// Whether any qualifier is the given storage qualifier.
    pub fn has_storage(&self, qual: StorageQual) -> bool {
        self.qualifiers
            .iter()
            .any(|q| matches!(q, Qualifier::Storage(s) if *s == qual))
    }
}

impl Display for Declaration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for qual in &self.qualifiers {
            write!(f, "{qual} ")?;
        }
        write!(f, "{} ", self.ty)?;
        let names = self
            .declarators
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{names};")
    }
}

#[derive(Clone, Debug, PartialEq)]
/// `struct Name { ... }` with an optional trailing instance name.
pub struct StructDef {
    pub name: String,
    pub members: Vec<Declaration>,
    pub instance: Option<String>,
}

impl Display for StructDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "struct {} {{", self.name)?;
        for member in &self.members {
            writeln!(f, "    {member}")?;
        }
        f.write_char('}')?;
        if let Some(instance) = &self.instance {
            write!(f, " {instance}")?;
        }
        f.write_char(';')
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Interface block declaration, e.g. `uniform Light0 { vec4 y; } x;`.
pub struct InterfaceBlock {
    pub qualifiers: Vec<Qualifier>,
    /// Block type name.
    pub name: String,
    pub members: Vec<Declaration>,
    pub instance: Option<String>,
    /// Array suffix on the instance name.
    pub array: Option<String>,
}

impl InterfaceBlock {
    /// Whether any qualifier is the given storage qualifier.
    pub fn has_storage(&self, qual: StorageQual) -> bool {
        self.qualifiers
            .iter()
            .any(|q| matches!(q, Qualifier::Storage(s) if *s == qual))
    }
}

impl Display for InterfaceBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for qual in &self.qualifiers {
            write!(f, "{qual} ")?;
        }
        writeln!(f, "{} {{", self.name)?;
        for member in &self.members {
            writeln!(f, "    {member}")?;
        }
        f.write_char('}')?;
        if let Some(instance) = &self.instance {
            write!(f, " {instance}")?;
            if let Some(size) = &self.array {
                write!(f, "[{size}]")?;
            }
        }
        f.write_char(';')
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Function parameter.
pub struct Param {
    pub qualifiers: Vec<Qualifier>,
    pub ty: TypeSpec,
    /// Nameless parameters (`void`, prototypes) carry `None`.
    pub name: Option<String>,
    pub array: Option<String>,
}

impl Display for Param {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for qual in &self.qualifiers {
            write!(f, "{qual} ")?;
        }
        self.ty.fmt(f)?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
            if let Some(size) = &self.array {
                write!(f, "[{size}]")?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Function definition with its body.
pub struct FunctionDef {
    pub qualifiers: Vec<Qualifier>,
    pub ret: TypeSpec,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

impl Display for FunctionDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for qual in &self.qualifiers {
            write!(f, "{qual} ")?;
        }
        let params = self
            .params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "{} {}({params}) {{", self.ret, self.name)?;
        for stmt in &self.body {
            stmt.write_indented(f, 1)?;
        }
        f.write_char('}')
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Top-level item of a translation unit.
pub enum ExternalItem {
    /// Raw preprocessor line, `#version` included.
    Directive(String),
    /// `precision <qual> <type>;`
    Precision {
        qual: PrecisionQual,
        ty: String,
    },
    Struct(StructDef),
    /// `layout(...) <storage>;` default statement.
    LayoutDefault {
        layout: String,
        storage: StorageQual,
    },
    Block(InterfaceBlock),
    Declaration(Declaration),
    Function(FunctionDef),
}

impl Display for ExternalItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExternalItem::Directive(line) => f.write_str(line),
            ExternalItem::Precision { qual, ty } => write!(f, "precision {qual} {ty};"),
            ExternalItem::Struct(def) => def.fmt(f),
            ExternalItem::LayoutDefault { layout, storage } => {
                write!(f, "layout({layout}) {storage};")
            }
            ExternalItem::Block(block) => block.fmt(f),
            ExternalItem::Declaration(decl) => decl.fmt(f),
            ExternalItem::Function(func) => func.fmt(f),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
/// A whole parsed GLSL program.
pub struct TranslationUnit {
    pub items: Vec<ExternalItem>,
}

impl TranslationUnit {
    /// Find a function definition by name.
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.items.iter().find_map(|item| match item {
            ExternalItem::Function(func) if func.name == name => Some(func),
            _ => None,
        })
    }

    /// Find a function definition by name, mutably.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut FunctionDef> {
        self.items.iter_mut().find_map(|item| match item {
            ExternalItem::Function(func) if func.name == name => Some(func),
            _ => None,
        })
    }
}

impl Display for TranslationUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Statement.
pub enum Stmt {
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Discard,
    Decl(Declaration),
    Expr(Expr),
    Empty,
}

impl Stmt {
    pub(crate) fn write_indented(&self, f: &mut Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "    ".repeat(indent);
        match self {
            Stmt::Block(stmts) => {
                writeln!(f, "{pad}{{")?;
                for stmt in stmts {
                    stmt.write_indented(f, indent + 1)?;
                }
                writeln!(f, "{pad}}}")
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                writeln!(f, "{pad}if ({cond})")?;
                then.write_indented(f, indent + 1)?;
                if let Some(otherwise) = otherwise {
                    writeln!(f, "{pad}else")?;
                    otherwise.write_indented(f, indent + 1)?;
                }
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                let init = init
                    .as_ref()
                    .map(|stmt| stmt.to_string())
                    .unwrap_or_else(|| ";".to_owned());
                let cond = cond.as_ref().map(ToString::to_string).unwrap_or_default();
                let step = step.as_ref().map(ToString::to_string).unwrap_or_default();
                writeln!(f, "{pad}for ({init} {cond}; {step})")?;
                body.write_indented(f, indent + 1)
            }
            Stmt::While { cond, body } => {
                writeln!(f, "{pad}while ({cond})")?;
                body.write_indented(f, indent + 1)
            }
            Stmt::Return(Some(expr)) => writeln!(f, "{pad}return {expr};"),
            Stmt::Return(None) => writeln!(f, "{pad}return;"),
            Stmt::Break => writeln!(f, "{pad}break;"),
            Stmt::Continue => writeln!(f, "{pad}continue;"),
            Stmt::Discard => writeln!(f, "{pad}discard;"),
            Stmt::Decl(decl) => writeln!(f, "{pad}{decl}"),
            Stmt::Expr(expr) => writeln!(f, "{pad}{expr};"),
            Stmt::Empty => writeln!(f, "{pad};"),
        }
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Single-line form, used for `for` initializers.
        match self {
            Stmt::Decl(decl) => decl.fmt(f),
            Stmt::Expr(expr) => write!(f, "{expr};"),
            Stmt::Empty => f.write_char(';'),
            other => {
                // Multi-line statements flatten to one line here.
                struct Indented<'a>(&'a Stmt);
                impl Display for Indented<'_> {
                    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                        self.0.write_indented(f, 0)
                    }
                }

                let flattened = Indented(other)
                    .to_string()
                    .lines()
                    .map(str::trim)
                    .collect::<Vec<_>>()
                    .join(" ");
                f.write_str(&flattened)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Expression.
pub enum Expr {
    /// Identifier, also the carrier for textual substitution: a filler's
    /// rendered text is written into the identifier verbatim.
    Ident(String),
    /// Float literal in its original lexical form.
    Float(String),
    /// Integer literal in its original lexical form.
    Int(String),
    Bool(bool),
    Unary {
        op: String,
        expr: Box<Expr>,
    },
    /// Postfix `++`/`--`.
    PostIncDec {
        op: String,
        expr: Box<Expr>,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Function or constructor call.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// Member or swizzle access.
    Member {
        base: Box<Expr>,
        field: String,
    },
    Paren(Box<Expr>),
}

impl Expr {
    /// Identifier expression.
    pub fn ident(name: &str) -> Self {
        Self::Ident(name.to_owned())
    }

    /// Zero-argument call to a named function.
    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::Call {
            callee: Box::new(Self::ident(name)),
            args,
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => f.write_str(name),
            Expr::Float(text) | Expr::Int(text) => f.write_str(text),
            Expr::Bool(value) => write!(f, "{value}"),
            Expr::Unary { op, expr } => write!(f, "{op}{expr}"),
            Expr::PostIncDec { op, expr } => write!(f, "{expr}{op}"),
            Expr::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::Assign { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => write!(f, "{cond} ? {then} : {otherwise}"),
            Expr::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{callee}({args})")
            }
            Expr::Index { base, index } => write!(f, "{base}[{index}]"),
            Expr::Member { base, field } => write!(f, "{base}.{field}"),
            Expr::Paren(inner) => write!(f, "({inner})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Parsed form of one node's source, matching its configured parse mode.
pub enum ShaderAst {
    /// Full translation unit.
    Program(TranslationUnit),
    /// Single bare expression (combinator nodes).
    Expression(Expr),
}

impl ShaderAst {
    /// The contained translation unit, if this is a full program.
    pub fn program(&self) -> Option<&TranslationUnit> {
        match self {
            ShaderAst::Program(unit) => Some(unit),
            ShaderAst::Expression(_) => None,
        }
    }

    /// The contained translation unit, mutably.
    pub fn program_mut(&mut self) -> Option<&mut TranslationUnit> {
        match self {
            ShaderAst::Program(unit) => Some(unit),
            ShaderAst::Expression(_) => None,
        }
    }
}

impl Display for ShaderAst {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ShaderAst::Program(unit) => unit.fmt(f),
            ShaderAst::Expression(expr) => expr.fmt(f),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multi_line_statements_flatten_in_single_line_position() {
        let stmt = Stmt::Block(vec![Stmt::Break, Stmt::Continue]);
        assert_eq!(stmt.to_string(), "{ break; continue; }");
    }

    #[test]
    fn control_flow_renders_as_glsl_in_single_line_position() {
        let stmt = Stmt::If {
            cond: Expr::ident("lit"),
            then: Box::new(Stmt::Discard),
            otherwise: None,
        };
        assert_eq!(stmt.to_string(), "if (lit) discard;");
    }
}
