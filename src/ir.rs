//! Typed OpenCL-C kernel dialect
//!
//! A small statement/expression tree for the device dialect the
//! generator targets, with a dedicated printer. Kernel source is
//! built as structured repetition over typed index ranges instead of
//! textual placeholder substitution, so a fragment can never collide
//! with another fragment's substitution target.
//!
//! The tree covers exactly what the beamforming kernel family needs:
//! unsigned index arithmetic, float vector accumulators, `__local`
//! tiles, work-item builtins, counted loops and barriers. It is not a
//! general OpenCL frontend.

use std::fmt::Write;

// ============================================================================
// Types
// ============================================================================

/// Element datatype of the samples/output buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dtype {
    #[default]
    F32,
    F64,
}

impl Dtype {
    pub fn name(&self) -> &'static str {
        match self {
            Dtype::F32 => "float",
            Dtype::F64 => "double",
        }
    }
}

/// OpenCL types used by the kernel dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClType {
    Uint,
    /// `float2`: one complex weight. Weights are single precision
    /// regardless of the sample datatype.
    Float2,
    /// `<dtype>4`: one dual-polarization complex element.
    Vec4(Dtype),
}

impl ClType {
    fn name(&self) -> String {
        match self {
            ClType::Uint => "unsigned int".to_string(),
            ClType::Float2 => "float2".to_string(),
            ClType::Vec4(dt) => format!("{}4", dt.name()),
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Vector lane selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    X,
    Y,
    Z,
    W,
}

impl Lane {
    fn name(&self) -> &'static str {
        match self {
            Lane::X => "x",
            Lane::Y => "y",
            Lane::Z => "z",
            Lane::W => "w",
        }
    }
}

/// Work-item builtin functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    GroupId(u8),
    LocalId(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Lt,
}

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Lt => "<",
        }
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Uint(usize),
    /// Float literal, printed with an `f` suffix.
    Float(f32),
    Var(String),
    /// Lane access, `expr.x`.
    Swizzle(Box<Expr>, Lane),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Array element, `name[index]`.
    Index(String, Box<Expr>),
    /// `get_group_id(d)` / `get_local_id(d)`.
    WorkItem(WorkItem),
    /// Zero-initialized vector literal, `(float4)(0.0f)`.
    VecSplat(ClType, f32),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn swizzle(self, lane: Lane) -> Expr {
        Expr::Swizzle(Box::new(self), lane)
    }

    pub fn index(name: impl Into<String>, at: Expr) -> Expr {
        Expr::Index(name.into(), Box::new(at))
    }
}

fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

pub fn add(lhs: Expr, rhs: Expr) -> Expr {
    bin(BinOp::Add, lhs, rhs)
}

pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
    bin(BinOp::Sub, lhs, rhs)
}

pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
    bin(BinOp::Mul, lhs, rhs)
}

/// Left-folded sum of one or more terms.
pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Expr {
    let mut it = terms.into_iter();
    let first = it.next().expect("sum of zero terms");
    it.fold(first, add)
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `ty name = init;` (or a bare declaration).
    Decl {
        ty: ClType,
        name: String,
        init: Option<Expr>,
    },
    /// `__local ty name[len];`
    LocalDecl { ty: ClType, name: String, len: usize },
    Assign { target: Expr, value: Expr },
    AddAssign { target: Expr, value: Expr },
    MulAssign { target: Expr, value: Expr },
    /// `for (unsigned int var = 0; var < bound; var++) { body }`
    For {
        var: String,
        bound: Expr,
        body: Vec<Stmt>,
    },
    If { cond: Expr, body: Vec<Stmt> },
    /// `barrier(CLK_LOCAL_MEM_FENCE);`
    Barrier,
}

// ============================================================================
// Kernel definition
// ============================================================================

/// One `__global` pointer parameter of a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelParam {
    pub name: String,
    pub ty: ClType,
    /// Read-only parameters are declared `const ... restrict const`.
    pub read_only: bool,
}

/// A complete kernel function.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelDef {
    pub name: String,
    pub params: Vec<KernelParam>,
    pub body: Vec<Stmt>,
}

impl KernelDef {
    /// Print the kernel to OpenCL-C source text. Deterministic:
    /// identical trees print to byte-identical text.
    pub fn source(&self) -> String {
        let mut printer = ClPrinter::new();
        printer.kernel(self);
        printer.finish()
    }
}

// ============================================================================
// Printer
// ============================================================================

struct ClPrinter {
    output: String,
    indent: usize,
}

impl ClPrinter {
    fn new() -> Self {
        Self {
            output: String::new(),
            indent: 0,
        }
    }

    fn finish(self) -> String {
        self.output
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.output.push_str("  ");
        }
        self.output.push_str(text);
        self.output.push('\n');
    }

    fn kernel(&mut self, kernel: &KernelDef) {
        let params: Vec<String> = kernel
            .params
            .iter()
            .map(|p| {
                if p.read_only {
                    format!("__global const {} * restrict const {}", p.ty.name(), p.name)
                } else {
                    format!("__global {} * restrict const {}", p.ty.name(), p.name)
                }
            })
            .collect();
        self.line(&format!(
            "__kernel void {}({}) {{",
            kernel.name,
            params.join(", ")
        ));
        self.indent += 1;
        for stmt in &kernel.body {
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Decl { ty, name, init } => match init {
                Some(expr) => {
                    let text = format!("{} {} = {};", ty.name(), name, print_expr(expr));
                    self.line(&text);
                }
                None => self.line(&format!("{} {};", ty.name(), name)),
            },
            Stmt::LocalDecl { ty, name, len } => {
                self.line(&format!("__local {} {}[{}];", ty.name(), name, len));
            }
            Stmt::Assign { target, value } => {
                self.line(&format!("{} = {};", print_expr(target), print_expr(value)));
            }
            Stmt::AddAssign { target, value } => {
                self.line(&format!("{} += {};", print_expr(target), print_expr(value)));
            }
            Stmt::MulAssign { target, value } => {
                self.line(&format!("{} *= {};", print_expr(target), print_expr(value)));
            }
            Stmt::For { var, bound, body } => {
                self.line(&format!(
                    "for (unsigned int {var} = 0; {var} < {}; {var}++) {{",
                    print_expr(bound)
                ));
                self.indent += 1;
                for s in body {
                    self.stmt(s);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::If { cond, body } => {
                self.line(&format!("if ({}) {{", print_expr(cond)));
                self.indent += 1;
                for s in body {
                    self.stmt(s);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Barrier => self.line("barrier(CLK_LOCAL_MEM_FENCE);"),
        }
    }
}

fn print_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Uint(v) => {
            write!(out, "{}", v).unwrap();
        }
        Expr::Float(v) => {
            write!(out, "{}", float_literal(*v)).unwrap();
        }
        Expr::Var(name) => out.push_str(name),
        Expr::Swizzle(base, lane) => {
            write_expr(out, base);
            out.push('.');
            out.push_str(lane.name());
        }
        Expr::Binary(op, lhs, rhs) => {
            out.push('(');
            write_expr(out, lhs);
            write!(out, " {} ", op.symbol()).unwrap();
            write_expr(out, rhs);
            out.push(')');
        }
        Expr::Index(name, at) => {
            out.push_str(name);
            out.push('[');
            write_expr(out, at);
            out.push(']');
        }
        Expr::WorkItem(item) => match item {
            WorkItem::GroupId(d) => {
                write!(out, "get_group_id({})", d).unwrap();
            }
            WorkItem::LocalId(d) => {
                write!(out, "get_local_id({})", d).unwrap();
            }
        },
        Expr::VecSplat(ty, v) => {
            write!(out, "({})({})", ty.name(), float_literal(*v)).unwrap();
        }
    }
}

/// Print a float with an explicit `f` suffix, `1.0f` style.
fn float_literal(v: f32) -> String {
    let text = format!("{}", v);
    if text.contains('.') || text.contains('e') {
        format!("{}f", text)
    } else {
        format!("{}.0f", text)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_literal_suffix() {
        assert_eq!(float_literal(1.0), "1.0f");
        assert_eq!(float_literal(0.25), "0.25f");
        assert_eq!(float_literal(1.0 / 64.0), "0.015625f");
    }

    #[test]
    fn test_expr_printing() {
        let e = add(
            mul(Expr::WorkItem(WorkItem::GroupId(0)), Expr::Uint(128)),
            Expr::WorkItem(WorkItem::LocalId(0)),
        );
        assert_eq!(print_expr(&e), "((get_group_id(0) * 128) + get_local_id(0))");

        let e = Expr::index("weights", Expr::var("item")).swizzle(Lane::X);
        assert_eq!(print_expr(&e), "weights[item].x");
    }

    #[test]
    fn test_sum_folds_left() {
        let e = sum([Expr::var("a"), Expr::var("b"), Expr::var("c")]);
        assert_eq!(print_expr(&e), "((a + b) + c)");
    }

    #[test]
    fn test_kernel_printing() {
        let kernel = KernelDef {
            name: "probe".to_string(),
            params: vec![
                KernelParam {
                    name: "samples".to_string(),
                    ty: ClType::Vec4(Dtype::F32),
                    read_only: true,
                },
                KernelParam {
                    name: "output".to_string(),
                    ty: ClType::Vec4(Dtype::F32),
                    read_only: false,
                },
            ],
            body: vec![
                Stmt::Decl {
                    ty: ClType::Uint,
                    name: "sample".to_string(),
                    init: Some(Expr::WorkItem(WorkItem::LocalId(0))),
                },
                Stmt::Barrier,
                Stmt::Assign {
                    target: Expr::index("output", Expr::var("sample")),
                    value: Expr::index("samples", Expr::var("sample")),
                },
            ],
        };
        let source = kernel.source();
        assert!(source.starts_with("__kernel void probe("));
        assert!(source.contains("__global const float4 * restrict const samples"));
        assert!(source.contains("__global float4 * restrict const output"));
        assert!(source.contains("unsigned int sample = get_local_id(0);"));
        assert!(source.contains("barrier(CLK_LOCAL_MEM_FENCE);"));
        assert!(source.trim_end().ends_with('}'));
    }

    #[test]
    fn test_printing_is_deterministic() {
        let kernel = KernelDef {
            name: "k".to_string(),
            params: vec![],
            body: vec![Stmt::For {
                var: "station".to_string(),
                bound: Expr::Uint(64),
                body: vec![Stmt::Barrier],
            }],
        };
        assert_eq!(kernel.source(), kernel.source());
    }
}
