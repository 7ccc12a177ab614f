//! Abstract syntax tree for kinescript programs.
//!
//! The lexer/parser front end is an external collaborator: it hands the core a
//! tree of these nodes, each tagged with a source location for diagnostics.
//! The tree is plain serde data so hosts can also ship pre-parsed programs as
//! JSON (the CLI does exactly that).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A position in program source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPosition {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// A region of program source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    /// First position covered by the node.
    pub start: TextPosition,
    /// Position one past the node.
    pub end: TextPosition,
}

impl TextRange {
    /// Zero-width range at the given line/column, for hand-built trees.
    pub fn at(line: u32, column: u32) -> Self {
        let position = TextPosition { line, column };
        Self {
            start: position,
            end: position,
        }
    }
}

/// A parsed program: the root block of statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Top-level statements.
    pub body: Block,
}

impl Program {
    /// Deserialize a program from its JSON form.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize the program to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// A group of statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Statements in execution order.
    pub statements: Vec<Stmt>,
}

impl Block {
    /// Build a block from a statement list.
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

/// A statement with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// What the statement does.
    pub kind: StmtKind,
    /// Where it came from.
    pub location: TextRange,
}

impl Stmt {
    /// Wrap a kind with an unknown location (hand-built trees, tests).
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            location: TextRange::default(),
        }
    }

    /// Wrap a kind with an explicit location.
    pub fn at(kind: StmtKind, location: TextRange) -> Self {
        Self { kind, location }
    }
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfArm {
    /// Guard expression.
    pub condition: Expr,
    /// Body executed when the guard holds.
    pub body: Block,
}

/// One `case` arm of a `switch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Expression compared against the scrutinee.
    pub matches: Expr,
    /// Body executed on a match.
    pub body: Block,
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    /// Plain identifier.
    Name(String),
    /// Comma-list of identifiers destructuring an array by position.
    Tuple(Vec<String>),
    /// `[target | source] = pose` writes a frame relation, not a variable.
    Relation {
        /// Target frame identifier.
        target: String,
        /// Source frame identifier.
        source: String,
    },
}

/// Path shape connecting the previous pose to a move target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Connector {
    /// Joint-interpolated point-to-point motion (the default).
    #[default]
    PointToPoint,
    /// Straight line in Cartesian space.
    Line,
    /// Circular arc through an intermediate pose.
    Arc {
        /// Intermediate pose the arc passes through.
        via: Expr,
    },
}

/// A single modifier application, e.g. `velocity(250)` or `tcp("gripper")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierCall {
    /// Modifier name: `velocity`, `blending`, or `tcp`.
    pub name: String,
    /// The pushed value.
    pub value: Expr,
}

/// A `move` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveStmt {
    /// Path shape; `p2p` when the program names none.
    #[serde(default)]
    pub connector: Connector,
    /// Target pose expression, resolved when the statement executes.
    pub target: Expr,
    /// Optional explicit tool frame expression.
    #[serde(default)]
    pub tcp: Option<Expr>,
    /// Optional `[target | source]` anchoring the move in a frame relation.
    #[serde(default)]
    pub frame_relation: Option<(String, String)>,
    /// Trailing `with modifier, ...` applied to this move only.
    #[serde(default)]
    pub modifiers: Vec<ModifierCall>,
}

/// One `do with <controller>:` arm of a robot context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoArm {
    /// Controller the arm is bound to.
    pub controller: Expr,
    /// Statements executed on that controller's branch.
    pub body: Block,
}

/// A script-defined function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,
    /// Parameter names, bound by value at call time.
    pub params: Vec<String>,
    /// Function body.
    pub body: Block,
}

/// An `interrupt <name>() when <condition>(args...):` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptDef {
    /// Interrupt name, used by `activate`/`deactivate`.
    pub name: String,
    /// Name of the predicate called to test the trigger.
    pub condition: String,
    /// Predicate arguments, evaluated once at declaration time.
    pub args: Vec<Expr>,
    /// Handler body run when the interrupt fires.
    pub body: Block,
}

/// Statement kinds, 1:1 with the grammar constructs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// Assignment to a name, tuple of names, or frame relation.
    Assign {
        /// Assignment target.
        target: AssignTarget,
        /// Value expression.
        value: Expr,
    },
    /// `if`/`elif`/`else`.
    If {
        /// The `if` arm followed by any `elif` arms.
        arms: Vec<IfArm>,
        /// Optional `else` body.
        else_body: Option<Block>,
    },
    /// `while condition:`.
    While {
        /// Loop guard.
        condition: Expr,
        /// Loop body.
        body: Block,
    },
    /// `for name = start..end:` (`..<` excludes the end value).
    For {
        /// Loop variable.
        name: String,
        /// Range start (inclusive).
        start: Expr,
        /// Range end.
        end: Expr,
        /// Whether the end is exclusive (`..<`).
        exclusive: bool,
        /// Loop body.
        body: Block,
    },
    /// `repeat count:`.
    Repeat {
        /// Iteration count.
        count: Expr,
        /// Loop body.
        body: Block,
    },
    /// `switch`/`case`/`default`.
    Switch {
        /// Value each case is compared against.
        scrutinee: Expr,
        /// Case arms in order.
        cases: Vec<SwitchCase>,
        /// Optional `default` body.
        default: Option<Block>,
    },
    /// `break` out of the innermost loop.
    Break,
    /// `pass`, a no-op.
    Pass,
    /// `return` with an optional value.
    Return {
        /// Returned expression, `Null` when absent.
        value: Option<Expr>,
    },
    /// `raise <message>`: a user-defined error.
    Raise {
        /// Error message expression.
        message: Expr,
    },
    /// `print <expr>`.
    Print {
        /// Printed expression.
        value: Expr,
    },
    /// `wait <milliseconds>`.
    Wait {
        /// Wait duration in milliseconds.
        duration: Expr,
    },
    /// Function definition; binds a closure in the current scope.
    FunctionDef(Arc<FunctionDef>),
    /// Interrupt declaration; registers an inactive monitor.
    InterruptDef(Arc<InterruptDef>),
    /// `activate <name>` / `deactivate <name>`.
    SwitchInterrupt {
        /// Interrupt name.
        name: String,
        /// `true` for `activate`.
        enable: bool,
    },
    /// `with modifier, ...:` dynamic-scoped modifier block.
    With {
        /// Pushed modifiers.
        modifiers: Vec<ModifierCall>,
        /// Block observing the pushed values.
        body: Block,
    },
    /// `move ... to ...`.
    Move(MoveStmt),
    /// `do with R: ... and do with R2: ...` with an implicit trailing sync.
    RobotContext {
        /// Sibling branches, started together and joined at the barrier.
        arms: Vec<DoArm>,
    },
    /// `do: ... sync: ... except: ...` — any part may be absent; a bare
    /// `sync` is this node with all bodies empty.
    Sync {
        /// Statements run before the barrier.
        do_body: Option<Block>,
        /// Statements run after a successful flush.
        sync_body: Option<Block>,
        /// Handler for errors raised by this sync's flush.
        handler: Option<Block>,
    },
    /// `write(device, key, value)`.
    Write {
        /// Device expression.
        device: Expr,
        /// Key expression.
        key: Expr,
        /// Written value.
        value: Expr,
    },
    /// Expression in statement position (typically a call).
    Expr(Expr),
}

/// An expression with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// What the expression computes.
    pub kind: ExprKind,
    /// Where it came from.
    pub location: TextRange,
}

impl Expr {
    /// Wrap a kind with an unknown location (hand-built trees, tests).
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            location: TextRange::default(),
        }
    }

    /// Number literal.
    pub fn number(value: f64) -> Self {
        Self::new(ExprKind::Number(value))
    }

    /// Boolean literal.
    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Bool(value))
    }

    /// String literal.
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ExprKind::Str(value.into()))
    }

    /// Identifier reference.
    pub fn ident(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Ident(name.into()))
    }

    /// Pose/position tuple literal `(a, b, c[, d, e, f])`.
    pub fn tuple(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::Tuple(items))
    }

    /// Convenience: six-component pose literal from numbers.
    pub fn pose(components: [f64; 6]) -> Self {
        Self::tuple(components.iter().map(|c| Expr::number(*c)).collect())
    }

    /// Array literal.
    pub fn array(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::Array(items))
    }

    /// Record literal.
    pub fn record(entries: Vec<(String, Expr)>) -> Self {
        Self::new(ExprKind::Record(entries))
    }

    /// Function call.
    pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            callee: callee.into(),
            args,
        })
    }

    /// Binary operation.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Unary operation.
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// Index access `object[index]`.
    pub fn index(object: Expr, index: Expr) -> Self {
        Self::new(ExprKind::Index {
            object: Box::new(object),
            index: Box::new(index),
        })
    }

    /// Field access `object.name`.
    pub fn field(object: Expr, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Field {
            object: Box::new(object),
            name: name.into(),
        })
    }

    /// Frame relation `[target | source]` in expression position.
    pub fn relation(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(ExprKind::Relation {
            target: target.into(),
            source: source.into(),
        })
    }

    /// `read(device, key)`.
    pub fn read(device: Expr, key: Expr) -> Self {
        Self::new(ExprKind::Read {
            device: Box::new(device),
            key: Box::new(key),
        })
    }

    /// `call(device, key, args...)`.
    pub fn device_call(device: Expr, key: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::DeviceCall {
            device: Box::new(device),
            key: Box::new(key),
            args,
        })
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical negation.
    Not,
    /// Pose inversion `~p`.
    Invert,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `::` rigid-transform composition.
    Compose,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `and`
    And,
    /// `or`
    Or,
}

/// Expression kinds, 1:1 with the grammar constructs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Floating-point number literal.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// String literal.
    Str(String),
    /// Tuple literal: 3 components denote a position (zero orientation),
    /// 6 components a full pose.
    Tuple(Vec<Expr>),
    /// Array literal.
    Array(Vec<Expr>),
    /// Record literal; insertion order is preserved.
    Record(Vec<(String, Expr)>),
    /// Identifier reference.
    Ident(String),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Call of a script function, host function, or builtin by name.
    Call {
        /// Callee name, resolved script-first then host registry.
        callee: String,
        /// Argument expressions.
        args: Vec<Expr>,
    },
    /// Index access `object[index]`.
    Index {
        /// Indexed value.
        object: Box<Expr>,
        /// Index expression (number for arrays, string for records).
        index: Box<Expr>,
    },
    /// Field access `object.name`.
    Field {
        /// Accessed value.
        object: Box<Expr>,
        /// Field name.
        name: String,
    },
    /// Frame relation `[target | source]` read from the frame store.
    Relation {
        /// Target frame identifier.
        target: String,
        /// Source frame identifier.
        source: String,
    },
    /// `read(device, key)` — reads device state; robot pose reads force an
    /// implicit queue flush first.
    Read {
        /// Device expression.
        device: Box<Expr>,
        /// Key expression.
        key: Box<Expr>,
    },
    /// `call(device, key, args...)` — invokes a device-side operation.
    DeviceCall {
        /// Device expression.
        device: Box<Expr>,
        /// Operation key.
        key: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
}
