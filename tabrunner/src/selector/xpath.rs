//! XPath 1.0 evaluation over a [`Document`].
//!
//! Covers location paths on every axis except `namespace`, predicates with
//! proper per-step positions, filter expressions such as `(//li)[2]`, unions,
//! comparisons, `+`/`-` arithmetic and the core string and node-set functions.
//! Expressions must evaluate to a set of elements; `text()` and attribute
//! steps are only valid inside predicates or as the final step of a
//! sub-expression that gets compared.

use crate::document::{Document, ElementHandle};
use crate::errors::AutomationError;

/// Elements selected by `expr`, in document order.
pub fn select(doc: &Document, expr: &str) -> Result<Vec<ElementHandle>, AutomationError> {
    let ast = Parser::new(tokenize(expr)?).parse()?;
    let eval = Evaluator { doc };
    let context = Context {
        node: Node::Root,
        position: 1,
        size: 1,
    };
    match eval.eval(&ast, &context)? {
        Value::Nodes(nodes) => Ok(nodes
            .into_iter()
            .filter_map(|n| match n {
                Node::Element(i) => Some(ElementHandle(i)),
                Node::Root => None,
            })
            .collect()),
        _ => Err(invalid(format!("'{expr}' does not select elements"))),
    }
}

/// Deepest expression nesting the parser accepts. Parentheses, predicates,
/// function arguments and operator chains each add a level.
pub const MAX_XPATH_DEPTH: usize = 64;

fn invalid(msg: impl Into<String>) -> AutomationError {
    AutomationError::InvalidLocator(msg.into())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Star,
    Plus,
    Minus,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    DoubleColon,
    Literal(String),
    Number(f64),
    Name(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, AutomationError> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                out.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                out.push(Token::Slash);
                i += 1;
            }
            '.' if next == Some('.') => {
                out.push(Token::DotDot);
                i += 2;
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (n, len) = read_number(&chars[i..]);
                out.push(Token::Number(n));
                i += len;
            }
            '.' => {
                out.push(Token::Dot);
                i += 1;
            }
            '!' if next == Some('=') => {
                out.push(Token::Neq);
                i += 2;
            }
            '<' if next == Some('=') => {
                out.push(Token::Le);
                i += 2;
            }
            '>' if next == Some('=') => {
                out.push(Token::Ge);
                i += 2;
            }
            ':' if next == Some(':') => {
                out.push(Token::DoubleColon);
                i += 2;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == c)
                    .ok_or_else(|| invalid(format!("unterminated string literal in '{input}'")))?;
                out.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() => {
                let (n, len) = read_number(&chars[i..]);
                out.push(Token::Number(n));
                i += len;
            }
            c if c.is_alphabetic() || c == '_' => {
                let len = chars[i..]
                    .iter()
                    .take_while(|ch| ch.is_alphanumeric() || **ch == '-' || **ch == '_')
                    .count();
                out.push(Token::Name(chars[i..i + len].iter().collect()));
                i += len;
            }
            _ => {
                let token = match c {
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '@' => Token::At,
                    ',' => Token::Comma,
                    '|' => Token::Pipe,
                    '*' => Token::Star,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '=' => Token::Eq,
                    '<' => Token::Lt,
                    '>' => Token::Gt,
                    other => {
                        return Err(invalid(format!(
                            "unexpected character '{other}' in '{input}'"
                        )))
                    }
                };
                out.push(token);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn read_number(chars: &[char]) -> (f64, usize) {
    let mut seen_dot = false;
    let len = chars
        .iter()
        .take_while(|c| {
            if **c == '.' && !seen_dot {
                seen_dot = true;
                true
            } else {
                c.is_ascii_digit()
            }
        })
        .count();
    let text: String = chars[..len].iter().collect();
    (text.parse().unwrap_or(f64::NAN), len)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Result<Self, AutomationError> {
        Ok(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "following" => Axis::Following,
            "preceding" => Axis::Preceding,
            "attribute" => Axis::Attribute,
            other => return Err(invalid(format!("unsupported axis '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Any,
    Node,
    Text,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }

    fn yields_strings(&self) -> bool {
        self.axis == Axis::Attribute || self.test == NodeTest::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    fn flip(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Function(String, Vec<Expr>),
    Path {
        absolute: bool,
        steps: Vec<Step>,
    },
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Expr, AutomationError> {
        if self.tokens.is_empty() {
            return Err(invalid("empty xpath expression"));
        }
        let expr = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(invalid(format!("unexpected token {token:?}")));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), AutomationError> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(invalid(format!("expected {expected:?}, found {t:?}"))),
            None => Err(invalid(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn descend(&mut self) -> Result<(), AutomationError> {
        self.depth += 1;
        if self.depth > MAX_XPATH_DEPTH {
            return Err(invalid(format!(
                "expression nests deeper than {MAX_XPATH_DEPTH} levels"
            )));
        }
        Ok(())
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == word)
    }

    fn parse_or(&mut self) -> Result<Expr, AutomationError> {
        let entry = self.depth;
        self.descend()?;
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.advance();
            self.descend()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, AutomationError> {
        let entry = self.depth;
        let mut left = self.parse_equality()?;
        while self.peek_keyword("and") {
            self.advance();
            self.descend()?;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, AutomationError> {
        let entry = self.depth;
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Neq) => CmpOp::Neq,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, AutomationError> {
        let entry = self.depth;
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Ge) => CmpOp::Ge,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, AutomationError> {
        let entry = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    self.descend()?;
                    let right = self.parse_unary()?;
                    left = Expr::Add(Box::new(left), Box::new(right));
                }
                Some(Token::Minus) => {
                    self.advance();
                    self.descend()?;
                    let right = self.parse_unary()?;
                    left = Expr::Sub(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, AutomationError> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let entry = self.depth;
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth = entry;
            return Ok(Expr::Negate(Box::new(operand)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr, AutomationError> {
        let entry = self.depth;
        let mut left = self.parse_path()?;
        while self.peek() == Some(&Token::Pipe) {
            self.advance();
            self.descend()?;
            let right = self.parse_path()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_path(&mut self) -> Result<Expr, AutomationError> {
        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                let steps = if self.can_start_step() {
                    self.parse_relative_steps()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                let mut steps = vec![Step::descendant_or_self()];
                steps.extend(self.parse_relative_steps()?);
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::LParen) | Some(Token::Literal(_)) | Some(Token::Number(_)) => {
                self.parse_filter()
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen) && !is_node_type(name) =>
            {
                self.parse_filter()
            }
            _ => Ok(Expr::Path {
                absolute: false,
                steps: self.parse_relative_steps()?,
            }),
        }
    }

    fn parse_filter(&mut self) -> Result<Expr, AutomationError> {
        let primary = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                steps = self.parse_relative_steps()?;
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                steps.push(Step::descendant_or_self());
                steps.extend(self.parse_relative_steps()?);
            }
            _ => {}
        }
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, AutomationError> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Name(name)) => {
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_or()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Function(name, args))
            }
            Some(t) => Err(invalid(format!("unexpected token {t:?}"))),
            None => Err(invalid("unexpected end of expression")),
        }
    }

    fn can_start_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_))
                | Some(Token::Star)
                | Some(Token::At)
                | Some(Token::Dot)
                | Some(Token::DotDot)
        )
    }

    fn parse_relative_steps(&mut self) -> Result<Vec<Step>, AutomationError> {
        let mut steps = vec![self.parse_step()?];
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(Step::descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => break,
            }
        }
        Ok(steps)
    }

    fn parse_step(&mut self) -> Result<Step, AutomationError> {
        let (axis, test) = match self.peek() {
            Some(Token::Dot) => {
                self.advance();
                (Axis::SelfAxis, NodeTest::Node)
            }
            Some(Token::DotDot) => {
                self.advance();
                (Axis::Parent, NodeTest::Node)
            }
            Some(Token::At) => {
                self.advance();
                (Axis::Attribute, self.parse_node_test()?)
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::DoubleColon) => {
                let axis = Axis::from_name(name)?;
                self.advance();
                self.advance();
                (axis, self.parse_node_test()?)
            }
            _ => (Axis::Child, self.parse_node_test()?),
        };
        let predicates = self.parse_predicates()?;
        let step = Step {
            axis,
            test,
            predicates,
        };
        if step.yields_strings() && !step.predicates.is_empty() {
            return Err(invalid(
                "predicates on text() or attribute steps are not supported",
            ));
        }
        Ok(step)
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, AutomationError> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name(name)) => {
                if is_node_type(&name) && self.peek() == Some(&Token::LParen) {
                    self.advance();
                    self.expect(Token::RParen)?;
                    return match name.as_str() {
                        "text" => Ok(NodeTest::Text),
                        "node" => Ok(NodeTest::Node),
                        other => Err(invalid(format!("unsupported node test {other}()"))),
                    };
                }
                Ok(NodeTest::Name(name.to_lowercase()))
            }
            Some(t) => Err(invalid(format!("expected a node test, found {t:?}"))),
            None => Err(invalid("expected a node test, found end of input")),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, AutomationError> {
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.advance();
            predicates.push(self.parse_or()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "text" | "node" | "comment" | "processing-instruction")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Node {
    Root,
    Element(usize),
}

#[derive(Debug, Clone)]
enum Value {
    Nodes(Vec<Node>),
    Strings(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
}

struct Context {
    node: Node,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    doc: &'a Document,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr, ctx: &Context) -> Result<Value, AutomationError> {
        match expr {
            Expr::Or(l, r) => Ok(Value::Bool(
                self.boolean(&self.eval(l, ctx)?) || self.boolean(&self.eval(r, ctx)?),
            )),
            Expr::And(l, r) => Ok(Value::Bool(
                self.boolean(&self.eval(l, ctx)?) && self.boolean(&self.eval(r, ctx)?),
            )),
            Expr::Compare(op, l, r) => {
                let left = self.eval(l, ctx)?;
                let right = self.eval(r, ctx)?;
                Ok(Value::Bool(self.compare(*op, &left, &right)))
            }
            Expr::Add(l, r) => Ok(Value::Num(
                self.number(&self.eval(l, ctx)?) + self.number(&self.eval(r, ctx)?),
            )),
            Expr::Sub(l, r) => Ok(Value::Num(
                self.number(&self.eval(l, ctx)?) - self.number(&self.eval(r, ctx)?),
            )),
            Expr::Negate(e) => Ok(Value::Num(-self.number(&self.eval(e, ctx)?))),
            Expr::Union(l, r) => match (self.eval(l, ctx)?, self.eval(r, ctx)?) {
                (Value::Nodes(mut a), Value::Nodes(b)) => {
                    a.extend(b);
                    a.sort();
                    a.dedup();
                    Ok(Value::Nodes(a))
                }
                _ => Err(invalid("union operands must be element sets")),
            },
            Expr::Literal(s) => Ok(Value::Str(s.clone())),
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Function(name, args) => self.call(name, args, ctx),
            Expr::Path { absolute, steps } => {
                let start = if *absolute { Node::Root } else { ctx.node };
                self.eval_steps(vec![start], steps)
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut nodes = match self.eval(primary, ctx)? {
                    Value::Nodes(nodes) => nodes,
                    _ => return Err(invalid("predicates can only filter element sets")),
                };
                for predicate in predicates {
                    nodes = self.apply_predicate(nodes, predicate)?;
                }
                self.eval_steps(nodes, steps)
            }
        }
    }

    fn eval_steps(&self, mut nodes: Vec<Node>, steps: &[Step]) -> Result<Value, AutomationError> {
        for (i, step) in steps.iter().enumerate() {
            if step.yields_strings() {
                if i + 1 != steps.len() {
                    return Err(invalid(
                        "text() and attribute steps must end the location path",
                    ));
                }
                let mut strings = Vec::new();
                for node in &nodes {
                    strings.extend(self.string_step(*node, step)?);
                }
                return Ok(Value::Strings(strings));
            }

            let mut next = Vec::new();
            for node in &nodes {
                let mut candidates: Vec<Node> = self
                    .axis(*node, step.axis)
                    .into_iter()
                    .filter(|n| self.matches(*n, &step.test))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.apply_predicate(candidates, predicate)?;
                }
                next.extend(candidates);
            }
            next.sort();
            next.dedup();
            nodes = next;
        }
        Ok(Value::Nodes(nodes))
    }

    fn apply_predicate(&self, nodes: Vec<Node>, predicate: &Expr) -> Result<Vec<Node>, AutomationError> {
        let size = nodes.len();
        let mut kept = Vec::new();
        for (i, node) in nodes.into_iter().enumerate() {
            let ctx = Context {
                node,
                position: i + 1,
                size,
            };
            let keep = match self.eval(predicate, &ctx)? {
                Value::Num(n) => n == (i + 1) as f64,
                other => self.boolean(&other),
            };
            if keep {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    fn string_step(&self, node: Node, step: &Step) -> Result<Vec<String>, AutomationError> {
        let element = match node {
            Node::Element(i) => Some(ElementHandle(i)),
            Node::Root => None,
        };

        if step.axis == Axis::Attribute {
            let Some(h) = element else {
                return Ok(Vec::new());
            };
            return Ok(match &step.test {
                NodeTest::Name(name) => self
                    .doc
                    .attr(h, name)
                    .map(|v| vec![v.to_string()])
                    .unwrap_or_default(),
                _ => self.doc.attrs(h).iter().map(|(_, v)| v.clone()).collect(),
            });
        }

        let own = |h: ElementHandle| -> Vec<String> {
            self.doc.own_text(h).into_iter().map(str::to_string).collect()
        };
        match step.axis {
            Axis::Child => Ok(element.map(own).unwrap_or_default()),
            Axis::Descendant | Axis::DescendantOrSelf => {
                let mut out = Vec::new();
                for n in self.axis(node, Axis::DescendantOrSelf) {
                    if let Node::Element(i) = n {
                        out.extend(own(ElementHandle(i)));
                    }
                }
                Ok(out)
            }
            Axis::SelfAxis => Ok(Vec::new()),
            other => Err(invalid(format!("text() is not supported on the {other:?} axis"))),
        }
    }

    fn axis(&self, node: Node, axis: Axis) -> Vec<Node> {
        let doc = self.doc;
        let elements = |hs: Vec<ElementHandle>| hs.into_iter().map(|h| Node::Element(h.0)).collect::<Vec<_>>();
        match (axis, node) {
            (Axis::SelfAxis, n) => vec![n],
            (Axis::Child, Node::Root) => doc.root().map(|h| vec![Node::Element(h.0)]).unwrap_or_default(),
            (Axis::Child, Node::Element(i)) => elements(doc.children(ElementHandle(i))),
            (Axis::Descendant, Node::Root) => (0..doc.len()).map(Node::Element).collect(),
            (Axis::Descendant, Node::Element(i)) => elements(doc.descendants(ElementHandle(i))),
            (Axis::DescendantOrSelf, n) => {
                let mut out = vec![n];
                out.extend(self.axis(n, Axis::Descendant));
                out
            }
            (Axis::Parent, Node::Root) => Vec::new(),
            (Axis::Parent, Node::Element(i)) => vec![doc
                .parent(ElementHandle(i))
                .map(|h| Node::Element(h.0))
                .unwrap_or(Node::Root)],
            (Axis::Ancestor, Node::Root) => Vec::new(),
            (Axis::Ancestor, Node::Element(i)) => {
                let mut out = elements(doc.ancestors(ElementHandle(i)));
                out.push(Node::Root);
                out
            }
            (Axis::AncestorOrSelf, n) => {
                let mut out = vec![n];
                out.extend(self.axis(n, Axis::Ancestor));
                out
            }
            (Axis::FollowingSibling | Axis::PrecedingSibling, Node::Root) => Vec::new(),
            (Axis::FollowingSibling, Node::Element(i)) => {
                let siblings = self.siblings(ElementHandle(i));
                siblings.into_iter().filter(|s| s.0 > i).map(|s| Node::Element(s.0)).collect()
            }
            (Axis::PrecedingSibling, Node::Element(i)) => {
                let siblings = self.siblings(ElementHandle(i));
                siblings
                    .into_iter()
                    .rev()
                    .filter(|s| s.0 < i)
                    .map(|s| Node::Element(s.0))
                    .collect()
            }
            (Axis::Following | Axis::Preceding, Node::Root) => Vec::new(),
            (Axis::Following, Node::Element(i)) => {
                let end = i + 1 + doc.descendants(ElementHandle(i)).len();
                (end..doc.len()).map(Node::Element).collect()
            }
            (Axis::Preceding, Node::Element(i)) => {
                let ancestors = doc.ancestors(ElementHandle(i));
                (0..i)
                    .rev()
                    .filter(|j| !ancestors.contains(&ElementHandle(*j)))
                    .map(Node::Element)
                    .collect()
            }
            // attribute nodes are handled by string_step
            (Axis::Attribute, _) => Vec::new(),
        }
    }

    fn siblings(&self, h: ElementHandle) -> Vec<ElementHandle> {
        match self.doc.parent(h) {
            Some(p) => self.doc.children(p),
            None => vec![h],
        }
    }

    fn matches(&self, node: Node, test: &NodeTest) -> bool {
        match (test, node) {
            (NodeTest::Node, _) => true,
            (NodeTest::Any, Node::Element(_)) => true,
            (NodeTest::Name(name), Node::Element(i)) => self.doc.tag(ElementHandle(i)) == name,
            _ => false,
        }
    }

    fn node_string(&self, node: Node) -> String {
        match node {
            Node::Element(i) => self.doc.text(ElementHandle(i)),
            Node::Root => self.doc.root().map(|h| self.doc.text(h)).unwrap_or_default(),
        }
    }

    fn string_set(&self, value: &Value) -> Option<Vec<String>> {
        match value {
            Value::Nodes(nodes) => Some(nodes.iter().map(|n| self.node_string(*n)).collect()),
            Value::Strings(strings) => Some(strings.clone()),
            _ => None,
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(nodes) => nodes.first().map(|n| self.node_string(*n)).unwrap_or_default(),
            Value::Strings(strings) => strings.first().cloned().unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => parse_number(&self.string(other)),
        }
    }

    fn boolean(&self, value: &Value) -> bool {
        match value {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Strings(strings) => !strings.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn compare(&self, op: CmpOp, left: &Value, right: &Value) -> bool {
        match (self.string_set(left), self.string_set(right)) {
            (Some(ls), Some(rs)) => ls
                .iter()
                .any(|l| rs.iter().any(|r| compare_strings(op, l, r))),
            (Some(ls), None) => match right {
                Value::Bool(b) => compare_bools(op, !ls.is_empty(), *b),
                Value::Num(n) => ls.iter().any(|l| compare_numbers(op, parse_number(l), *n)),
                other => {
                    let r = self.string(other);
                    ls.iter().any(|l| compare_strings(op, l, &r))
                }
            },
            (None, Some(_)) => self.compare(op.flip(), right, left),
            (None, None) => match op {
                CmpOp::Eq | CmpOp::Neq => {
                    if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
                        compare_bools(op, self.boolean(left), self.boolean(right))
                    } else if matches!(left, Value::Num(_)) || matches!(right, Value::Num(_)) {
                        compare_numbers(op, self.number(left), self.number(right))
                    } else {
                        compare_strings(op, &self.string(left), &self.string(right))
                    }
                }
                _ => compare_numbers(op, self.number(left), self.number(right)),
            },
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: &Context) -> Result<Value, AutomationError> {
        let arity = |min: usize, max: usize| -> Result<(), AutomationError> {
            if args.len() < min || args.len() > max {
                Err(invalid(format!(
                    "{name}() takes {min}..={max} arguments, got {}",
                    args.len()
                )))
            } else {
                Ok(())
            }
        };
        let arg_string = |i: usize| -> Result<String, AutomationError> {
            match args.get(i) {
                Some(e) => Ok(self.string(&self.eval(e, ctx)?)),
                None => Ok(self.node_string(ctx.node)),
            }
        };

        match name {
            "position" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.position as f64))
            }
            "last" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.size as f64))
            }
            "count" => {
                arity(1, 1)?;
                match self.eval(&args[0], ctx)? {
                    Value::Nodes(n) => Ok(Value::Num(n.len() as f64)),
                    Value::Strings(s) => Ok(Value::Num(s.len() as f64)),
                    _ => Err(invalid("count() expects a node-set")),
                }
            }
            "string" => {
                arity(0, 1)?;
                Ok(Value::Str(arg_string(0)?))
            }
            "concat" => {
                if args.len() < 2 {
                    return Err(invalid("concat() takes at least 2 arguments"));
                }
                let mut out = String::new();
                for i in 0..args.len() {
                    out.push_str(&arg_string(i)?);
                }
                Ok(Value::Str(out))
            }
            "contains" => {
                arity(2, 2)?;
                Ok(Value::Bool(arg_string(0)?.contains(&arg_string(1)?)))
            }
            "starts-with" => {
                arity(2, 2)?;
                Ok(Value::Bool(arg_string(0)?.starts_with(&arg_string(1)?)))
            }
            "ends-with" => {
                arity(2, 2)?;
                Ok(Value::Bool(arg_string(0)?.ends_with(&arg_string(1)?)))
            }
            "substring-before" => {
                arity(2, 2)?;
                let (s, pat) = (arg_string(0)?, arg_string(1)?);
                Ok(Value::Str(
                    s.find(&pat).map(|i| s[..i].to_string()).unwrap_or_default(),
                ))
            }
            "substring-after" => {
                arity(2, 2)?;
                let (s, pat) = (arg_string(0)?, arg_string(1)?);
                Ok(Value::Str(
                    s.find(&pat)
                        .map(|i| s[i + pat.len()..].to_string())
                        .unwrap_or_default(),
                ))
            }
            "normalize-space" => {
                arity(0, 1)?;
                Ok(Value::Str(normalize_space(&arg_string(0)?)))
            }
            "string-length" => {
                arity(0, 1)?;
                Ok(Value::Num(arg_string(0)?.chars().count() as f64))
            }
            "translate" => {
                arity(3, 3)?;
                let (s, from, to) = (arg_string(0)?, arg_string(1)?, arg_string(2)?);
                let from: Vec<char> = from.chars().collect();
                let to: Vec<char> = to.chars().collect();
                let out = s
                    .chars()
                    .filter_map(|c| match from.iter().position(|f| *f == c) {
                        Some(i) => to.get(i).copied(),
                        None => Some(c),
                    })
                    .collect();
                Ok(Value::Str(out))
            }
            "not" => {
                arity(1, 1)?;
                Ok(Value::Bool(!self.boolean(&self.eval(&args[0], ctx)?)))
            }
            "boolean" => {
                arity(1, 1)?;
                Ok(Value::Bool(self.boolean(&self.eval(&args[0], ctx)?)))
            }
            "number" => {
                arity(0, 1)?;
                match args.first() {
                    Some(e) => Ok(Value::Num(self.number(&self.eval(e, ctx)?))),
                    None => Ok(Value::Num(parse_number(&self.node_string(ctx.node)))),
                }
            }
            "true" => {
                arity(0, 0)?;
                Ok(Value::Bool(true))
            }
            "false" => {
                arity(0, 0)?;
                Ok(Value::Bool(false))
            }
            "name" | "local-name" => {
                arity(0, 1)?;
                let node = match args.first() {
                    Some(e) => match self.eval(e, ctx)? {
                        Value::Nodes(n) => n.first().copied(),
                        _ => return Err(invalid(format!("{name}() expects a node-set"))),
                    },
                    None => Some(ctx.node),
                };
                Ok(Value::Str(match node {
                    Some(Node::Element(i)) => self.doc.tag(ElementHandle(i)).to_string(),
                    _ => String::new(),
                }))
            }
            other => Err(invalid(format!("unsupported function {other}()"))),
        }
    }
}

pub fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_finite() && n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn compare_strings(op: CmpOp, l: &str, r: &str) -> bool {
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Neq => l != r,
        _ => compare_numbers(op, parse_number(l), parse_number(r)),
    }
}

fn compare_numbers(op: CmpOp, l: f64, r: f64) -> bool {
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Neq => l != r,
        CmpOp::Lt => l < r,
        CmpOp::Gt => l > r,
        CmpOp::Le => l <= r,
        CmpOp::Ge => l >= r,
    }
}

fn compare_bools(op: CmpOp, l: bool, r: bool) -> bool {
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Neq => l != r,
        _ => compare_numbers(op, l as u8 as f64, r as u8 as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <ul id="menu">
          <li class="item">Home</li>
          <li class="item">  About   us </li>
          <li class="item"><a href="/c">Contact</a></li>
        </ul>
        <ul id="other"><li>First</li><li>Second</li></ul>
        <form><input name="q" placeholder="Search"><button type="submit">Go</button></form>
        </body></html>"#;

    fn texts(doc: &Document, handles: &[ElementHandle]) -> Vec<String> {
        handles.iter().map(|h| normalize_space(&doc.text(*h))).collect()
    }

    #[test]
    fn test_descendant_position_is_per_parent() {
        let doc = Document::parse(PAGE);
        let found = select(&doc, "//li[1]").unwrap();
        assert_eq!(texts(&doc, &found), vec!["Home", "First"]);
    }

    #[test]
    fn test_parenthesised_position_is_global() {
        let doc = Document::parse(PAGE);
        let found = select(&doc, "(//li)[4]").unwrap();
        assert_eq!(texts(&doc, &found), vec!["First"]);
        let last = select(&doc, "(//li)[last()]").unwrap();
        assert_eq!(texts(&doc, &last), vec!["Second"]);
    }

    #[test]
    fn test_attribute_and_text_predicates() {
        let doc = Document::parse(PAGE);
        assert_eq!(select(&doc, "//ul[@id='other']/li").unwrap().len(), 2);
        assert_eq!(select(&doc, "//input[@name]").unwrap().len(), 1);
        let about = select(&doc, "//li[normalize-space()='About us']").unwrap();
        assert_eq!(about.len(), 1);
        let contains = select(&doc, "//li[contains(text(),'About')]").unwrap();
        assert_eq!(contains, about);
        assert!(select(&doc, "//li[text()='Contact']").unwrap().is_empty());
        assert_eq!(select(&doc, "//a[text()='Contact']").unwrap().len(), 1);
    }

    #[test]
    fn test_boolean_and_functions() {
        let doc = Document::parse(PAGE);
        assert_eq!(
            select(&doc, "//li[@class='item' and not(a)]").unwrap().len(),
            2
        );
        assert_eq!(
            select(&doc, "//*[starts-with(@placeholder, 'Sea') or @type=\"submit\"]")
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            select(&doc, "//li[string-length(normalize-space()) > 5]")
                .unwrap()
                .len(),
            3
        );
        assert_eq!(select(&doc, "//ul[count(li) = 3]").unwrap().len(), 1);
        assert_eq!(
            select(&doc, "//li[position() = last() - 1]").unwrap().len(),
            2
        );
    }

    #[test]
    fn test_axes() {
        let doc = Document::parse(PAGE);
        let parent = select(&doc, "//a/..").unwrap();
        assert_eq!(texts(&doc, &parent), vec!["Contact"]);
        let ul = select(&doc, "//a/ancestor::ul").unwrap();
        assert_eq!(doc.attr(ul[0], "id"), Some("menu"));
        let next = select(&doc, "//li[1]/following-sibling::li[1]").unwrap();
        assert_eq!(texts(&doc, &next), vec!["About us", "Second"]);
        let prev = select(&doc, "//button/preceding-sibling::*").unwrap();
        assert_eq!(doc.tag(prev[0]), "input");
        assert_eq!(select(&doc, "/html/body/form/input").unwrap().len(), 1);
        assert_eq!(select(&doc, "//ul | //form").unwrap().len(), 3);
    }

    #[test]
    fn test_literals_with_both_quote_styles() {
        let doc = Document::parse(r#"<html><body><p>It's "here"</p></body></html>"#);
        let expr = r#"//p[normalize-space()=concat('It', "'", 's "here"')]"#;
        assert_eq!(select(&doc, expr).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_expressions_are_invalid_locators() {
        let doc = Document::parse(PAGE);
        for expr in ["", "//li[", "//li[@id='x]", "//li/text()", "//bogus::li", "//li[foo()]"] {
            assert!(
                matches!(select(&doc, expr), Err(AutomationError::InvalidLocator(_))),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn test_nesting_beyond_the_limit_is_rejected() {
        let doc = Document::parse(PAGE);
        let nested = |depth: usize| format!("{}//li{}", "(".repeat(depth), ")".repeat(depth));

        assert_eq!(select(&doc, &nested(MAX_XPATH_DEPTH - 1)).unwrap().len(), 5);
        for depth in [MAX_XPATH_DEPTH + 1, 400, 2000] {
            assert!(matches!(
                select(&doc, &nested(depth)),
                Err(AutomationError::InvalidLocator(_))
            ));
        }

        let negations = format!("//li[{}1]", "-".repeat(5000));
        assert!(matches!(
            select(&doc, &negations),
            Err(AutomationError::InvalidLocator(_))
        ));
        let chain = vec!["//li"; 5000].join(" | ");
        assert!(matches!(
            select(&doc, &chain),
            Err(AutomationError::InvalidLocator(_))
        ));
        let predicates = format!("//ul{}{}", "[li".repeat(300), "]".repeat(300));
        assert!(matches!(
            select(&doc, &predicates),
            Err(AutomationError::InvalidLocator(_))
        ));
    }
}
