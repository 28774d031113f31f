use std::fmt;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Let { name: String, value: Expression },
    Return { value: Expression },
    Expression { expression: Expression },
}

/// Brace-delimited statement list; the body of functions and `if` arms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Array(Vec<Expression>),
    /// Pairs in source order; duplicate keys resolve at evaluation time.
    Hash(Vec<(Expression, Expression)>),
    Prefix {
        operator: PrefixOperator,
        right: Box<Expression>,
    },
    Infix {
        left: Box<Expression>,
        operator: InfixOperator,
        right: Box<Expression>,
    },
    If {
        condition: Box<Expression>,
        consequence: Block,
        alternative: Option<Block>,
    },
    Function {
        /// Binding name when the literal is the right-hand side of a
        /// `let`; lets a compiled function call itself.
        name: Option<String>,
        parameters: Vec<String>,
        body: Block,
    },
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Index {
        left: Box<Expression>,
        index: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOperator {
    Minus,
    Bang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOperator {
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    Eq,
    NotEq,
}

impl fmt::Display for PrefixOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixOperator::Minus => f.write_str("-"),
            PrefixOperator::Bang => f.write_str("!"),
        }
    }
}

impl fmt::Display for InfixOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            InfixOperator::Plus => "+",
            InfixOperator::Minus => "-",
            InfixOperator::Star => "*",
            InfixOperator::Slash => "/",
            InfixOperator::Lt => "<",
            InfixOperator::Gt => ">",
            InfixOperator::Eq => "==",
            InfixOperator::NotEq => "!=",
        };
        f.write_str(symbol)
    }
}

// Display prints source that parses back to the same tree: infix and
// index expressions are parenthesized, statements keep their semicolons
// and string literals their quotes.

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{statement}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Let { name, value } => write!(f, "let {name} = {value};"),
            Statement::Return { value } => write!(f, "return {value};"),
            Statement::Expression { expression } => write!(f, "{expression};"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{statement}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Identifier(name) => f.write_str(name),
            Expression::Integer(value) => write!(f, "{value}"),
            Expression::Float(value) => write!(f, "{value:?}"),
            Expression::Boolean(value) => write!(f, "{value}"),
            Expression::String(value) => write!(f, "\"{value}\""),
            Expression::Array(elements) => {
                write!(f, "[{}]", join(elements))
            }
            Expression::Hash(pairs) => {
                let rendered = pairs
                    .iter()
                    .map(|(key, value)| format!("{key}: {value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{rendered}}}")
            }
            Expression::Prefix { operator, right } => write!(f, "({operator}{right})"),
            Expression::Infix {
                left,
                operator,
                right,
            } => write!(f, "({left} {operator} {right})"),
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                write!(f, "if ({condition}) {{ {consequence} }}")?;
                if let Some(alternative) = alternative {
                    write!(f, " else {{ {alternative} }}")?;
                }
                Ok(())
            }
            Expression::Function {
                parameters, body, ..
            } => {
                write!(f, "fn({}) {{ {body} }}", parameters.join(", "))
            }
            Expression::Call {
                function,
                arguments,
            } => {
                write!(f, "{function}({})", join(arguments))
            }
            Expression::Index { left, index } => write!(f, "({left}[{index}])"),
        }
    }
}

fn join(expressions: &[Expression]) -> String {
    expressions
        .iter()
        .map(Expression::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
