use std::fmt::Write;

use crate::frontend::globals::Identifier;
use crate::frontend::token::{ParenthesisType, TokenArena, TokenId, TokenKind};

/// Prints processed statement trees, one node per line.
pub struct TokenDumper {
    pub color: bool,
    pub show_types: bool, // if false, data types are left out
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_types: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn without_types(mut self) -> Self {
        self.show_types = false;
        self
    }

    pub fn dump(&self, arena: &TokenArena, tokens: &[TokenId]) {
        print!("{}", self.dump_to_string(arena, tokens));
    }

    pub fn dump_to_string(&self, arena: &TokenArena, tokens: &[TokenId]) -> String {
        let mut out = String::new();
        for &id in tokens {
            self.write_node(&mut out, arena, id, 0);
        }
        out
    }

    fn write_node(&self, out: &mut String, arena: &TokenArena, id: TokenId, depth: usize) {
        let token = &arena[id];
        let (colr, reset) = if self.color {
            (self.color(&token.kind), Self::RESET)
        } else {
            ("", "")
        };

        let _ = write!(out, "{:indent$}{}{:<8}{} {}", "", colr, self.kind(&token.kind), reset, self.detail(&token.kind), indent = depth * 2);
        if self.show_types && token.is_statement() {
            let _ = write!(out, " : {}", token.data_type);
        }
        out.push('\n');

        match &token.kind {
            TokenKind::Parenthesis { content, .. } => {
                for &child in content {
                    self.write_node(out, arena, child, depth + 1);
                }
            }
            TokenKind::CommaSeparated(lists) => {
                for list in lists {
                    for &child in list {
                        self.write_node(out, arena, child, depth + 1);
                    }
                }
            }
            TokenKind::UnaryOperation { argument, .. } | TokenKind::ValueCast { argument } => {
                self.write_node(out, arena, *argument, depth + 1);
            }
            TokenKind::BinaryOperation { left, right, .. } => {
                self.write_node(out, arena, *left, depth + 1);
                self.write_node(out, arena, *right, depth + 1);
            }
            TokenKind::FunctionCall { parameters, .. } => {
                for &child in parameters {
                    self.write_node(out, arena, child, depth + 1);
                }
            }
            TokenKind::MemoryAccess { address } => {
                self.write_node(out, arena, *address, depth + 1);
            }
            _ => {}
        }
    }

    fn detail(&self, kind: &TokenKind) -> String {
        match kind {
            TokenKind::Keyword(k) => format!("{:?}", k).to_lowercase(),
            TokenKind::VarType => String::new(),
            TokenKind::Operator(op) => op.symbol().to_string(),
            TokenKind::Label(name) => format!("{}:", name),
            TokenKind::Identifier { name, resolved, .. } => match resolved {
                Some(Identifier::Variable(_)) => format!("{} (variable)", name),
                Some(Identifier::Constant(_)) => format!("{} (constant)", name),
                Some(Identifier::ConstantArray(_)) => format!("{} (constant array)", name),
                Some(Identifier::Define(_)) => format!("{} (define)", name),
                Some(Identifier::DataType(t)) => format!("{} (type {})", name, t),
                None => name.clone(),
            },
            TokenKind::CommaSeparated(lists) => format!("{} entries", lists.len()),
            TokenKind::Constant(value) => value.to_string(),
            TokenKind::Parenthesis { kind, .. } => match kind {
                ParenthesisType::Parenthesis => "()".to_string(),
                ParenthesisType::Bracket => "[]".to_string(),
            },
            TokenKind::UnaryOperation { op, .. } | TokenKind::BinaryOperation { op, .. } => op.symbol().to_string(),
            TokenKind::Variable(v) => v.name().to_string(),
            TokenKind::FunctionCall { function, is_base_call, .. } => {
                let name = function.as_ref().map_or("<none>", |f| f.name.as_str());
                if *is_base_call {
                    format!("base.{}", name)
                } else {
                    name.to_string()
                }
            }
            TokenKind::MemoryAccess { .. } | TokenKind::ValueCast { .. } => String::new(),
        }
    }

    fn kind(&self, kind: &TokenKind) -> &'static str {
        use TokenKind::*;
        match kind {
            // plain tokens
            Keyword(_) => "KEYWORD",
            VarType => "TYPE",
            Operator(_) => "OP",
            Label(_) => "LABEL",
            Identifier { .. } => "IDENT",
            CommaSeparated(_) => "LIST",

            // statements
            Constant(_) => "CONST",
            Parenthesis { .. } => "PAREN",
            UnaryOperation { .. } => "UNARY",
            BinaryOperation { .. } => "BINARY",
            Variable(_) => "VAR",
            FunctionCall { .. } => "CALL",
            MemoryAccess { .. } => "MEMORY",
            ValueCast { .. } => "CAST",
        }
    }

    fn color(&self, kind: &TokenKind) -> &'static str {
        use TokenKind::*;
        match kind {
            Keyword(_) | Label(_) => Self::DIM,
            Constant(_) => Self::CYN,
            Identifier { .. } | Variable(_) => Self::YEL,
            FunctionCall { .. } => Self::GRN,
            Operator(_) | UnaryOperation { .. } | BinaryOperation { .. } => Self::MAG,
            _ => Self::RESET,
        }
    }
}
