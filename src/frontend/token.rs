use std::ops::{Index, IndexMut};
use std::sync::Arc;

use crate::bytecode::ir::Function;
use crate::frontend::globals::{Identifier, name_hash};
use crate::lang::data_type::DataType;
use crate::lang::operators::Operator;
use crate::lang::variable::Variable;

// =============================================================================
// TOKENS - arena of tagged nodes for one statement
// =============================================================================

/// Index of a token inside a [`TokenArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u32);

impl TokenId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Flat sequence of sibling tokens. Passes rewrite it in place.
pub type TokenList = Vec<TokenId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParenthesisType {
    Parenthesis,
    Bracket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Function,
    Global,
    Constant,
    Define,
    Declare,
    Return,
    Call,
    Jump,
    Break,
    Continue,
    If,
    Else,
    While,
    For,
    Addressof,
}

impl Keyword {
    pub fn from_name(name: &str) -> Option<Keyword> {
        Some(match name {
            "function" => Keyword::Function,
            "global" => Keyword::Global,
            "constant" => Keyword::Constant,
            "define" => Keyword::Define,
            "declare" => Keyword::Declare,
            "return" => Keyword::Return,
            "call" => Keyword::Call,
            "jump" => Keyword::Jump,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "addressof" => Keyword::Addressof,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum TokenKind {
    // Plain tokens, as produced by the lexer
    Keyword(Keyword),
    VarType,
    Operator(Operator),
    Label(String),
    Identifier {
        name: String,
        hash: u64,
        resolved: Option<Identifier>,
    },
    CommaSeparated(Vec<TokenList>),

    // Statements
    Constant(i64),
    Parenthesis {
        kind: ParenthesisType,
        content: TokenList,
    },
    UnaryOperation {
        op: Operator,
        argument: TokenId,
    },
    BinaryOperation {
        op: Operator,
        left: TokenId,
        right: TokenId,
        /// Set when the operation is carried out by a function call.
        function: Option<Arc<Function>>,
    },
    Variable(Arc<Variable>),
    FunctionCall {
        function: Option<Arc<Function>>,
        parameters: Vec<TokenId>,
        is_base_call: bool,
    },
    MemoryAccess {
        address: TokenId,
    },
    ValueCast {
        argument: TokenId,
    },
}

impl TokenKind {
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::Constant(_)
                | TokenKind::Parenthesis { .. }
                | TokenKind::UnaryOperation { .. }
                | TokenKind::BinaryOperation { .. }
                | TokenKind::Variable(_)
                | TokenKind::FunctionCall { .. }
                | TokenKind::MemoryAccess { .. }
                | TokenKind::ValueCast { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Keyword(_) => "keyword",
            TokenKind::VarType => "var type",
            TokenKind::Operator(_) => "operator",
            TokenKind::Label(_) => "label",
            TokenKind::Identifier { .. } => "identifier",
            TokenKind::CommaSeparated(_) => "comma separated list",
            TokenKind::Constant(_) => "constant",
            TokenKind::Parenthesis { .. } => "parenthesis",
            TokenKind::UnaryOperation { .. } => "unary operation",
            TokenKind::BinaryOperation { .. } => "binary operation",
            TokenKind::Variable(_) => "variable",
            TokenKind::FunctionCall { .. } => "function call",
            TokenKind::MemoryAccess { .. } => "memory access",
            TokenKind::ValueCast { .. } => "value cast",
        }
    }
}

/// One node. `data_type` is the var type for `VarType` tokens and the
/// statement's type for statements; it is `Void` everywhere else.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub data_type: DataType,
}

impl Token {
    pub fn new(kind: TokenKind, data_type: DataType) -> Self {
        Self { kind, data_type }
    }

    pub fn keyword(keyword: Keyword) -> Self {
        Self::new(TokenKind::Keyword(keyword), DataType::Void)
    }

    pub fn var_type(data_type: DataType) -> Self {
        Self::new(TokenKind::VarType, data_type)
    }

    pub fn operator(op: Operator) -> Self {
        Self::new(TokenKind::Operator(op), DataType::Void)
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::new(TokenKind::Label(name.into()), DataType::Void)
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        let name = name.into();
        let hash = name_hash(&name);
        Self::new(
            TokenKind::Identifier {
                name,
                hash,
                resolved: None,
            },
            DataType::Void,
        )
    }

    pub fn constant(value: i64, data_type: DataType) -> Self {
        Self::new(TokenKind::Constant(value), data_type)
    }

    pub fn variable(variable: Arc<Variable>) -> Self {
        let data_type = variable.data_type();
        Self::new(TokenKind::Variable(variable), data_type)
    }

    pub fn is_statement(&self) -> bool {
        self.kind.is_statement()
    }

    pub fn is_operator(&self, op: Operator) -> bool {
        matches!(self.kind, TokenKind::Operator(o) if o == op)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.kind, TokenKind::Keyword(k) if k == keyword)
    }

    pub fn is_parenthesis(&self, kind: ParenthesisType) -> bool {
        matches!(self.kind, TokenKind::Parenthesis { kind: k, .. } if k == kind)
    }
}

/// Owner of all tokens of one statement. Nodes are never freed; replacing a
/// token in a list just points the list at a new node.
#[derive(Debug, Default)]
pub struct TokenArena {
    tokens: Vec<Token>,
}

impl TokenArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Token) -> TokenId {
        let id = TokenId(self.tokens.len() as u32);
        self.tokens.push(token);
        id
    }

    /// Pushes every token and returns the list of their ids.
    pub fn push_all(&mut self, tokens: impl IntoIterator<Item = Token>) -> TokenList {
        tokens.into_iter().map(|t| self.push(t)).collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn kind(&self, id: TokenId) -> &TokenKind {
        &self.tokens[id.index()].kind
    }

    pub fn data_type(&self, id: TokenId) -> DataType {
        self.tokens[id.index()].data_type
    }

    pub fn is_statement(&self, id: TokenId) -> bool {
        self[id].is_statement()
    }

    pub fn constant_value(&self, id: TokenId) -> Option<i64> {
        match self.kind(id) {
            TokenKind::Constant(value) => Some(*value),
            _ => None,
        }
    }
}

impl Index<TokenId> for TokenArena {
    type Output = Token;

    fn index(&self, id: TokenId) -> &Token {
        &self.tokens[id.index()]
    }
}

impl IndexMut<TokenId> for TokenArena {
    fn index_mut(&mut self, id: TokenId) -> &mut Token {
        &mut self.tokens[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_returns_sequential_ids() {
        let mut arena = TokenArena::new();
        let a = arena.push(Token::operator(Operator::BinaryPlus));
        let b = arena.push(Token::constant(3, DataType::ConstInt));
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.constant_value(b), Some(3));
        assert_eq!(arena.constant_value(a), None);
    }

    #[test]
    fn test_statement_classification() {
        assert!(Token::constant(1, DataType::U8).is_statement());
        assert!(!Token::operator(Operator::BinaryPlus).is_statement());
        assert!(!Token::identifier("x").is_statement());
        assert!(!Token::var_type(DataType::U8).is_statement());
    }

    #[test]
    fn test_identifier_hashes_name() {
        let token = Token::identifier("counter");
        match token.kind {
            TokenKind::Identifier { name, hash, resolved } => {
                assert_eq!(name, "counter");
                assert_eq!(hash, name_hash("counter"));
                assert!(resolved.is_none());
            }
            _ => panic!("expected identifier"),
        }
    }

    #[test]
    fn test_predicates() {
        assert!(Token::operator(Operator::Colon).is_operator(Operator::Colon));
        assert!(!Token::operator(Operator::Colon).is_operator(Operator::QuestionMark));
        assert!(Token::keyword(Keyword::Addressof).is_keyword(Keyword::Addressof));
        let paren = Token::new(
            TokenKind::Parenthesis {
                kind: ParenthesisType::Bracket,
                content: Vec::new(),
            },
            DataType::Void,
        );
        assert!(paren.is_parenthesis(ParenthesisType::Bracket));
        assert!(!paren.is_parenthesis(ParenthesisType::Parenthesis));
    }

    #[test]
    fn test_keyword_names() {
        assert_eq!(Keyword::from_name("addressof"), Some(Keyword::Addressof));
        assert_eq!(Keyword::from_name("function"), Some(Keyword::Function));
        assert_eq!(Keyword::from_name("u8"), None);
    }
}
