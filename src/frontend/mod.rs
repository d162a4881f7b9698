//! # Lemonscript statement frontend
//!
//! A statement arrives as a flat list of lexer tokens. The token processor
//! resolves symbols against the [`globals::GlobalsLookup`] seam, nests
//! parentheses, reduces operators and assigns data types, leaving one typed
//! statement tree per list for the opcode emitter.
//!
//! ## Conventions
//!
//! - All tokens of a statement live in one [`token::TokenArena`]; lists hold
//!   [`token::TokenId`]s and passes replace entries instead of mutating nodes.
//! - Errors abort the statement and carry its line number.

pub mod globals;
pub mod token;
pub mod token_dumper;
pub mod token_processing;

pub use token::{Token, TokenArena, TokenId, TokenKind, TokenList};
pub use token_processing::{Context, TokenProcessor};
