pub mod bytecode;
pub mod config;
pub mod frontend;
pub mod lang;
