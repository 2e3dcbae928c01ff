//! The command DSL: a small language for navigating and mutating a
//! live tree, used both for `default_with_init` programs baked into a
//! catalog and for interactive/scripted edits against an
//! [`crate::instance::Instance`].
mod command;
pub mod exec;
mod lexer;

pub use command::{parse_command, Action, Command, ElementCmd, Subaction};
pub use exec::run_against;
pub use lexer::tokenize;
