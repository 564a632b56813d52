//! # Kiln Abstract Syntax Tree
//!
//! This module defines the Abstract Syntax Tree (AST) for the Kiln language
//! and its runtime values. The AST is produced by the parser and consumed by
//! the tree-walking interpreter or the bytecode compiler.
//!
//! ## Documentation conventions
//!
//! - Source forms are written as they appear in a `.kl` file, e.g. `var x = 1`.
//! - "Truthy" means anything except `nil` and `false`.

pub mod node;
pub mod program;
pub mod value;
