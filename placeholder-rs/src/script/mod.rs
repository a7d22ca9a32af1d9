//! Template language: parsing and evaluation.
//!
//! A template is parsed once into an AST ([`stmt::Template`]) and evaluated
//! any number of times against an [`EvalContext`].
//!
//! | Module | Role |
//! |--------|------|
//! | [`value`] | typed runtime values and the operators over them |
//! | [`expr`] | lexer, expression AST and expression evaluation |
//! | [`stmt`] | template AST and the text/macro/if-block parser |
//! | [`context`] | layered symbol lookup, variable reads and writes |
//! | [`builtins`] | `min`, `random`, `digits`, `interpolate_table`, … |
//! | [`expand`] | legacy `[name]` bracket expansion |
//! | [`interp`] | statement execution and the two evaluation modes |
//!
//! # Quick start
//!
//! ```rust
//! use placeholder::config::{DefinitionTable, DynamicConfig};
//! use placeholder::script::{render, EvalContext, Template};
//!
//! let mut cfg = DynamicConfig::new();
//! cfg.set("layer_height", 0.2);
//! let defs = DefinitionTable::new();
//! let template = Template::parse("Z{layer_height * 2}").unwrap();
//! let mut ctx = EvalContext::new(&cfg, &defs);
//! assert_eq!(render(&template, &mut ctx).unwrap(), "Z0.4");
//! ```

pub mod builtins;
pub mod context;
pub mod expand;
pub mod expr;
pub mod interp;
pub mod stmt;
pub mod value;

pub use context::{ContextData, EvalContext};
pub use expr::MAX_NESTING;
pub use interp::{decide, render};
pub use stmt::Template;
pub use value::Value;
