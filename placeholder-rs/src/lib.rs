//! Placeholder and macro expansion for slicer G-code templates.
//!
//! Templates mix literal G-code with `{…}` code blocks and legacy `[name]`
//! references that are resolved against layered configuration dictionaries:
//!
//! ```text
//! M104 S{first_layer_temperature[0]} ; [filament_type]
//! {if layer_num == 0}G92 E0{endif}
//! ```
//!
//! | Module | Role |
//! |--------|------|
//! | [`option`] | typed configuration values (`ConfigOption`) |
//! | [`config`] | option dictionaries and option metadata |
//! | [`pattern`] | regular expressions for `=~` and `one_of` |
//! | [`diagnostic`] | error kinds, spans and formatted diagnostics |
//! | [`script`] | template parser and evaluator |
//! | [`placeholder`] | [`PlaceholderParser`], the configuration-owning front end |

pub mod config;
pub mod diagnostic;
pub mod option;
pub mod pattern;
pub mod placeholder;
pub mod script;

pub use config::{DefinitionTable, DynamicConfig, OptionDefinitions};
pub use diagnostic::{ErrorKind, PlaceholderError};
pub use option::ConfigOption;
pub use placeholder::PlaceholderParser;
pub use script::{ContextData, Template, MAX_NESTING};
