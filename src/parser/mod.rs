// Encoding shorthand parser module

pub mod encoding;
pub mod lexer;

// Public API re-exports
pub use encoding::{parse_encoding, spec_from_shorthand};
