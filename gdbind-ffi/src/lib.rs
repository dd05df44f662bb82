// gdbind-ffi: #[repr(C)] types, opaque tokens, extension interface table.
// No external dependencies. This crate defines the complete host ↔ engine contract.

pub mod handles;
pub mod error;
pub mod variant_type;
pub mod api_table;
pub mod callbacks;
pub mod class_types;
pub mod contract_tests;

pub use handles::*;
pub use error::*;
pub use variant_type::*;
pub use api_table::*;
pub use callbacks::*;
pub use class_types::*;
pub use gdbind_flags::*;
