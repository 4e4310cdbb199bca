//! Utilities shared by carve tests.
//!
//! Fixtures mark the selection with `[|` and `|]`. Expected outputs mark the identifier the
//! host should start an interactive rename on with `{|Rename:` and `|}`.
//!
//! Fixture directories can be regenerated with `BLESS=1`.

mod fixtures;

pub use fixtures::*;
