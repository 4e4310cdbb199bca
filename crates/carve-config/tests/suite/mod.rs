mod diagnostics;
mod discovery;
mod schema;
