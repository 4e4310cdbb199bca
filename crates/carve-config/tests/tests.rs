// Integration-test harness for carve-config.
//
// Cargo builds one test binary per `tests/*.rs` file; everything lives under `suite/`.

mod suite;
