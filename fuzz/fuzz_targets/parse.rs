#![no_main]

use libfuzzer_sys::fuzz_target;

mod utils;

fuzz_target!(|data: &[u8]| {
    let Some(text) = utils::truncate_utf8(data) else {
        return;
    };

    // Malformed input must parse and bind without panicking.
    let file = carve_syntax::parse(text);
    let model = carve_sema::SemanticModel::new(&file);
    for expr in file.expr_ids() {
        let _ = model.type_of(expr);
    }
});
