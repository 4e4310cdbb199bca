#![no_main]

use std::sync::mpsc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

use carve_refactor::{ExtractLocalFunction, FileId, TextRange};
use libfuzzer_sys::fuzz_target;

mod utils;

const TIMEOUT: Duration = Duration::from_secs(2);

struct Runner {
    input_tx: mpsc::SyncSender<(String, TextRange)>,
    output_rx: Mutex<mpsc::Receiver<()>>,
}

fn runner() -> &'static Runner {
    static RUNNER: OnceLock<Runner> = OnceLock::new();
    RUNNER.get_or_init(|| {
        let (input_tx, input_rx) = mpsc::sync_channel::<(String, TextRange)>(0);
        let (output_tx, output_rx) = mpsc::sync_channel::<()>(0);

        std::thread::spawn(move || {
            for (text, selection) in input_rx {
                let file = FileId::new("Fuzz.cs");
                let refactoring = ExtractLocalFunction::new(file.clone(), selection);
                let _ = refactoring.analyze(&text);
                // Rejections are expected; an edit that applies must apply cleanly.
                if let Some(edit) = refactoring.apply(&text) {
                    let updated = edit
                        .edit
                        .apply_to(&file, &text)
                        .expect("extraction produced edits that do not apply");
                    assert_eq!(
                        edit.rename_range.slice(&updated),
                        edit.signature.name.as_str(),
                        "rename range does not cover the new function's name"
                    );
                }
                let _ = output_tx.send(());
            }
        });

        Runner {
            input_tx,
            output_rx: Mutex::new(output_rx),
        }
    })
}

fuzz_target!(|data: &[u8]| {
    // The first four bytes pick the selection, the rest is the source.
    let Some((head, rest)) = data.split_first_chunk::<4>() else {
        return;
    };
    let Some(text) = utils::truncate_utf8(rest) else {
        return;
    };
    // Offsets may fall inside a character or past the end; those must be rejected, not panic.
    let start = usize::from(u16::from_le_bytes([head[0], head[1]]));
    let end = start + usize::from(u16::from_le_bytes([head[2], head[3]]));

    let runner = runner();
    runner
        .input_tx
        .send((text.to_owned(), TextRange::new(start, end)))
        .expect("extract worker thread exited");

    match runner
        .output_rx
        .lock()
        .expect("extract worker receiver poisoned")
        .recv_timeout(TIMEOUT)
    {
        Ok(()) => {}
        Err(mpsc::RecvTimeoutError::Timeout) => panic!("extract fuzz target timed out"),
        Err(mpsc::RecvTimeoutError::Disconnected) => panic!("extract worker thread panicked"),
    }
});
