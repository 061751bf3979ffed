//! A background thread that renders a [`Progress`] as an `indicatif` bar,
//! mirroring the original `ConsoleProgress`'s dedicated printer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use bkcrack_core::progress::Progress;

/// Build a bar with an elapsed-time/position/length/message layout.
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is valid")
            .progress_chars("█▓▒░ "),
    );
    pb
}

/// Run `work`, rendering `progress` on an `indicatif` bar ticked every
/// 200ms from a dedicated thread for the duration of the call.
///
/// `work` should poll `progress.should_stop()` internally (it is passed the
/// same `&Progress`); this only takes care of the rendering side.
pub fn with_progress_bar<T>(message: &str, progress: &Progress, work: impl FnOnce() -> T) -> T {
    let finished = AtomicBool::new(false);
    let pb = create_progress_bar();
    pb.set_message(message.to_string());

    let result = std::thread::scope(|scope| {
        scope.spawn(|| {
            while !finished.load(Ordering::Relaxed) {
                let total = progress.total();
                if total > 0 {
                    pb.set_length(total);
                    pb.set_position(progress.done().min(total));
                }
                std::thread::sleep(Duration::from_millis(200));
            }
        });

        let result = work();
        finished.store(true, Ordering::Relaxed);
        result
    });

    pb.set_length(progress.total().max(1));
    pb.set_position(progress.done());
    pb.finish_and_clear();
    result
}
