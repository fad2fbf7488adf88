use crossterm::{
    event::DisableMouseCapture,
    execute,
    terminal::{LeaveAlternateScreen, disable_raw_mode},
};
use log::error;
use std::io::stdout;

fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(stdout(), LeaveAlternateScreen, DisableMouseCapture);
}

/// Restores the terminal before any panic output so the report is readable.
///
/// Debug builds print a full backtrace via `better-panic`; release builds
/// write a crash report via `human-panic`.
pub fn initialize_panic_handler() {
    let metadata = human_panic::metadata!();

    std::panic::set_hook(Box::new(move |panic_info| {
        restore_terminal();
        error!("Panic: {panic_info}");

        if cfg!(debug_assertions) {
            better_panic::Settings::auto()
                .most_recent_first(false)
                .lineno_suffix(true)
                .create_panic_handler()(panic_info);
        } else {
            let file_path = human_panic::handle_dump(&metadata, panic_info);
            let _ = human_panic::print_msg(file_path, &metadata);
        }

        std::process::exit(1);
    }));
}
