use std::{fs::File, io::stdout, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use log::{error, info, warn};
use ratatui::{Terminal, backend::CrosstermBackend};
use simplelog::{LevelFilter, WriteLogger};

use sarpay::clock::SystemClock;
use sarpay::event_source::KeyboardEventSource;
use sarpay::main_app::{App, Book, ReaderServices, TerminalFullscreen, run_app_with_event_source};
use sarpay::panic_handler;
use sarpay::progress::{HttpProgressStore, LocalOnly, RemoteProgressStore, recent_progress};
use sarpay::settings;
use sarpay::storage::{ChangeBus, FileStore, KeyValueStore, MemoryStore, StorageWatcher};

const USAGE: &str = "usage: sarpay <book.txt> | sarpay history";

fn build_remote() -> Arc<dyn RemoteProgressStore> {
    let Some(remote) = settings::get_remote() else {
        info!("No remote configured, progress stays on this device");
        return Arc::new(LocalOnly);
    };

    match HttpProgressStore::new(&remote.url, &remote.table) {
        Ok(store) => {
            let store = match remote.api_key {
                Some(key) => store.with_api_key(key),
                None => store,
            };
            Arc::new(store)
        }
        Err(e) => {
            warn!("Could not create remote client for {}: {e}", remote.url);
            Arc::new(LocalOnly)
        }
    }
}

/// Opens the shared file store, falling back to memory when the directory
/// cannot be created so reading still works for this session.
fn open_storage(bus: &ChangeBus) -> (Arc<dyn KeyValueStore>, Option<StorageWatcher>) {
    let dir = settings::get_storage_dir();
    match FileStore::open(&dir) {
        Ok(store) => {
            let store = Arc::new(store);
            let watcher = StorageWatcher::new(store.clone(), bus.clone());
            (store as Arc<dyn KeyValueStore>, Some(watcher))
        }
        Err(e) => {
            error!("{e:#}; progress will not survive this session");
            (Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>, None)
        }
    }
}

fn print_history() -> Result<()> {
    let store = FileStore::open(settings::get_storage_dir())?;
    let entries = recent_progress(&store);
    if entries.is_empty() {
        println!("No reading history yet.");
        return Ok(());
    }

    for (key, record) in entries {
        let local_time = record.last_read.with_timezone(&chrono::Local);
        println!(
            "{} : {} [{:.0}%] at {}",
            local_time.format("%Y-%m-%d %H:%M"),
            key,
            record.percentage,
            record.location
        );
    }
    Ok(())
}

fn run_reader(path: PathBuf) -> Result<()> {
    let book = Book::open(&path)?;
    let bus = ChangeBus::new();
    let (store, watcher) = open_storage(&bus);
    let services = ReaderServices {
        store,
        bus,
        remote: build_remote(),
        clock: Arc::new(SystemClock),
        watcher,
        user_id: settings::get_user_id(),
        sync_debounce: settings::get_sync_debounce(),
        auto_hide_delay: settings::get_auto_hide_delay(),
    };

    // Terminal initialization
    enable_raw_mode()?;
    let mut stdout = stdout();

    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(book, services, Box::new(TerminalFullscreen::default()));
    let mut event_source = KeyboardEventSource;
    let res = run_app_with_event_source(&mut terminal, &mut app, &mut event_source);

    // Restore terminal state
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        error!("Application error: {err:?}");
        println!("{err:?}");
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize panic handler first, before any other setup
    panic_handler::initialize_panic_handler();

    WriteLogger::init(
        LevelFilter::Debug,
        simplelog::ConfigBuilder::new()
            .set_max_level(LevelFilter::Debug)
            .add_filter_ignore_str("rustls")
            .add_filter_ignore_str("hyper")
            .build(),
        File::create("sarpay.log").context("Failed to create sarpay.log")?,
    )?;

    info!("Starting Sarpay reader");

    // Load settings from ~/.sarpay_settings.yaml
    settings::load_settings();

    let arg = std::env::args().nth(1);
    let result = match arg.as_deref() {
        Some("history") => print_history(),
        Some("-h") | Some("--help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some(path) => run_reader(PathBuf::from(path)),
        None => bail!(USAGE),
    };

    info!("Shutting down Sarpay");
    result
}
