use crate::clock::Clock;
use crate::event_source::EventSource;
use crate::immersive::{FullscreenError, FullscreenHost, ImmersiveController};
use crate::preferences::{ReaderPreferences, preferences_cell};
use crate::progress::{ProgressKey, ProgressPatch, ProgressSync, RemoteProgressStore};
use crate::storage::{ChangeBus, KeyValueStore, PersistentCell, StorageWatcher};
use crate::theme::{chrome_style, text_style};

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, MouseEventKind};
use log::{debug, info};
use ratatui::{
    Frame, Terminal,
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Paragraph},
};

const MOUSE_SCROLL_LINES: isize = 3;

/// Plain-text book as the reader surface sees it: identifier plus lines.
pub struct Book {
    pub id: String,
    pub title: String,
    lines: Vec<String>,
}

impl Book {
    pub fn from_text(title: impl Into<String>, content: &str) -> Self {
        let title = title.into();
        Self {
            id: compute_book_id(&title),
            title,
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read book {path:?}"))?;
        let title = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self::from_text(title, &content))
    }

    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }
}

fn compute_book_id(title: &str) -> String {
    let digest = md5::compute(title.as_bytes());
    format!("{digest:x}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
}

/// xterm window operation: `CSI 10 ; 1 t` enters fullscreen, `CSI 10 ; 0 t` leaves it.
struct XtermFullscreen(bool);

impl crossterm::Command for XtermFullscreen {
    fn write_ansi(&self, f: &mut impl fmt::Write) -> fmt::Result {
        write!(f, "\x1b[10;{}t", u8::from(self.0))
    }

    #[cfg(windows)]
    fn execute_winapi(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "fullscreen is not supported by the Windows console API",
        ))
    }
}

/// Asks the terminal emulator to go fullscreen. Terminals give no way to read
/// the state back, so it is tracked from successful requests.
#[derive(Default)]
pub struct TerminalFullscreen {
    fullscreen: bool,
}

impl FullscreenHost for TerminalFullscreen {
    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    fn request_fullscreen(&mut self) -> Result<(), FullscreenError> {
        crossterm::execute!(io::stdout(), XtermFullscreen(true))?;
        self.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<(), FullscreenError> {
        crossterm::execute!(io::stdout(), XtermFullscreen(false))?;
        self.fullscreen = false;
        Ok(())
    }
}

/// Everything the reader needs from the outside world.
pub struct ReaderServices {
    pub store: Arc<dyn KeyValueStore>,
    pub bus: ChangeBus,
    pub remote: Arc<dyn RemoteProgressStore>,
    pub clock: Arc<dyn Clock>,
    pub watcher: Option<StorageWatcher>,
    pub user_id: Option<String>,
    pub sync_debounce: Duration,
    pub auto_hide_delay: Duration,
}

pub struct App {
    book: Book,
    progress: ProgressSync,
    immersive: ImmersiveController<Box<dyn FullscreenHost>>,
    preferences: PersistentCell<ReaderPreferences>,
    watcher: Option<StorageWatcher>,
    clock: Arc<dyn Clock>,
    scroll_offset: usize,
    viewport_height: usize,
}

impl App {
    pub fn new(book: Book, services: ReaderServices, fullscreen: Box<dyn FullscreenHost>) -> Self {
        let key = ProgressKey::new(book.id.clone(), services.user_id.clone());
        let mut progress = ProgressSync::new(
            key,
            services.store.clone(),
            services.remote.clone(),
            services.clock.clone(),
        )
        .with_debounce(services.sync_debounce);
        progress.load();

        let scroll_offset = progress
            .progress()
            .and_then(|p| p.location.parse::<usize>().ok())
            .map(|offset| offset.min(book.total_lines().saturating_sub(1)))
            .unwrap_or(0);
        info!("Opened '{}' at line {}", book.title, scroll_offset);

        let immersive = ImmersiveController::new(fullscreen, services.clock.clone())
            .with_auto_hide_delay(services.auto_hide_delay)
            .with_scroll_baseline(scroll_offset as f64);
        let preferences = preferences_cell(services.store, services.bus);

        Self {
            book,
            progress,
            immersive,
            preferences,
            watcher: services.watcher,
            clock: services.clock,
            scroll_offset,
            viewport_height: 1,
        }
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn progress(&self) -> &ProgressSync {
        &self.progress
    }

    pub fn immersive(&self) -> &ImmersiveController<Box<dyn FullscreenHost>> {
        &self.immersive
    }

    pub fn preferences(&self) -> &ReaderPreferences {
        self.preferences.get()
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    fn percentage_at(&self, offset: usize) -> f64 {
        let max_offset = self.book.total_lines().saturating_sub(1);
        if max_offset == 0 {
            100.0
        } else {
            offset as f64 * 100.0 / max_offset as f64
        }
    }

    pub fn scroll_to(&mut self, offset: usize) {
        let offset = offset.min(self.book.total_lines().saturating_sub(1));
        if offset == self.scroll_offset {
            return;
        }
        self.scroll_offset = offset;
        self.immersive.handle_scroll(offset as f64);

        let total = u32::try_from(self.book.total_lines()).unwrap_or(u32::MAX);
        let current = u32::try_from(offset).unwrap_or(u32::MAX);
        self.progress.update_progress(
            ProgressPatch::new()
                .location(offset.to_string())
                .percentage(self.percentage_at(offset))
                .locations(current, total),
        );
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let target = self.scroll_offset.saturating_add_signed(delta);
        self.scroll_to(target);
    }

    pub fn clear_progress(&mut self) {
        self.progress.clear_progress();
        self.scroll_offset = 0;
        self.immersive.show_ui();
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        let page = self.viewport_height.max(1) as isize;
        match key.code {
            KeyCode::Char('q') => return Some(AppAction::Quit),
            KeyCode::Char('j') | KeyCode::Down => self.scroll_by(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_by(-1),
            KeyCode::PageDown => self.scroll_by(page),
            KeyCode::PageUp => self.scroll_by(-page),
            KeyCode::Char('g') | KeyCode::Home => self.scroll_to(0),
            KeyCode::Char('G') | KeyCode::End => self.scroll_to(usize::MAX),
            KeyCode::Char(' ') => self.immersive.toggle_ui(),
            KeyCode::Char('f') => self.immersive.toggle_fullscreen(),
            KeyCode::Esc if self.immersive.is_fullscreen() => self.immersive.toggle_fullscreen(),
            KeyCode::Char('t') => self.preferences.update(|p| ReaderPreferences {
                theme: p.theme.next(),
                ..*p
            }),
            KeyCode::Char('w') => self.preferences.update(|p| ReaderPreferences {
                font_weight: p.font_weight.next(),
                ..*p
            }),
            KeyCode::Char('o') => self.preferences.update(|p| ReaderPreferences {
                font_family: p.font_family.next(),
                ..*p
            }),
            KeyCode::Char('+') => self
                .preferences
                .update(|p| p.with_font_size(i32::from(p.font_size) + 1)),
            KeyCode::Char('-') => self
                .preferences
                .update(|p| p.with_font_size(i32::from(p.font_size) - 1)),
            KeyCode::Char('r') => self.clear_progress(),
            _ => {}
        }
        None
    }

    pub fn handle_mouse(&mut self, kind: MouseEventKind) {
        match kind {
            MouseEventKind::Moved => self.immersive.handle_mouse_move(),
            MouseEventKind::ScrollDown => self.scroll_by(MOUSE_SCROLL_LINES),
            MouseEventKind::ScrollUp => self.scroll_by(-MOUSE_SCROLL_LINES),
            _ => {}
        }
    }

    pub fn handle_resize(&mut self) {
        let actual = self.immersive.host().is_fullscreen();
        self.immersive.handle_fullscreen_change(actual);
    }

    /// Advances timers and picks up external changes. Returns `true` when a
    /// redraw is needed.
    pub fn tick(&mut self) -> bool {
        let synced = self.progress.tick();
        let hidden = self.immersive.tick();

        if let Some(watcher) = &mut self.watcher {
            watcher.poll_if_due(self.clock.now());
        }
        let prefs_changed = self.preferences.poll_changes();

        synced || hidden || prefs_changed
    }

    /// Cancels pending timers. Unsynced progress stays in the local cache.
    pub fn shutdown(&mut self) {
        self.progress.teardown();
        self.immersive.teardown();
    }

    fn status_text(&self) -> String {
        if self.progress.is_loading() {
            "loading".to_string()
        } else if let Some(e) = self.progress.last_sync_error() {
            format!("offline: {e}")
        } else if self.progress.has_pending_sync() {
            "saving".to_string()
        } else if let Some(e) = self.progress.error() {
            format!("local copy ({e})")
        } else {
            "saved".to_string()
        }
    }

    pub fn draw(&mut self, f: &mut Frame) {
        let prefs = *self.preferences.get();
        let area = f.area();
        f.render_widget(Block::default().style(text_style(&prefs)), area);

        let content_area = if self.immersive.is_ui_visible() {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1),
                    Constraint::Min(1),
                    Constraint::Length(1),
                ])
                .split(area);
            self.render_header(f, chunks[0], &prefs);
            self.render_footer(f, chunks[2], &prefs);
            chunks[1]
        } else {
            area
        };

        self.viewport_height = content_area.height as usize;
        self.render_content(f, content_area, &prefs);
    }

    fn render_header(&self, f: &mut Frame, area: Rect, prefs: &ReaderPreferences) {
        let palette = prefs.theme.palette();
        let percentage = self
            .progress
            .progress()
            .map(|p| p.percentage)
            .unwrap_or(0.0);
        let line = Line::from(vec![
            Span::raw(format!(" {} ", self.book.title)),
            Span::styled(
                format!("{percentage:.0}%"),
                Style::default().fg(palette.accent),
            ),
        ]);
        f.render_widget(Paragraph::new(line).style(chrome_style(prefs)), area);
    }

    fn render_footer(&self, f: &mut Frame, area: Rect, prefs: &ReaderPreferences) {
        let palette = prefs.theme.palette();
        let status = self.status_text();
        let status_style = if status.starts_with("offline") {
            Style::default().fg(palette.error)
        } else {
            Style::default()
        };
        let line = Line::from(vec![
            Span::raw(format!(
                " {}/{} · {} {} {}pt · {} · ",
                self.scroll_offset + 1,
                self.book.total_lines().max(1),
                prefs.theme.name(),
                prefs.font_family.name(),
                prefs.font_size,
                prefs.font_weight.name(),
            )),
            Span::styled(status, status_style),
        ]);
        f.render_widget(Paragraph::new(line).style(chrome_style(prefs)), area);
    }

    fn render_content(&self, f: &mut Frame, area: Rect, prefs: &ReaderPreferences) {
        let width = (area.width as usize).max(1);
        let height = area.height as usize;

        let lines: Vec<Line> = self
            .book
            .lines
            .iter()
            .skip(self.scroll_offset)
            .flat_map(|line| textwrap::wrap(line, width))
            .take(height)
            .map(|segment| Line::from(segment.into_owned()))
            .collect();

        f.render_widget(Paragraph::new(lines).style(text_style(prefs)), area);
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn run_app_with_event_source<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    event_source: &mut dyn EventSource,
) -> Result<()> {
    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();
    let mut first_render = true;
    loop {
        let mut events_processed = 0;
        let mut should_quit = false;
        while event_source.poll(Duration::from_millis(0))? && events_processed < 50 {
            let event = event_source.read()?;
            events_processed += 1;

            match event {
                Event::Key(key) => {
                    if app.handle_key(key) == Some(AppAction::Quit) {
                        should_quit = true;
                    }
                }
                Event::Mouse(mouse_event) => app.handle_mouse(mouse_event.kind),
                Event::Resize(_cols, _rows) => app.handle_resize(),
                _ => {}
            }

            if should_quit {
                break;
            }
        }

        if should_quit {
            app.shutdown();
            return Ok(());
        }

        let mut needs_redraw = events_processed > 0 || first_render;
        first_render = false;

        if last_tick.elapsed() >= tick_rate {
            if app.tick() {
                needs_redraw = true;
            }
            last_tick = Instant::now();
        }

        if needs_redraw {
            let draw_start = Instant::now();
            terminal.draw(|f| app.draw(f))?;
            let draw_duration = draw_start.elapsed();

            if draw_duration.as_millis() > 10 {
                debug!("Terminal draw/flush took {}ms", draw_duration.as_millis());
            }
        }

        if events_processed == 0 {
            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));
            let _ = event_source.poll(timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::SimulatedEventSource;
    use crate::progress::ProgressRecord;
    use crate::storage::{MemoryStore, read_json};
    use crate::test_utils::{FakeFullscreen, ManualClock, ScriptedRemote};
    use crossterm::event::KeyModifiers;
    use ratatui::backend::TestBackend;

    struct Harness {
        store: Arc<MemoryStore>,
        remote: Arc<ScriptedRemote>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            Self {
                store: Arc::new(MemoryStore::new()),
                remote: Arc::new(ScriptedRemote::new(clock.clone())),
                clock,
            }
        }

        fn app(&self, book: Book) -> App {
            let services = ReaderServices {
                store: self.store.clone(),
                bus: ChangeBus::new(),
                remote: self.remote.clone(),
                clock: self.clock.clone(),
                watcher: None,
                user_id: None,
                sync_debounce: Duration::from_millis(1000),
                auto_hide_delay: Duration::from_millis(3000),
            };
            App::new(book, services, Box::new(FakeFullscreen::new()))
        }
    }

    fn book(lines: usize) -> Book {
        let content: Vec<String> = (0..lines).map(|i| format!("line {i}")).collect();
        Book::from_text("sample.txt", &content.join("\n"))
    }

    fn press(app: &mut App, code: KeyCode) -> Option<AppAction> {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_scrolling_records_progress() {
        let harness = Harness::new();
        let mut app = harness.app(book(11));

        press(&mut app, KeyCode::Char('j'));
        press(&mut app, KeyCode::Char('j'));

        let progress = app.progress().progress().unwrap();
        assert_eq!(progress.location, "2");
        assert_eq!(progress.percentage, 20.0);
        assert_eq!(progress.total_locations, Some(11));

        let cache_key = ProgressKey::anonymous(app.book().id.clone()).cache_key();
        let cached: ProgressRecord = read_json(harness.store.as_ref(), &cache_key).unwrap();
        assert_eq!(cached.location, "2");

        harness.clock.advance_ms(1000);
        assert!(app.tick());
        assert_eq!(harness.remote.upserts().len(), 1);
    }

    #[test]
    fn test_reopening_restores_offset() {
        let harness = Harness::new();
        {
            let mut app = harness.app(book(50));
            app.scroll_to(30);
        }
        assert!(harness.remote.upserts().is_empty());

        let app = harness.app(book(50));
        assert_eq!(app.scroll_offset(), 30);
    }

    #[test]
    fn test_scrolling_back_after_reopen_keeps_chrome() {
        let harness = Harness::new();
        {
            let mut app = harness.app(book(50));
            app.scroll_to(30);
        }

        let mut app = harness.app(book(50));
        press(&mut app, KeyCode::Char('k'));
        assert_eq!(app.scroll_offset(), 29);
        assert!(app.immersive().is_ui_visible());

        press(&mut app, KeyCode::Char('j'));
        assert!(!app.immersive().is_ui_visible());
    }

    #[test]
    fn test_chrome_hides_while_reading() {
        let harness = Harness::new();
        let mut app = harness.app(book(40));
        let mut terminal = Terminal::new(TestBackend::new(40, 8)).unwrap();

        terminal.draw(|f| app.draw(f)).unwrap();
        assert!(screen_text(&terminal).contains("sample.txt"));

        press(&mut app, KeyCode::Char('j'));
        terminal.draw(|f| app.draw(f)).unwrap();
        let text = screen_text(&terminal);
        assert!(!text.contains("sample.txt"));
        assert!(text.starts_with("line 1"));

        press(&mut app, KeyCode::Char(' '));
        terminal.draw(|f| app.draw(f)).unwrap();
        assert!(screen_text(&terminal).contains("sample.txt"));
    }

    #[test]
    fn test_preference_keys_persist() {
        let harness = Harness::new();
        let mut app = harness.app(book(3));

        press(&mut app, KeyCode::Char('t'));
        press(&mut app, KeyCode::Char('+'));

        let reopened = harness.app(book(3));
        assert_eq!(reopened.preferences().theme.name(), "Quiet");
        assert_eq!(reopened.preferences().font_size, 19);
    }

    #[test]
    fn test_clear_progress_resets_position() {
        let harness = Harness::new();
        let mut app = harness.app(book(20));
        app.scroll_to(10);

        press(&mut app, KeyCode::Char('r'));

        assert_eq!(app.scroll_offset(), 0);
        assert!(app.progress().progress().is_none());
        assert!(harness.store.keys().is_empty());
    }

    #[test]
    fn test_run_loop_quits_and_drops_pending_sync() {
        let harness = Harness::new();
        let mut app = harness.app(book(10));
        let mut terminal = Terminal::new(TestBackend::new(30, 6)).unwrap();
        let key = |c| Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        let mut events = SimulatedEventSource::new(vec![key('j'), key('j'), key('q')]);

        run_app_with_event_source(&mut terminal, &mut app, &mut events).unwrap();

        assert_eq!(app.scroll_offset(), 2);
        assert!(!app.progress().has_pending_sync());
        harness.clock.advance_ms(5000);
        app.tick();
        assert!(harness.remote.upserts().is_empty());
    }
}
