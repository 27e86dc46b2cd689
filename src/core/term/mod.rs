//! Terminal emulation: the VT parser and the screen model it drives.

pub mod parser;
pub mod screen;

pub use parser::VtParser;
pub use screen::{
    AttrFlags, Cell, Color, RenderFormat, Screen, DEFAULT_COLS, DEFAULT_ROWS, RAW_LOG_CAP,
    SCROLLBACK_LIMIT,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use screen::{lock_raw, RawLog};

/// One screen plus the parser bound to it, safe to share between the
/// session's reader task and the controller.
///
/// The grid and parser live behind a single guard acquired once per output
/// chunk; the raw-byte log has its own guard so passthrough reads never
/// contend with grid mutation.
pub struct Terminal {
    grid: Mutex<Grid>,
    raw: Arc<Mutex<RawLog>>,
}

struct Grid {
    screen: Screen,
    parser: VtParser,
}

impl Terminal {
    pub fn new(width: usize, height: usize) -> Self {
        let screen = Screen::new(width, height);
        let raw = screen.raw_handle();
        Self {
            grid: Mutex::new(Grid {
                screen,
                parser: VtParser::new(),
            }),
            raw,
        }
    }

    fn grid(&self) -> MutexGuard<'_, Grid> {
        self.grid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `data` to the raw log and interpret it against the grid.
    ///
    /// Callers must not interleave writes; the session's reader task is the
    /// only writer.
    pub fn write(&self, data: &[u8]) {
        lock_raw(&self.raw).append(data);
        let mut guard = self.grid();
        let grid = &mut *guard;
        grid.parser.feed_bytes(data, &mut grid.screen);
    }

    pub fn render(&self, format: RenderFormat) -> String {
        match format {
            RenderFormat::Passthrough => {
                String::from_utf8_lossy(lock_raw(&self.raw).as_bytes()).into_owned()
            }
            other => self.grid().screen.render(other),
        }
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.grid().screen.cursor()
    }

    pub fn size(&self) -> (usize, usize) {
        self.grid().screen.size()
    }

    pub fn resize(&self, width: usize, height: usize) {
        self.grid().screen.resize(width, height);
    }

    /// Clear the grid, home the cursor, and empty the raw log.
    pub fn clear(&self) {
        self.grid().screen.clear();
    }

    /// Full teardown for restart: clear the grid, drop the scrollback, and
    /// reset the parser's graphic and saved state.
    pub fn reset(&self) {
        let mut guard = self.grid();
        guard.screen.clear();
        guard.screen.clear_scrollback();
        guard.parser = VtParser::new();
    }

    pub fn scrollback_len(&self) -> usize {
        self.grid().screen.scrollback_len()
    }

    /// Copy of the raw-byte log.
    pub fn raw_bytes(&self) -> Vec<u8> {
        lock_raw(&self.raw).as_bytes().to_vec()
    }

    pub fn clear_raw(&self) {
        lock_raw(&self.raw).clear();
    }
}
