//! Screen model
//!
//! A two-dimensional cell grid with cursor, FIFO scrollback, a bounded
//! raw-byte log, and the render formats exposed to controllers.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use bitflags::bitflags;

/// Initial terminal width.
pub const DEFAULT_COLS: usize = 80;
/// Initial terminal height.
pub const DEFAULT_ROWS: usize = 24;
/// Maximum number of scrollback rows retained.
pub const SCROLLBACK_LIMIT: usize = 1000;
/// Maximum size of the raw-byte log.
pub const RAW_LOG_CAP: usize = 1024 * 1024;

bitflags! {
    /// Cell attribute set.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u8 {
        const BOLD      = 0b0000_0001;
        const ITALIC    = 0b0000_0010;
        const UNDERLINE = 0b0000_0100;
        const BLINK     = 0b0000_1000;
        const REVERSE   = 0b0001_0000;
        const HIDDEN    = 0b0010_0000;
    }
}

/// Cell color: the terminal default or a 24-bit RGB triple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Color {
    #[default]
    Default,
    Rgb(u8, u8, u8),
}

/// A single grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
    pub attrs: AttrFlags,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Color::Default,
            bg: Color::Default,
            attrs: AttrFlags::empty(),
        }
    }
}

/// Render formats accepted by `view_screen`. Unknown codes resolve to plain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderFormat {
    #[default]
    Plain,
    Raw,
    Ansi,
    Scrollback,
    Passthrough,
}

impl RenderFormat {
    pub fn parse(s: &str) -> Self {
        match s {
            "raw" => Self::Raw,
            "ansi" => Self::Ansi,
            "scrollback" => Self::Scrollback,
            "passthrough" => Self::Passthrough,
            _ => Self::Plain,
        }
    }
}

/// Ordered log of the bytes fed to the screen, capped at [`RAW_LOG_CAP`].
///
/// Trims drop the oldest quarter of the cap until the log fits again, so the
/// most recent bytes are always retained.
#[derive(Debug, Default)]
pub struct RawLog {
    data: Vec<u8>,
}

impl RawLog {
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        while self.data.len() > RAW_LOG_CAP {
            self.data.drain(..RAW_LOG_CAP / 4);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The in-memory terminal screen: grid, cursor, scrollback, raw log.
///
/// All mutation is routed through the VT parser or the explicit geometric
/// operations below. The raw log sits behind its own guard so passthrough
/// reads never contend with grid mutation.
pub struct Screen {
    width: usize,
    height: usize,
    cells: Vec<Vec<Cell>>,
    cursor_x: usize,
    cursor_y: usize,
    scrollback: VecDeque<Vec<Cell>>,
    raw: Arc<Mutex<RawLog>>,
}

fn blank_row(width: usize) -> Vec<Cell> {
    vec![Cell::default(); width]
}

impl Screen {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            cells: (0..height).map(|_| blank_row(width)).collect(),
            cursor_x: 0,
            cursor_y: 0,
            scrollback: VecDeque::new(),
            raw: Arc::new(Mutex::new(RawLog::default())),
        }
    }

    /// Shared handle to the raw-byte log.
    pub fn raw_handle(&self) -> Arc<Mutex<RawLog>> {
        Arc::clone(&self.raw)
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<&Cell> {
        self.cells.get(y).and_then(|row| row.get(x))
    }

    /// Overwrite a cell; out-of-bounds writes are ignored.
    pub fn set_cell(&mut self, x: usize, y: usize, cell: Cell) {
        if x < self.width && y < self.height {
            self.cells[y][x] = cell;
        }
    }

    /// Move the cursor, clamping into the grid.
    pub fn move_cursor(&mut self, x: usize, y: usize) {
        self.cursor_x = x.min(self.width - 1);
        self.cursor_y = y.min(self.height - 1);
    }

    /// Reset every cell to the default, home the cursor, and empty the raw
    /// log so passthrough output stays consistent with the cleared grid.
    pub fn clear(&mut self) {
        for row in &mut self.cells {
            row.fill(Cell::default());
        }
        self.cursor_x = 0;
        self.cursor_y = 0;
        lock_raw(&self.raw).clear();
    }

    pub fn clear_line(&mut self, y: usize) {
        if let Some(row) = self.cells.get_mut(y) {
            row.fill(Cell::default());
        }
    }

    pub fn clear_scrollback(&mut self) {
        self.scrollback.clear();
    }

    /// Evict row 0 into scrollback, shift the rest up, blank the bottom row.
    pub fn scroll_up(&mut self) {
        let evicted = self.cells.remove(0);
        self.cells.push(blank_row(self.width));
        self.scrollback.push_back(evicted);
        while self.scrollback.len() > SCROLLBACK_LIMIT {
            self.scrollback.pop_front();
        }
    }

    /// Shift rows down and blank row 0. Does not touch scrollback.
    pub fn scroll_down(&mut self) {
        self.cells.pop();
        self.cells.insert(0, blank_row(self.width));
    }

    /// Insert `n` blank lines at row `y`; rows below shift down and clip.
    pub fn insert_lines(&mut self, y: usize, n: usize) {
        if y >= self.height || n == 0 {
            return;
        }
        let n = n.min(self.height - y);
        self.cells[y..].rotate_right(n);
        for row in &mut self.cells[y..y + n] {
            *row = blank_row(self.width);
        }
    }

    /// Delete `n` lines at row `y`; rows below shift up, bottom filled blank.
    pub fn delete_lines(&mut self, y: usize, n: usize) {
        if y >= self.height || n == 0 {
            return;
        }
        let n = n.min(self.height - y);
        self.cells[y..].rotate_left(n);
        let h = self.height;
        for row in &mut self.cells[h - n..] {
            *row = blank_row(self.width);
        }
    }

    /// Insert `n` blank cells at (x, y); the tail shifts right and clips.
    pub fn insert_chars(&mut self, x: usize, y: usize, n: usize) {
        if x >= self.width || y >= self.height || n == 0 {
            return;
        }
        let n = n.min(self.width - x);
        let row = &mut self.cells[y];
        row[x..].rotate_right(n);
        row[x..x + n].fill(Cell::default());
    }

    /// Delete `n` cells at (x, y); the tail shifts left, right end blanked.
    pub fn delete_chars(&mut self, x: usize, y: usize, n: usize) {
        if x >= self.width || y >= self.height || n == 0 {
            return;
        }
        let n = n.min(self.width - x);
        let row = &mut self.cells[y];
        row[x..].rotate_left(n);
        let w = self.width;
        row[w - n..].fill(Cell::default());
    }

    /// Reallocate the grid preserving the top-left shared region. Scrollback
    /// rows are retained as-is, even when their width no longer matches.
    pub fn resize(&mut self, width: usize, height: usize) {
        let width = width.max(1);
        let height = height.max(1);
        let mut cells: Vec<Vec<Cell>> = (0..height).map(|_| blank_row(width)).collect();
        for y in 0..height.min(self.height) {
            for x in 0..width.min(self.width) {
                cells[y][x] = self.cells[y][x];
            }
        }
        self.cells = cells;
        self.width = width;
        self.height = height;
        self.cursor_x = self.cursor_x.min(width - 1);
        self.cursor_y = self.cursor_y.min(height - 1);
    }

    /// Scrollback rows in logical order, oldest first.
    pub fn scrollback_rows(&self) -> Vec<Vec<Cell>> {
        self.scrollback.iter().cloned().collect()
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    pub fn render(&self, format: RenderFormat) -> String {
        match format {
            RenderFormat::Raw => self.render_raw(),
            RenderFormat::Ansi => self.render_ansi(),
            RenderFormat::Scrollback => self.render_scrollback(),
            // Passthrough is served from the raw log by the Terminal wrapper;
            // rendering it here falls back to the grid view.
            RenderFormat::Plain | RenderFormat::Passthrough => self.render_plain(),
        }
    }

    fn render_plain(&self) -> String {
        let mut out = String::with_capacity((self.width + 1) * self.height);
        for (y, row) in self.cells.iter().enumerate() {
            for cell in row {
                out.push(cell.ch);
            }
            if y < self.height - 1 {
                out.push('\n');
            }
        }
        out.trim_end_matches([' ', '\n']).to_string()
    }

    fn render_raw(&self) -> String {
        let mut out = String::new();
        let mut fg = Color::Default;
        let mut bg = Color::Default;
        let mut attrs = AttrFlags::empty();

        out.push_str("\x1b[0m");
        for (y, row) in self.cells.iter().enumerate() {
            for cell in row {
                if cell.fg != fg || cell.bg != bg || cell.attrs != attrs {
                    out.push_str(&build_sgr(cell.fg, cell.bg, cell.attrs));
                    fg = cell.fg;
                    bg = cell.bg;
                    attrs = cell.attrs;
                }
                out.push(cell.ch);
            }
            if y < self.height - 1 {
                out.push('\n');
            }
        }
        let _ = write!(out, "\x1b[{};{}H", self.cursor_y + 1, self.cursor_x + 1);
        out
    }

    fn render_ansi(&self) -> String {
        let mut out = String::new();
        for (y, row) in self.cells.iter().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                if x == self.cursor_x && y == self.cursor_y {
                    out.push('▮');
                } else if cell.ch == ' ' {
                    out.push('·');
                } else {
                    out.push(cell.ch);
                }
            }
            if y < self.height - 1 {
                out.push('\n');
            }
        }
        out
    }

    fn render_scrollback(&self) -> String {
        let mut out = String::new();
        for row in &self.scrollback {
            for cell in row {
                out.push(cell.ch);
            }
            out.push('\n');
        }
        out.push_str(&self.render_plain());
        out
    }
}

pub(crate) fn lock_raw(raw: &Mutex<RawLog>) -> std::sync::MutexGuard<'_, RawLog> {
    raw.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the minimal SGR sequence selecting the given rendition.
fn build_sgr(fg: Color, bg: Color, attrs: AttrFlags) -> String {
    if fg == Color::Default && bg == Color::Default && attrs.is_empty() {
        return "\x1b[0m".to_string();
    }

    let mut params: Vec<String> = Vec::new();
    for (flag, code) in [
        (AttrFlags::BOLD, "1"),
        (AttrFlags::ITALIC, "3"),
        (AttrFlags::UNDERLINE, "4"),
        (AttrFlags::BLINK, "5"),
        (AttrFlags::REVERSE, "7"),
        (AttrFlags::HIDDEN, "8"),
    ] {
        if attrs.contains(flag) {
            params.push(code.to_string());
        }
    }
    if let Color::Rgb(r, g, b) = fg {
        params.push(format!("38;2;{};{};{}", r, g, b));
    }
    if let Color::Rgb(r, g, b) = bg {
        params.push(format!("48;2;{};{};{}", r, g, b));
    }
    format!("\x1b[{}m", params.join(";"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(width: usize, height: usize, ch: char) -> Screen {
        let mut screen = Screen::new(width, height);
        for y in 0..height {
            for x in 0..width {
                screen.set_cell(
                    x,
                    y,
                    Cell {
                        ch,
                        ..Cell::default()
                    },
                );
            }
        }
        screen
    }

    fn row_text(screen: &Screen, y: usize) -> String {
        (0..screen.size().0)
            .map(|x| screen.cell(x, y).unwrap().ch)
            .collect()
    }

    #[test]
    fn new_screen_is_blank_with_home_cursor() {
        let screen = Screen::new(80, 24);
        assert_eq!(screen.size(), (80, 24));
        assert_eq!(screen.cursor(), (0, 0));
        for y in 0..24 {
            for x in 0..80 {
                assert_eq!(*screen.cell(x, y).unwrap(), Cell::default());
            }
        }
    }

    #[test]
    fn set_cell_ignores_out_of_bounds() {
        let mut screen = Screen::new(10, 10);
        let cell = Cell {
            ch: 'X',
            fg: Color::Rgb(255, 0, 0),
            bg: Color::Rgb(0, 255, 0),
            attrs: AttrFlags::BOLD,
        };
        screen.set_cell(5, 5, cell);
        assert_eq!(*screen.cell(5, 5).unwrap(), cell);

        screen.set_cell(10, 0, cell);
        screen.set_cell(0, 10, cell);
        assert_eq!(screen.cell(10, 0), None);
    }

    #[test]
    fn move_cursor_clamps_to_bounds() {
        let mut screen = Screen::new(80, 24);
        screen.move_cursor(10, 5);
        assert_eq!(screen.cursor(), (10, 5));
        screen.move_cursor(100, 30);
        assert_eq!(screen.cursor(), (79, 23));
    }

    #[test]
    fn clear_resets_grid_cursor_and_raw_log() {
        let mut screen = filled(10, 10, 'A');
        screen.move_cursor(5, 5);
        lock_raw(&screen.raw_handle()).append(b"some bytes");

        screen.clear();

        assert_eq!(screen.cursor(), (0, 0));
        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(*screen.cell(x, y).unwrap(), Cell::default());
            }
        }
        assert!(lock_raw(&screen.raw_handle()).is_empty());
        assert_eq!(screen.render(RenderFormat::Plain), "");
    }

    #[test]
    fn scroll_up_evicts_top_row_into_scrollback() {
        let mut screen = Screen::new(5, 3);
        for y in 0..3 {
            for x in 0..5 {
                screen.set_cell(
                    x,
                    y,
                    Cell {
                        ch: (b'A' + y as u8) as char,
                        ..Cell::default()
                    },
                );
            }
        }

        screen.scroll_up();

        assert_eq!(row_text(&screen, 0), "BBBBB");
        assert_eq!(row_text(&screen, 1), "CCCCC");
        assert_eq!(row_text(&screen, 2), "     ");
        assert_eq!(screen.scrollback_len(), 1);
        assert_eq!(screen.scrollback_rows()[0][0].ch, 'A');
    }

    #[test]
    fn scroll_up_height_times_fills_scrollback() {
        let height = 24;
        let mut screen = Screen::new(80, height);
        for _ in 0..height {
            screen.scroll_up();
        }
        assert_eq!(screen.scrollback_len(), height);
    }

    #[test]
    fn scrollback_is_bounded_and_fifo() {
        let mut screen = Screen::new(4, 2);
        for i in 0..SCROLLBACK_LIMIT + 5 {
            screen.set_cell(
                0,
                0,
                Cell {
                    ch: char::from_digit((i % 10) as u32, 10).unwrap(),
                    ..Cell::default()
                },
            );
            screen.scroll_up();
        }
        assert_eq!(screen.scrollback_len(), SCROLLBACK_LIMIT);
        // The five oldest rows were evicted first.
        let rows = screen.scrollback_rows();
        assert_eq!(rows[0][0].ch, char::from_digit(5 % 10, 10).unwrap());
    }

    #[test]
    fn scroll_down_blanks_top_without_scrollback() {
        let mut screen = filled(5, 3, 'X');
        screen.scroll_down();
        assert_eq!(row_text(&screen, 0), "     ");
        assert_eq!(row_text(&screen, 1), "XXXXX");
        assert_eq!(screen.scrollback_len(), 0);
    }

    #[test]
    fn insert_and_delete_lines_shift_and_clip() {
        let mut screen = Screen::new(3, 4);
        for y in 0..4 {
            screen.set_cell(
                0,
                y,
                Cell {
                    ch: (b'a' + y as u8) as char,
                    ..Cell::default()
                },
            );
        }

        screen.insert_lines(1, 2);
        assert_eq!(screen.cell(0, 0).unwrap().ch, 'a');
        assert_eq!(screen.cell(0, 1).unwrap().ch, ' ');
        assert_eq!(screen.cell(0, 2).unwrap().ch, ' ');
        assert_eq!(screen.cell(0, 3).unwrap().ch, 'b');

        screen.delete_lines(1, 2);
        assert_eq!(screen.cell(0, 0).unwrap().ch, 'a');
        assert_eq!(screen.cell(0, 1).unwrap().ch, 'b');
        assert_eq!(screen.cell(0, 2).unwrap().ch, ' ');
        assert_eq!(screen.cell(0, 3).unwrap().ch, ' ');
    }

    #[test]
    fn insert_and_delete_chars_shift_within_row() {
        let mut screen = Screen::new(5, 1);
        for (x, ch) in "abcde".chars().enumerate() {
            screen.set_cell(x, 0, Cell { ch, ..Cell::default() });
        }

        screen.insert_chars(1, 0, 2);
        assert_eq!(row_text(&screen, 0), "a  bc");

        screen.delete_chars(1, 0, 2);
        assert_eq!(row_text(&screen, 0), "abc  ");
    }

    #[test]
    fn resize_preserves_top_left_region() {
        let mut screen = Screen::new(10, 10);
        for y in 0..10 {
            for x in 0..10 {
                screen.set_cell(
                    x,
                    y,
                    Cell {
                        ch: char::from_digit(((x + y) % 10) as u32, 10).unwrap(),
                        ..Cell::default()
                    },
                );
            }
        }
        screen.move_cursor(5, 5);

        screen.resize(5, 5);
        assert_eq!(screen.size(), (5, 5));
        assert_eq!(screen.cursor(), (4, 4));
        assert_eq!(screen.cell(0, 0).unwrap().ch, '0');

        screen.resize(15, 15);
        assert_eq!(screen.cell(10, 10).unwrap().ch, ' ');
        // The shared 5x5 region survived both resizes.
        for y in 0..5 {
            for x in 0..5 {
                assert_eq!(
                    screen.cell(x, y).unwrap().ch,
                    char::from_digit(((x + y) % 10) as u32, 10).unwrap()
                );
            }
        }
    }

    #[test]
    fn render_plain_trims_only_the_tail() {
        let mut screen = Screen::new(10, 3);
        for (x, ch) in "Hello".chars().enumerate() {
            screen.set_cell(x, 0, Cell { ch, ..Cell::default() });
        }
        for (x, ch) in "World".chars().enumerate() {
            screen.set_cell(x, 1, Cell { ch, ..Cell::default() });
        }

        let rendered = screen.render(RenderFormat::Plain);
        let lines: Vec<&str> = rendered.split('\n').collect();
        assert!(lines[0].starts_with("Hello"));
        assert!(lines[1].starts_with("World"));
        assert!(!rendered.ends_with('\n'));
    }

    #[test]
    fn render_ansi_marks_cursor_and_spaces() {
        let mut screen = Screen::new(3, 1);
        screen.set_cell(0, 0, Cell { ch: 'a', ..Cell::default() });
        screen.move_cursor(1, 0);
        assert_eq!(screen.render(RenderFormat::Ansi), "a▮·");
    }

    #[test]
    fn render_raw_emits_minimal_sgr_runs() {
        let mut screen = Screen::new(3, 1);
        let red = Color::Rgb(170, 0, 0);
        screen.set_cell(0, 0, Cell { ch: 'R', fg: red, ..Cell::default() });
        screen.set_cell(1, 0, Cell { ch: 'e', fg: red, ..Cell::default() });
        screen.move_cursor(2, 0);

        let out = screen.render(RenderFormat::Raw);
        assert!(out.starts_with("\x1b[0m"));
        // One SGR for the red run, one reset for the trailing default cell.
        assert_eq!(out.matches("\x1b[38;2;170;0;0m").count(), 1);
        assert!(out.ends_with("\x1b[1;3H"));
    }

    #[test]
    fn render_scrollback_prepends_history() {
        let mut screen = Screen::new(3, 2);
        for (x, ch) in "old".chars().enumerate() {
            screen.set_cell(x, 0, Cell { ch, ..Cell::default() });
        }
        screen.scroll_up();
        for (x, ch) in "new".chars().enumerate() {
            screen.set_cell(x, 1, Cell { ch, ..Cell::default() });
        }

        let out = screen.render(RenderFormat::Scrollback);
        assert!(out.starts_with("old\n"));
        assert!(out.ends_with("new"));
    }

    #[test]
    fn raw_log_caps_size_and_keeps_tail() {
        let mut log = RawLog::default();
        let chunk = vec![b'A'; 512 * 1024];
        log.append(&chunk);
        log.append(&chunk);
        log.append(b"END");

        assert!(log.len() <= RAW_LOG_CAP);
        assert!(log.as_bytes().ends_with(b"END"));
    }

    #[test]
    fn raw_log_survives_oversized_single_write() {
        let mut log = RawLog::default();
        let big = vec![b'B'; 3 * RAW_LOG_CAP];
        log.append(&big);
        assert!(log.len() <= RAW_LOG_CAP);
        assert!(log.as_bytes().iter().all(|&b| b == b'B'));
    }

    #[test]
    fn build_sgr_all_default_is_reset() {
        assert_eq!(
            build_sgr(Color::Default, Color::Default, AttrFlags::empty()),
            "\x1b[0m"
        );
        assert_eq!(
            build_sgr(Color::Rgb(1, 2, 3), Color::Default, AttrFlags::BOLD),
            "\x1b[1;38;2;1;2;3m"
        );
    }
}
