//! VT sequence parser
//!
//! Byte-driven state machine that interprets ANSI/VT escape sequences and
//! mutates a bound [`Screen`]. The parser owns the current graphic rendition
//! (foreground, background, attributes) and the saved-cursor slot.

use super::screen::{AttrFlags, Cell, Color, Screen};

/// The 8-color base palette.
const BASE_PALETTE: [(u8, u8, u8); 8] = [
    (0, 0, 0),
    (170, 0, 0),
    (0, 170, 0),
    (170, 85, 0),
    (0, 0, 170),
    (170, 0, 170),
    (0, 170, 170),
    (170, 170, 170),
];

/// The bright palette, indexes 8-15 of the 256-color table.
const BRIGHT_PALETTE: [(u8, u8, u8); 8] = [
    (85, 85, 85),
    (255, 85, 85),
    (85, 255, 85),
    (255, 255, 85),
    (85, 85, 255),
    (255, 85, 255),
    (85, 255, 255),
    (255, 255, 255),
];

/// Translate a 256-color index into RGB: 16 palette entries, the 6x6x6 cube,
/// then the 24-step grayscale ramp.
pub(crate) fn color_256(index: usize) -> Color {
    let index = index & 0xff;
    match index {
        0..=7 => {
            let (r, g, b) = BASE_PALETTE[index];
            Color::Rgb(r, g, b)
        }
        8..=15 => {
            let (r, g, b) = BRIGHT_PALETTE[index - 8];
            Color::Rgb(r, g, b)
        }
        16..=231 => {
            let c = index - 16;
            let r = (c / 36) as u8 * 51;
            let g = ((c / 6) % 6) as u8 * 51;
            let b = (c % 6) as u8 * 51;
            Color::Rgb(r, g, b)
        }
        _ => {
            let gray = (8 + (index - 232) * 10) as u8;
            Color::Rgb(gray, gray, gray)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    Csi,
    Osc,
    Dcs,
    Charset,
}

#[derive(Clone, Copy, Debug)]
struct SavedCursor {
    x: usize,
    y: usize,
    fg: Color,
    bg: Color,
    attrs: AttrFlags,
}

/// Parser state machine.
pub struct VtParser {
    state: ParserState,
    buf: Vec<u8>,
    fg: Color,
    bg: Color,
    attrs: AttrFlags,
    saved: Option<SavedCursor>,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            buf: Vec::with_capacity(16),
            fg: Color::Default,
            bg: Color::Default,
            attrs: AttrFlags::empty(),
            saved: None,
        }
    }

    pub fn feed_bytes(&mut self, data: &[u8], screen: &mut Screen) {
        for &byte in data {
            self.feed(byte, screen);
        }
    }

    /// Feed a single byte to the parser.
    pub fn feed(&mut self, byte: u8, screen: &mut Screen) {
        match self.state {
            ParserState::Ground => self.ground(byte, screen),
            ParserState::Escape => self.escape(byte, screen),
            ParserState::Csi => self.csi(byte, screen),
            ParserState::Osc => self.osc(byte),
            ParserState::Dcs => self.dcs(byte),
            ParserState::Charset => {
                // One designator byte absorbed and discarded.
                self.state = ParserState::Ground;
            }
        }
    }

    fn ground(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            0x1b => {
                self.state = ParserState::Escape;
                self.buf.clear();
            }
            b'\r' => {
                let (_, y) = screen.cursor();
                screen.move_cursor(0, y);
            }
            b'\n' => self.linefeed(screen),
            b'\t' => {
                let (x, y) = screen.cursor();
                let (w, _) = screen.size();
                let next = (((x / 8) + 1) * 8).min(w - 1);
                screen.move_cursor(next, y);
            }
            0x08 => {
                let (x, y) = screen.cursor();
                if x > 0 {
                    screen.move_cursor(x - 1, y);
                }
            }
            0x20..=0x7e => self.put_char(byte as char, screen),
            // Other C0 controls and non-ASCII bytes are ignored.
            _ => {}
        }
    }

    fn put_char(&mut self, ch: char, screen: &mut Screen) {
        let (x, y) = screen.cursor();
        let (w, _) = screen.size();
        screen.set_cell(
            x,
            y,
            Cell {
                ch,
                fg: self.fg,
                bg: self.bg,
                attrs: self.attrs,
            },
        );
        if x + 1 < w {
            screen.move_cursor(x + 1, y);
        } else {
            screen.move_cursor(0, y);
            self.linefeed(screen);
        }
    }

    /// Advance the row, scrolling at the bottom. The column is preserved;
    /// a logical newline is `\r\n`.
    fn linefeed(&mut self, screen: &mut Screen) {
        let (x, y) = screen.cursor();
        let (_, h) = screen.size();
        if y + 1 >= h {
            screen.scroll_up();
            screen.move_cursor(x, h - 1);
        } else {
            screen.move_cursor(x, y + 1);
        }
    }

    fn escape(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            b'[' => {
                self.state = ParserState::Csi;
                self.buf.clear();
                return;
            }
            b']' => {
                self.state = ParserState::Osc;
                self.buf.clear();
                return;
            }
            b'P' => {
                self.state = ParserState::Dcs;
                self.buf.clear();
                return;
            }
            b'(' | b')' | b'*' | b'+' => {
                self.state = ParserState::Charset;
                return;
            }
            b'c' => {
                // RIS - full reset
                screen.clear();
                self.fg = Color::Default;
                self.bg = Color::Default;
                self.attrs = AttrFlags::empty();
                self.saved = None;
            }
            b'D' => self.linefeed(screen), // IND
            b'M' => {
                // RI - reverse index
                let (x, y) = screen.cursor();
                if y > 0 {
                    screen.move_cursor(x, y - 1);
                } else {
                    screen.scroll_down();
                }
            }
            b'E' => {
                // NEL - next line
                let (_, y) = screen.cursor();
                screen.move_cursor(0, y);
                self.linefeed(screen);
            }
            b'7' => self.save_cursor(screen), // DECSC
            b'8' => self.restore_cursor(screen), // DECRC
            _ => {}
        }
        self.state = ParserState::Ground;
    }

    fn csi(&mut self, byte: u8, screen: &mut Screen) {
        if (0x20..=0x3f).contains(&byte) {
            self.buf.push(byte);
            return;
        }
        self.execute_csi(byte, screen);
        self.state = ParserState::Ground;
    }

    fn osc(&mut self, byte: u8) {
        // Terminated by BEL or ST (ESC \); the payload has no visible effect.
        match byte {
            0x07 => self.state = ParserState::Ground,
            b'\\' if self.buf.last() == Some(&0x1b) => self.state = ParserState::Ground,
            _ => self.buf.push(byte),
        }
    }

    fn dcs(&mut self, byte: u8) {
        // Terminated by ST; payload discarded.
        if byte == b'\\' && self.buf.last() == Some(&0x1b) {
            self.state = ParserState::Ground;
        } else {
            self.buf.push(byte);
        }
    }

    fn execute_csi(&mut self, final_byte: u8, screen: &mut Screen) {
        let params = parse_params(&self.buf);
        let (x, y) = screen.cursor();
        let (w, h) = screen.size();

        match final_byte {
            b'A' => screen.move_cursor(x, y.saturating_sub(n1(&params))),
            b'B' => screen.move_cursor(x, y + n1(&params)),
            b'C' => screen.move_cursor(x + n1(&params), y),
            b'D' => screen.move_cursor(x.saturating_sub(n1(&params)), y),
            b'G' => screen.move_cursor(n1(&params) - 1, y),
            b'd' => screen.move_cursor(x, n1(&params) - 1),
            b'H' | b'f' => {
                let row = params.first().copied().filter(|&n| n > 0).unwrap_or(1);
                let col = params.get(1).copied().filter(|&n| n > 0).unwrap_or(1);
                screen.move_cursor(col - 1, row - 1);
            }
            b'J' => match params.first().copied().unwrap_or(0) {
                0 => {
                    self.erase_span(screen, y, x, w);
                    for row in y + 1..h {
                        screen.clear_line(row);
                    }
                }
                1 => {
                    for row in 0..y {
                        screen.clear_line(row);
                    }
                    self.erase_span(screen, y, 0, x + 1);
                }
                2 => screen.clear(),
                _ => {}
            },
            b'K' => match params.first().copied().unwrap_or(0) {
                0 => self.erase_span(screen, y, x, w),
                1 => self.erase_span(screen, y, 0, x + 1),
                2 => screen.clear_line(y),
                _ => {}
            },
            b'm' => self.select_graphic_rendition(&params),
            b's' => self.save_cursor(screen),
            b'u' => self.restore_cursor(screen),
            b'L' => screen.insert_lines(y, n1(&params)),
            b'M' => screen.delete_lines(y, n1(&params)),
            b'P' => screen.delete_chars(x, y, n1(&params)),
            b'@' => screen.insert_chars(x, y, n1(&params)),
            b'X' => {
                let end = (x + n1(&params)).min(w);
                self.erase_span(screen, y, x, end);
            }
            _ => {
                // Acknowledged but not implemented; the grid must not change.
                tracing::debug!(
                    params = ?params,
                    final_byte = %(final_byte as char),
                    "ignoring unknown CSI sequence"
                );
            }
        }
    }

    /// Fill `[x0, x1)` on `row` with spaces in the current colors.
    fn erase_span(&self, screen: &mut Screen, row: usize, x0: usize, x1: usize) {
        for x in x0..x1 {
            screen.set_cell(
                x,
                row,
                Cell {
                    ch: ' ',
                    fg: self.fg,
                    bg: self.bg,
                    attrs: AttrFlags::empty(),
                },
            );
        }
    }

    fn select_graphic_rendition(&mut self, params: &[usize]) {
        if params.is_empty() {
            self.reset_rendition();
            return;
        }

        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.reset_rendition(),
                1 => self.attrs |= AttrFlags::BOLD,
                3 => self.attrs |= AttrFlags::ITALIC,
                4 => self.attrs |= AttrFlags::UNDERLINE,
                5 => self.attrs |= AttrFlags::BLINK,
                7 => self.attrs |= AttrFlags::REVERSE,
                8 => self.attrs |= AttrFlags::HIDDEN,
                22 => self.attrs -= AttrFlags::BOLD,
                23 => self.attrs -= AttrFlags::ITALIC,
                24 => self.attrs -= AttrFlags::UNDERLINE,
                25 => self.attrs -= AttrFlags::BLINK,
                27 => self.attrs -= AttrFlags::REVERSE,
                28 => self.attrs -= AttrFlags::HIDDEN,
                30..=37 => {
                    let (r, g, b) = BASE_PALETTE[params[i] - 30];
                    self.fg = Color::Rgb(r, g, b);
                }
                39 => self.fg = Color::Default,
                40..=47 => {
                    let (r, g, b) = BASE_PALETTE[params[i] - 40];
                    self.bg = Color::Rgb(r, g, b);
                }
                49 => self.bg = Color::Default,
                38 => {
                    if params.get(i + 1) == Some(&5) {
                        if let Some(&index) = params.get(i + 2) {
                            self.fg = color_256(index);
                            i += 2;
                        }
                    }
                }
                48 => {
                    if params.get(i + 1) == Some(&5) {
                        if let Some(&index) = params.get(i + 2) {
                            self.bg = color_256(index);
                            i += 2;
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn reset_rendition(&mut self) {
        self.fg = Color::Default;
        self.bg = Color::Default;
        self.attrs = AttrFlags::empty();
    }

    fn save_cursor(&mut self, screen: &Screen) {
        let (x, y) = screen.cursor();
        self.saved = Some(SavedCursor {
            x,
            y,
            fg: self.fg,
            bg: self.bg,
            attrs: self.attrs,
        });
    }

    fn restore_cursor(&mut self, screen: &mut Screen) {
        if let Some(saved) = self.saved {
            screen.move_cursor(saved.x, saved.y);
            self.fg = saved.fg;
            self.bg = saved.bg;
            self.attrs = saved.attrs;
        }
    }

    #[cfg(test)]
    pub(crate) fn rendition(&self) -> (Color, Color, AttrFlags) {
        (self.fg, self.bg, self.attrs)
    }
}

/// Split the intermediate buffer on `;`. Empty entries and parse failures
/// yield 0.
fn parse_params(buf: &[u8]) -> Vec<usize> {
    if buf.is_empty() {
        return Vec::new();
    }
    String::from_utf8_lossy(buf)
        .split(';')
        .map(|part| part.parse::<usize>().unwrap_or(0))
        .collect()
}

/// Default count parameter: 1 when absent or 0.
fn n1(params: &[usize]) -> usize {
    params.first().copied().filter(|&n| n > 0).unwrap_or(1)
}
