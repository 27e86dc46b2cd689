//! Key mapping for terminal input
//!
//! Translates symbolic key names into the byte sequences a VT100/xterm
//! application expects. Anything that is not a recognized name passes
//! through verbatim.

use std::borrow::Cow;

/// Map a requested keys string to the bytes to inject into the PTY.
///
/// If the whole input matches a known name, its sequence is returned.
/// Lookup is case-sensitive, with a single fallback: lowercase the input and
/// capitalize the first letter of each alphabetic run (`ctrl+c` becomes
/// `Ctrl+C`). Everything else is UTF-8 passthrough.
pub fn map_keys(input: &str) -> Cow<'_, str> {
    if let Some(seq) = lookup(input) {
        return seq;
    }
    let titled = title_case(&input.to_lowercase());
    if titled != input {
        if let Some(seq) = lookup(&titled) {
            return seq;
        }
    }
    Cow::Borrowed(input)
}

fn lookup(name: &str) -> Option<Cow<'static, str>> {
    if let Some(letter) = name.strip_prefix("Ctrl+") {
        let mut chars = letter.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_uppercase() {
                let ctrl = (c as u8 - b'A' + 1) as char;
                return Some(Cow::Owned(ctrl.to_string()));
            }
        }
        return None;
    }

    let seq: &'static str = match name {
        "Enter" => "\r",
        "Tab" => "\t",
        "Backspace" => "\x7f",
        "Escape" => "\x1b",
        "Space" => " ",
        "Delete" => "\x1b[3~",

        "Up" => "\x1b[A",
        "Down" => "\x1b[B",
        "Right" => "\x1b[C",
        "Left" => "\x1b[D",

        "F1" => "\x1bOP",
        "F2" => "\x1bOQ",
        "F3" => "\x1bOR",
        "F4" => "\x1bOS",
        "F5" => "\x1b[15~",
        "F6" => "\x1b[17~",
        "F7" => "\x1b[18~",
        "F8" => "\x1b[19~",
        "F9" => "\x1b[20~",
        "F10" => "\x1b[21~",
        "F11" => "\x1b[23~",
        "F12" => "\x1b[24~",

        "Home" => "\x1b[H",
        "End" => "\x1b[F",
        "PageUp" => "\x1b[5~",
        "PageDown" => "\x1b[6~",
        "Insert" => "\x1b[2~",

        _ => return None,
    };
    Some(Cow::Borrowed(seq))
}

/// Capitalize the first letter of each alphabetic run.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() && !prev_is_letter {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        prev_is_letter = c.is_alphabetic();
    }
    out
}
