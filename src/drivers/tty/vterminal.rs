//! The virtual terminal: the echo sink for a TTY.
//!
//! Keeps the bytes of the line currently on screen so the line can be
//! redrawn from the discipline's raw snapshot. Under test, everything
//! echoed is also captured for assertions.

use crate::config::LDISC_BUFFER_SIZE;
use crate::console;
use crate::drivers::tty::ldisc::BS;

pub struct VTerminal {
    /// Bytes of the line currently displayed
    line: heapless::Vec<u8, LDISC_BUFFER_SIZE>,

    #[cfg(test)]
    captured: heapless::Vec<u8, 1024>,
}

impl VTerminal {
    pub const fn new() -> Self {
        Self {
            line: heapless::Vec::new(),
            #[cfg(test)]
            captured: heapless::Vec::new(),
        }
    }

    fn emit(&mut self, byte: u8) {
        console::put_byte(byte);
        #[cfg(test)]
        let _ = self.captured.push(byte);
    }

    /// Write bytes to the display, tracking the current line.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\n' => self.line.clear(),
                BS => {
                    self.line.pop();
                }
                _ => {
                    let _ = self.line.push(b);
                }
            }
            self.emit(b);
        }
    }

    /// Echo one freshly typed character.
    pub fn key_pressed(&mut self, c: u8) {
        let _ = self.line.push(c);
        self.emit(c);
    }

    /// Replace the displayed line with the discipline's raw snapshot.
    pub fn redraw_line(&mut self, raw: &[u8]) {
        self.line.clear();
        let _ = self.line.extend_from_slice(raw);
    }

    /// Bytes of the line currently displayed.
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    #[cfg(test)]
    pub fn captured(&self) -> &[u8] {
        &self.captured
    }
}

impl Default for VTerminal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_tracking() {
        let mut term = VTerminal::new();
        term.key_pressed(b'h');
        term.key_pressed(b'i');
        assert_eq!(term.line(), b"hi");

        term.write(&[BS]);
        assert_eq!(term.line(), b"h");

        term.write(b"\n");
        assert_eq!(term.line(), b"");
        assert_eq!(term.captured(), b"hi\x08\n");
    }

    #[test]
    fn test_redraw_replaces_line() {
        let mut term = VTerminal::new();
        term.key_pressed(b'x');
        term.redraw_line(b"restored");
        assert_eq!(term.line(), b"restored");
    }
}
