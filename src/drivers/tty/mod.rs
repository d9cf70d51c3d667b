//! TTY devices: the line discipline wired to a virtual terminal.
//!
//! Keyboard input arrives through `key_pressed`, which edits the current
//! line, echoes, and wakes sleeping readers when a line commits. A read
//! on the TTY's device file drains cooked bytes, sleeping cancellably
//! until some exist.

pub mod ldisc;
pub mod vterminal;

use alloc::sync::Arc;
use spin::Mutex;

use crate::drivers::tty::ldisc::{KeyAction, Ldisc, BS};
use crate::drivers::tty::vterminal::VTerminal;
use crate::drivers::{chardev_register, CharDev, TTY_MAJOR};
use crate::errno::{Errno, KResult};
use crate::kern::sched::{WaitQueue, WaitResult};
use crate::kern::thread::KThread;
use crate::types::DevId;

/// A terminal device: discipline state behind one mutex, readers parked
/// on the queue beside it.
pub struct Tty {
    ldisc: Mutex<Ldisc>,
    read_queue: WaitQueue,
    term: Mutex<VTerminal>,
}

impl Tty {
    pub fn new() -> Self {
        Self {
            ldisc: Mutex::new(Ldisc::new()),
            read_queue: WaitQueue::new(),
            term: Mutex::new(VTerminal::new()),
        }
    }

    /// Deliver one character from the keyboard interrupt path.
    pub fn key_pressed(&self, c: u8) {
        let action = {
            let mut ld = self.ldisc.lock();
            ld.key_pressed(c)
        };
        self.echo(action);
        if action.wake {
            self.read_queue.wakeup_all();
        }
    }

    fn echo(&self, action: KeyAction) {
        match action.echo {
            Some(b'\n') => self.term.lock().write(b"\n"),
            Some(BS) => self.term.lock().write(&[BS]),
            Some(c) => self.term.lock().key_pressed(c),
            None => {}
        }
    }

    /// Read cooked bytes, sleeping until a line is available.
    ///
    /// Returns `EINTR` if the sleep is cancelled; the buffer state is
    /// untouched in that case.
    pub fn read(&self, thr: &Arc<KThread>, buf: &mut [u8]) -> KResult<usize> {
        let mut ld = self.ldisc.lock();
        while !ld.has_cooked() {
            let (guard, result) = self.read_queue.cancellable_sleep_on(&self.ldisc, ld, thr);
            ld = guard;
            if result == WaitResult::Interrupted {
                return Err(Errno::EINTR);
            }
        }
        Ok(ld.read(buf))
    }

    /// Snapshot of the raw line being edited, for screen redraw.
    pub fn current_line_raw(&self, s: &mut [u8]) -> usize {
        self.ldisc.lock().current_line_raw(s)
    }

    /// Redraw the terminal's current line from the discipline state.
    pub fn redraw(&self) {
        let mut raw = [0u8; crate::config::LDISC_BUFFER_SIZE];
        let n = self.current_line_raw(&mut raw);
        self.term.lock().redraw_line(&raw[..n]);
    }

    #[cfg(test)]
    fn echoed(&self) -> alloc::vec::Vec<u8> {
        self.term.lock().captured().to_vec()
    }
}

impl Default for Tty {
    fn default() -> Self {
        Self::new()
    }
}

impl CharDev for Tty {
    fn read(&self, thr: &Arc<KThread>, _pos: usize, buf: &mut [u8]) -> KResult<usize> {
        Tty::read(self, thr, buf)
    }

    fn write(&self, _pos: usize, buf: &[u8]) -> KResult<usize> {
        self.term.lock().write(buf);
        Ok(buf.len())
    }
}

/// Register the first terminal.
pub fn init() {
    let _ = chardev_register(DevId::new(TTY_MAJOR, 0), Arc::new(Tty::new()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::tty::ldisc::{EOT, ETX};

    fn type_line(tty: &Tty, s: &[u8]) {
        for &b in s {
            tty.key_pressed(b);
        }
    }

    #[test]
    fn test_read_returns_cooked_line() {
        let tty = Tty::new();
        let thr = KThread::new();
        type_line(&tty, b"hello\n");

        let mut buf = [0u8; 32];
        assert_eq!(tty.read(&thr, &mut buf), Ok(6));
        assert_eq!(&buf[..6], b"hello\n");
    }

    #[test]
    fn test_echo_policy() {
        let tty = Tty::new();
        type_line(&tty, b"ab");
        tty.key_pressed(BS);
        tty.key_pressed(b'\n');
        // EOT commits silently.
        tty.key_pressed(b'x');
        tty.key_pressed(EOT);
        // ETX echoes nothing either.
        tty.key_pressed(ETX);

        assert_eq!(tty.echoed(), b"ab\x08\nx");
    }

    #[test]
    fn test_reader_blocks_until_line_commits() {
        let tty = Arc::new(Tty::new());
        let thr = KThread::new();

        let reader = {
            let tty = Arc::clone(&tty);
            let thr = Arc::clone(&thr);
            std::thread::spawn(move || {
                let mut buf = [0u8; 16];
                let n = tty.read(&thr, &mut buf).unwrap();
                buf[..n].to_vec()
            })
        };

        type_line(&tty, b"ok");
        // No commit yet; give the reader a chance to park.
        while tty.read_queue.waiter_count() == 0 {
            std::thread::yield_now();
        }
        tty.key_pressed(b'\n');

        assert_eq!(reader.join().unwrap(), b"ok\n");
    }

    #[test]
    fn test_cancelled_reader_returns_eintr() {
        let tty = Arc::new(Tty::new());
        let thr = KThread::new();
        type_line(&tty, b"kept");

        let reader = {
            let tty = Arc::clone(&tty);
            let thr = Arc::clone(&thr);
            std::thread::spawn(move || {
                let mut buf = [0u8; 16];
                tty.read(&thr, &mut buf)
            })
        };

        while tty.read_queue.waiter_count() == 0 {
            std::thread::yield_now();
        }
        thr.cancel(Errno::EINTR.as_neg());

        assert_eq!(reader.join().unwrap(), Err(Errno::EINTR));

        // The raw line survived the cancelled wait.
        let mut raw = [0u8; 16];
        assert_eq!(tty.current_line_raw(&mut raw), 4);
        assert_eq!(&raw[..4], b"kept");
    }

    #[test]
    fn test_two_readers_see_disjoint_lines() {
        let tty = Arc::new(Tty::new());
        type_line(&tty, b"one\n");
        type_line(&tty, b"two\n");

        let t1 = KThread::new();
        let t2 = KThread::new();
        let mut buf = [0u8; 16];
        let n = tty.read(&t1, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"one\n");
        let n = tty.read(&t2, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"two\n");
    }

    #[test]
    fn test_redraw_uses_raw_snapshot() {
        let tty = Tty::new();
        type_line(&tty, b"partial");
        tty.redraw();
        assert_eq!(tty.term.lock().line(), b"partial");
    }
}
