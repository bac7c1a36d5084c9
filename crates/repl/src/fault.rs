//! Fault Diagnostics
//!
//! A bug in generated code shows up as a signal: a bad load or store
//! (SIGSEGV/SIGBUS), an invalid instruction (SIGILL) or a placeholder
//! `brk` that was never patched (SIGTRAP). The handlers print one line
//! saying which signal hit at what address, and whether that address lies
//! in JIT code, then re-raise with the default action.
//!
//! Everything on the handler path is async-signal-safe: no allocation, no
//! locks, a single `write(2)` to stderr.

use kiln_core::{Instruction, placeholder_tag};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

const SIGNALS: [libc::c_int; 4] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGTRAP];

/// Executable code range, `[start, end)`
static CODE_START: AtomicUsize = AtomicUsize::new(0);
static CODE_END: AtomicUsize = AtomicUsize::new(0);

/// Report faults inside `[start, end)` as JIT code.
pub fn set_code_range(start: usize, end: usize) {
    CODE_START.store(start, Ordering::Relaxed);
    CODE_END.store(end, Ordering::Relaxed);
}

/// Install the handlers for every fault signal.
pub fn install() -> io::Result<()> {
    for signal in SIGNALS {
        // SAFETY: `action` is fully initialised before use; the handler
        // only calls async-signal-safe functions
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void)
                as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_RESETHAND;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    tracing::debug!("fault handlers installed");
    Ok(())
}

extern "C" fn handler(signal: libc::c_int, info: *mut libc::siginfo_t, _context: *mut libc::c_void) {
    // SAFETY: the kernel passes a valid siginfo for SA_SIGINFO handlers
    let address = unsafe { fault_address(info) };
    let mut message = Message::new();
    describe(&mut message, signal, address);
    // SAFETY: write(2) and raise(3) are async-signal-safe; the disposition
    // was reset to the default on entry (SA_RESETHAND)
    unsafe {
        libc::write(libc::STDERR_FILENO, message.bytes().as_ptr().cast(), message.len);
        libc::raise(signal);
    }
}

#[cfg(target_os = "linux")]
unsafe fn fault_address(info: *mut libc::siginfo_t) -> usize {
    // SAFETY: caller guarantees `info` is valid
    unsafe { (*info).si_addr() as usize }
}

#[cfg(not(target_os = "linux"))]
unsafe fn fault_address(info: *mut libc::siginfo_t) -> usize {
    // SAFETY: caller guarantees `info` is valid
    unsafe { (*info).si_addr as usize }
}

fn describe(out: &mut Message, signal: libc::c_int, address: usize) {
    out.push(b"kiln: fatal ");
    out.push(signal_name(signal));
    out.push(b" at ");
    out.push_hex(address);
    let start = CODE_START.load(Ordering::Relaxed);
    let end = CODE_END.load(Ordering::Relaxed);
    if (start..end).contains(&address) {
        out.push(b" (JIT code +");
        out.push_hex(address - start);
        out.push(b")");
        if signal == libc::SIGTRAP && address % 4 == 0 {
            // SAFETY: the address is inside the mapped, readable code region
            let word = unsafe { std::ptr::read_volatile(address as *const u32) };
            if let Some(tag) = placeholder_tag(Instruction::from_raw(word)) {
                out.push(b": unpatched placeholder ");
                out.push_hex(tag as usize);
            }
        }
    }
    out.push(b"\n");
}

fn signal_name(signal: libc::c_int) -> &'static [u8] {
    match signal {
        libc::SIGSEGV => b"SIGSEGV",
        libc::SIGBUS => b"SIGBUS",
        libc::SIGILL => b"SIGILL",
        libc::SIGTRAP => b"SIGTRAP",
        _ => b"signal",
    }
}

/// Fixed-size message buffer; pushes past the end are truncated.
struct Message {
    buf: [u8; 160],
    len: usize,
}

impl Message {
    fn new() -> Self {
        Message { buf: [0; 160], len: 0 }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.len == self.buf.len() {
                return;
            }
            self.buf[self.len] = b;
            self.len += 1;
        }
    }

    fn push_hex(&mut self, value: usize) {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut digits = [0u8; 16];
        let mut n = value;
        let mut count = 0;
        loop {
            digits[15 - count] = DIGITS[n & 0xf];
            count += 1;
            n >>= 4;
            if n == 0 {
                break;
            }
        }
        self.push(b"0x");
        self.push(&digits[16 - count..]);
    }

    fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn render(signal: libc::c_int, address: usize) -> String {
        let mut message = Message::new();
        describe(&mut message, signal, address);
        String::from_utf8(message.bytes().to_vec()).unwrap()
    }

    #[test]
    fn test_hex_rendering() {
        let mut message = Message::new();
        message.push_hex(0);
        message.push(b" ");
        message.push_hex(0xdead_beef);
        assert_eq!(message.bytes(), b"0x0 0xdeadbeef");
    }

    #[test]
    fn test_message_truncates() {
        let mut message = Message::new();
        for _ in 0..100 {
            message.push(b"abc");
        }
        assert_eq!(message.len, 160);
    }

    #[test]
    #[serial]
    fn test_describes_faults_in_jit_code() {
        set_code_range(0x1000, 0x2000);
        assert_eq!(render(libc::SIGSEGV, 0x1010), "kiln: fatal SIGSEGV at 0x1010 (JIT code +0x10)\n");
        assert_eq!(render(libc::SIGBUS, 0x3000), "kiln: fatal SIGBUS at 0x3000\n");
        set_code_range(0, 0);
    }

    #[test]
    #[serial]
    fn test_names_unpatched_placeholder() {
        let words = [kiln_core::Placeholder::ReturnBranch.instruction().bits(); 2];
        let start = words.as_ptr() as usize;
        set_code_range(start, start + 8);
        let text = render(libc::SIGTRAP, start + 4);
        assert!(text.contains("(JIT code +0x4): unpatched placeholder 0x1"), "{}", text);
        set_code_range(0, 0);
    }

    #[test]
    #[serial]
    fn test_install_registers_handlers() {
        install().unwrap();
        for signal in SIGNALS {
            // SAFETY: querying the current action only
            let current = unsafe {
                let mut old: libc::sigaction = std::mem::zeroed();
                assert_eq!(libc::sigaction(signal, std::ptr::null(), &mut old), 0);
                old
            };
            assert_eq!(
                current.sa_sigaction,
                handler as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) as libc::sighandler_t
            );
        }
    }
}
