//! Built-in native functions
//!
//! Intrinsics are ordinary Rust functions with the C calling convention.
//! Compiled code calls them through `x16` like any other native function;
//! each returns a [`Checked`] pair so the error code lands in `x1`.
//!
//! The printing words are interpreter-only: they write to the host's
//! stdout and must never end up in a standalone image.

use std::io::Write;
use std::sync::LazyLock;

/// Error code raised by `/` and `mod` on a zero divisor.
pub const DIVISION_BY_ZERO: i64 = 1;

/// Result of an intrinsic: `value` in `x0`, `error` in `x1`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checked {
    pub value: i64,
    pub error: i64,
}

impl Checked {
    const fn ok(value: i64) -> Checked {
        Checked { value, error: 0 }
    }

    const fn raise(error: i64) -> Checked {
        Checked { value: 0, error }
    }
}

/// One entry of the intrinsic table.
#[derive(Debug, Clone)]
pub struct Intrinsic {
    pub name: &'static str,
    pub inputs: usize,
    pub outputs: usize,
    pub throws: bool,
    pub interpreter_only: bool,
    /// Address of the `extern "C"` function
    pub function: usize,
}

type Unary = extern "C" fn(i64) -> Checked;
type Binary = extern "C" fn(i64, i64) -> Checked;
type Nullary = extern "C" fn() -> Checked;

pub static INTRINSICS: LazyLock<Vec<Intrinsic>> = LazyLock::new(|| {
    vec![
        Intrinsic {
            name: ".",
            inputs: 1,
            outputs: 0,
            throws: false,
            interpreter_only: true,
            function: print_number as Unary as usize,
        },
        Intrinsic {
            name: "emit",
            inputs: 1,
            outputs: 0,
            throws: false,
            interpreter_only: true,
            function: emit as Unary as usize,
        },
        Intrinsic {
            name: "cr",
            inputs: 0,
            outputs: 0,
            throws: false,
            interpreter_only: true,
            function: newline as Nullary as usize,
        },
        Intrinsic {
            name: "abs",
            inputs: 1,
            outputs: 1,
            throws: false,
            interpreter_only: false,
            function: abs as Unary as usize,
        },
        Intrinsic {
            name: "/",
            inputs: 2,
            outputs: 1,
            throws: true,
            interpreter_only: false,
            function: divide as Binary as usize,
        },
        Intrinsic {
            name: "mod",
            inputs: 2,
            outputs: 1,
            throws: true,
            interpreter_only: false,
            function: modulo as Binary as usize,
        },
    ]
});

fn write_stdout(bytes: &[u8]) {
    let mut out = std::io::stdout().lock();
    // Nowhere to report a failed write from inside compiled code
    let _ = out.write_all(bytes).and_then(|()| out.flush());
}

extern "C" fn print_number(value: i64) -> Checked {
    write_stdout(format!("{} ", value).as_bytes());
    Checked::ok(0)
}

extern "C" fn emit(value: i64) -> Checked {
    let ch = char::from_u32(value as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
    let mut buf = [0u8; 4];
    write_stdout(ch.encode_utf8(&mut buf).as_bytes());
    Checked::ok(0)
}

extern "C" fn newline() -> Checked {
    write_stdout(b"\n");
    Checked::ok(0)
}

extern "C" fn abs(value: i64) -> Checked {
    Checked::ok(value.wrapping_abs())
}

extern "C" fn divide(dividend: i64, divisor: i64) -> Checked {
    if divisor == 0 {
        return Checked::raise(DIVISION_BY_ZERO);
    }
    Checked::ok(dividend.wrapping_div(divisor))
}

extern "C" fn modulo(dividend: i64, divisor: i64) -> Checked {
    if divisor == 0 {
        return Checked::raise(DIVISION_BY_ZERO);
    }
    Checked::ok(dividend.wrapping_rem(divisor))
}
