//! Host routines callable from jitted code. The JIT resolves these by name
//! from the running process, so they must keep their unmangled symbols.

use std::io::Write;

/// Writes the truncated value as a single character. Always returns 0.
#[no_mangle]
pub extern "C" fn putchard(x: f64) -> f64 {
    let _ = std::io::stderr().write_all(&[x as u8]);
    0.0
}

/// Writes the value followed by a newline. Always returns 0.
#[no_mangle]
pub extern "C" fn printd(x: f64) -> f64 {
    eprintln!("{}", x);
    0.0
}

// Referenced so the linker cannot strip the symbols out from under the JIT.
#[used]
static KEEP_INTRINSICS: [extern "C" fn(f64) -> f64; 2] = [putchard, printd];
