//! Diagnostics: `show_alloc_mem`'s byte-exact dump of every live block.
//!
//! All number formatting here uses fixed stack buffers and a raw write,
//! never `core::fmt`'s heap-friendly machinery, because this function
//! must not re-enter the allocator.

use crate::os::write_stdout;
use crate::registry::Registry;
use crate::types::SizeClass;

/// Largest buffer a `usize` can need in either base: 20 decimal digits
/// or `2 + 16` hex digits (`0x` plus 16 nibbles) on a 64-bit target.
const NUMBUF_LEN: usize = 24;

fn write_str(s: &str) {
    write_stdout(s.as_bytes());
}

/// Format `n` in decimal with no leading zeros (`0` prints as `"0"`) and
/// write it directly, without going through an intermediate `String`.
fn write_decimal(n: usize) {
    let mut buf = [0u8; NUMBUF_LEN];
    let mut i = NUMBUF_LEN;
    let mut n = n;
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    write_stdout(&buf[i..]);
}

/// Format `n` as `0x` followed by upper-case hex with no leading zeros,
/// except `0` which prints as `0x0`.
fn write_hex(n: usize) {
    if n == 0 {
        write_str("0x0");
        return;
    }
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut buf = [0u8; NUMBUF_LEN];
    let mut i = NUMBUF_LEN;
    let mut n = n;
    while n > 0 {
        i -= 1;
        buf[i] = DIGITS[(n % 16) as usize];
        n /= 16;
    }
    write_str("0x");
    write_stdout(&buf[i..]);
}

/// Walk every zone in TINY, SMALL, LARGE order and print each zone's
/// live extents, ending with the grand total. Must be called with the
/// registry lock already held (see `lib.rs::show_alloc_mem`). Returns
/// the grand total so callers (and tests) can check it without
/// capturing the raw write to stdout.
pub fn dump(registry: &Registry) -> usize {
    let mut total = 0usize;
    for class in [SizeClass::Tiny, SizeClass::Small, SizeClass::Large] {
        for zone in registry.list(class).iter() {
            write_str(class.tag());
            write_str(" : ");
            write_hex(zone.base() as usize);
            write_str("\n");

            total += zone.for_each_live_block(|ptr, size| {
                write_hex(ptr as usize);
                write_str(" - ");
                write_hex(ptr as usize + size - 1);
                write_str(" : ");
                write_decimal(size);
                write_str(" bytes\n");
            });
        }
    }
    write_str("Total : ");
    write_decimal(total);
    write_str(" bytes\n");
    total
}
