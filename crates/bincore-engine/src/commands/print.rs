//! Text rendering for the print commands

use std::fmt::Write;

/// Classic hexdump: address, `cols` hex bytes, printable ASCII
pub fn hexdump(addr: u64, bytes: &[u8], cols: usize) -> String {
    let cols = cols.max(1);
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(cols).enumerate() {
        let _ = write!(out, "0x{:08x} ", addr.wrapping_add((row * cols) as u64));
        for i in 0..cols {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, " {:02x}", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  ");
        out.extend(chunk.iter().map(|&b| printable(b)));
        out.push('\n');
    }
    out
}

fn printable(b: u8) -> char {
    if b.is_ascii_graphic() || b == b' ' {
        b as char
    } else {
        '.'
    }
}

/// Bytes as one contiguous lowercase hex string
pub fn hex_string(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
