//! JVM method and field descriptor parsing.
//!
//! Only the pieces the optimizer needs: argument counts, argument word
//! widths, return widths. Descriptors are assumed well-formed (they come out
//! of a parsed class file); a malformed descriptor simply ends the scan.

use smallvec::SmallVec;

/// Word widths of a method descriptor's arguments, in declaration order.
pub fn argument_widths(desc: &str) -> SmallVec<[u8; 8]> {
    let mut widths = SmallVec::new();
    let inner = match (desc.find('('), desc.find(')')) {
        (Some(open), Some(close)) if open < close => &desc[open + 1..close],
        _ => return widths,
    };
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            'J' | 'D' => widths.push(2),
            'B' | 'C' | 'F' | 'I' | 'S' | 'Z' => widths.push(1),
            'L' => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                }
                widths.push(1);
            }
            '[' => {
                // Consume the element type; the array reference itself is one word.
                let mut rest = chars.as_str().chars();
                while let Some(e) = rest.next() {
                    match e {
                        '[' => continue,
                        'L' => {
                            for c in rest.by_ref() {
                                if c == ';' {
                                    break;
                                }
                            }
                            break;
                        }
                        _ => break,
                    }
                }
                chars = rest;
                widths.push(1);
            }
            _ => break,
        }
    }
    widths
}

/// Number of declared arguments of a method descriptor.
pub fn argument_count(desc: &str) -> usize {
    argument_widths(desc).len()
}

/// Word width of a method descriptor's return value: 0 for void, 2 for
/// long/double, otherwise 1.
pub fn return_width(desc: &str) -> u8 {
    match desc.rfind(')').and_then(|i| desc[i + 1..].chars().next()) {
        Some('V') | None => 0,
        Some('J') | Some('D') => 2,
        Some(_) => 1,
    }
}

/// Word width of a field descriptor.
pub fn field_width(desc: &str) -> u8 {
    match desc.chars().next() {
        Some('J') | Some('D') => 2,
        _ => 1,
    }
}

/// True for reference-typed field descriptors (objects and arrays).
pub fn is_ref_type(desc: &str) -> bool {
    matches!(desc.chars().next(), Some('L') | Some('['))
}

/// Number of local-variable slots occupied by the parameters, including the
/// receiver of an instance method.
pub fn params_size(is_static: bool, desc: &str) -> u16 {
    let args: u16 = argument_widths(desc).iter().map(|w| u16::from(*w)).sum();
    if is_static {
        args
    } else {
        args + 1
    }
}
