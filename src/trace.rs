//! Decoding of ACPI method trace lines emitted by BIOS debug builds.
//!
//! With `trace_state=method` the ACPICA interpreter logs every `Debug`
//! store of the traced method as an `ex_trace_args` line carrying a printf
//! style format string followed by its raw arguments. This module turns
//! those back into the text the firmware author intended.

use std::fmt::Write as _;

/// Marker of a bare method trace point.
const TRACE_POINT: &str = "ex_trace_point";

/// Marker of a formatted trace line.
const TRACE_ARGS: &str = "ex_trace_args";

/// Marker of a queued ACPI `Notify()` dispatch.
const NOTIFY_QUEUE: &str = "ev_queue_notify_reques";

/// Classification of one kernel log line with respect to BIOS tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLine {
    /// A bare `ex_trace_point` line; recognized but carries nothing to show.
    Point,
    /// A fully decoded `ex_trace_args` line.
    Decoded(String),
    /// A queued `Notify()` dispatch, trimmed of its node pointer.
    Notify(String),
    /// A trace line that does not follow the expected grammar.
    Malformed(TraceError),
}

/// Why a trace line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// No quoted format string followed by arguments.
    #[error("no quoted format string followed by arguments")]
    NoFormat,
    /// The format consumes more arguments than the line carries.
    #[error("format needs argument {index} but only {available} given")]
    MissingArgument {
        /// Zero-based specifier index.
        index: usize,
        /// Arguments present on the line.
        available: usize,
    },
    /// An argument is not a number in either base.
    #[error("argument {0:?} is not numeric")]
    BadArgument(String),
    /// The format uses a conversion other than `%x`, `%X`, `%d` or `%D`.
    #[error("unsupported conversion %{0}")]
    UnsupportedConversion(char),
    /// The format ends with a lone `%`.
    #[error("format ends with a dangling %")]
    Truncated,
}

/// Classify a kernel log line.
///
/// Returns `None` when the line is not a BIOS trace line at all.
pub fn decode_line(line: &str) -> Option<TraceLine> {
    if line.contains(TRACE_POINT) {
        return Some(TraceLine::Point);
    }
    if let Some((_, rest)) = line.split_once(TRACE_ARGS) {
        let payload = rest.trim_start().trim_start_matches(':').trim();
        return Some(match decode_args(payload) {
            Ok(text) => TraceLine::Decoded(text),
            Err(e) => TraceLine::Malformed(e),
        });
    }
    if let Some((_, rest)) = line.split_once(NOTIFY_QUEUE) {
        // Without a message body the line is ordinary kernel output.
        let (_, body) = rest.split_once(": ")?;
        let text = body.split("Node").next().unwrap_or(body).trim();
        return Some(TraceLine::Notify(text.to_owned()));
    }
    None
}

/// Decode the payload of an `ex_trace_args` line.
///
/// The payload is `"<format>", arg, arg, ...`. The literal `\n` escape is
/// removed from the format. Arguments are taken in order for each
/// specifier; surplus trailing arguments are ignored.
///
/// # Errors
///
/// Returns a [`TraceError`] when the payload does not match the grammar,
/// an argument cannot be parsed, or the format needs more arguments than
/// are present.
pub fn decode_args(payload: &str) -> Result<String, TraceError> {
    let inner = payload.strip_prefix('"').ok_or(TraceError::NoFormat)?;
    let (format, tail) = inner.split_once('"').ok_or(TraceError::NoFormat)?;
    if !tail.starts_with(',') {
        return Err(TraceError::NoFormat);
    }
    let format = format.trim().replace("\\n", "");
    let args: Vec<&str> = tail
        .trim_matches(|c| c == ',' || c == ' ')
        .split(',')
        .map(str::trim)
        .collect();
    format_args_list(&format, &args)
}

/// Apply `args` to a printf style `format` that only knows integer
/// conversions.
///
/// # Errors
///
/// See [`decode_args`].
pub fn format_args_list(format: &str, args: &[&str]) -> Result<String, TraceError> {
    let mut out = String::with_capacity(format.len());
    let mut next = 0usize;
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let spec = chars.next().ok_or(TraceError::Truncated)?;
        let hex = match spec {
            '%' => {
                out.push('%');
                continue;
            }
            'x' | 'X' => true,
            'd' | 'D' => false,
            other => return Err(TraceError::UnsupportedConversion(other)),
        };
        let raw = args.get(next).ok_or(TraceError::MissingArgument {
            index: next,
            available: args.len(),
        })?;
        let value = parse_argument(raw, hex)?;
        next = next.saturating_add(1);

        let sign = if value < 0 { "-" } else { "" };
        let magnitude = value.unsigned_abs();
        // Writing into a String cannot fail.
        let _ = match spec {
            'x' => write!(out, "{sign}{magnitude:x}"),
            'X' => write!(out, "{sign}{magnitude:X}"),
            _ => write!(out, "{value}"),
        };
    }
    Ok(out)
}

/// Convert one raw argument for the given conversion.
///
/// `Unknown` stands for a value the interpreter could not resolve and maps
/// to -1. Hex conversions parse base 16; decimal conversions try base 10
/// and then base 16.
fn parse_argument(raw: &str, hex: bool) -> Result<i64, TraceError> {
    if raw == "Unknown" {
        return Ok(-1);
    }
    let parsed = if hex {
        parse_hex(raw)
    } else {
        raw.parse::<i64>().ok().or_else(|| parse_hex(raw))
    };
    parsed.ok_or_else(|| TraceError::BadArgument(raw.to_owned()))
}

fn parse_hex(raw: &str) -> Option<i64> {
    let (negative, body) = match raw.strip_prefix('-') {
        Some(b) => (true, b),
        None => (false, raw),
    };
    let digits = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
        .unwrap_or(body);
    let value = i64::from_str_radix(digits, 16).ok()?;
    if negative {
        value.checked_neg()
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_literal_passes_through() {
        let out = format_args_list("100%% done %d", &["5"]).expect("format");
        assert_eq!(out, "100% done 5");
    }

    #[test]
    fn negative_hex_keeps_sign() {
        let out = format_args_list("%X", &["Unknown"]).expect("format");
        assert_eq!(out, "-1");
    }

    #[test]
    fn decimal_falls_back_to_hex() {
        let out = format_args_list("%d", &["1f"]).expect("format");
        assert_eq!(out, "31");
    }
}
