//! TE300x line protocol codec
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232, 115200 baud by default
//! - Terminator: CR (`\r`) on both commands and responses
//! - Single-letter queries (`V`, `I`, `N`) are sent bare, without terminator
//! - Parameter commands: `S<MHz>\r`, `E<MHz>\r`, `P<n>\r`, `F<MHz>\r`
//! - Configuration: `C<name>\r<value>\r`, confirmed with `<name>=<value>`
//! - Sweeps stream a header line, one `freq,mag,phase` line per point, then `END\r`
//!
//! Every read here is bounded by the transport timeout and converts an elapsed
//! deadline into [`AnalyserError::Timeout`].

use crate::adapters::{is_disconnect, Transport};
use crate::error::{AnalyserError, AppResult};
use std::io;
use std::time::Instant;
use tracing::{debug, trace};

/// Line terminator for commands and responses.
pub const TERMINATOR: u8 = b'\r';

/// Marks the end of a streamed sweep.
pub const SENTINEL: &[u8] = b"END\r";

/// The sentinel line with its terminator stripped.
pub const SENTINEL_LINE: &str = "END";

/// Longest response line accepted by default.
pub const DEFAULT_MAX_LINE_LEN: usize = 1000;

/// A command understood by the analyser.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    /// `V`: firmware version query.
    Version,
    /// `I`: output data format query.
    FormatQuery,
    /// `S<MHz>`: sweep start frequency, in Hz.
    StartFrequency(f64),
    /// `E<MHz>`: sweep stop frequency, in Hz.
    StopFrequency(f64),
    /// `P<n>`: number of sweep points.
    Points(u32),
    /// `C<name>\r<value>`: named configuration parameter.
    Configure {
        /// Parameter name, e.g. `averaging`.
        name: &'a str,
        /// Value as the device expects it.
        value: &'a str,
    },
    /// `N`: trigger a sweep.
    Trigger,
    /// `F<MHz>`: measure at a single frequency, in Hz.
    Single(f64),
}

impl Command<'_> {
    /// Bytes to put on the wire.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Version => encode_command("V", &[]),
            Command::FormatQuery => encode_command("I", &[]),
            Command::Trigger => encode_command("N", &[]),
            Command::StartFrequency(hz) => encode_command("S", &[&format_mhz(*hz)]),
            Command::StopFrequency(hz) => encode_command("E", &[&format_mhz(*hz)]),
            Command::Single(hz) => encode_command("F", &[&format_mhz(*hz)]),
            Command::Points(n) => encode_command("P", &[&n.to_string()]),
            Command::Configure { name, value } => encode_command("C", &[name, value]),
        }
    }
}

/// Frequency in Hz as the device's `MHz` argument with two decimals.
pub fn format_mhz(hz: f64) -> String {
    format!("{:.2}", hz / 1e6)
}

/// Encode `<verb><arg0>\r<arg1>\r...`.
///
/// A verb without arguments is a single-byte query and goes out bare.
pub fn encode_command(verb: &str, args: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(verb.len() + args.iter().map(|a| a.len() + 1).sum::<usize>());
    out.extend_from_slice(verb.as_bytes());
    for arg in args {
        out.extend_from_slice(arg.as_bytes());
        out.push(TERMINATOR);
    }
    out
}

/// Map a transport error onto the driver taxonomy.
pub(crate) fn link_error(err: io::Error) -> AnalyserError {
    if is_disconnect(&err) {
        AnalyserError::Disconnected(err.to_string())
    } else {
        AnalyserError::Io(err)
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Write one command and flush it.
pub fn send<T: Transport + ?Sized>(transport: &mut T, command: &Command<'_>) -> AppResult<()> {
    let bytes = command.encode();
    transport.write_all(&bytes).map_err(link_error)?;
    transport.flush().map_err(link_error)?;
    debug!("Sent command: {:?}", String::from_utf8_lossy(&bytes));
    Ok(())
}

/// Read one `\r`-terminated line and strip the terminator.
///
/// A line may hold up to `max_len` bytes before its terminator; one byte more
/// fails with [`AnalyserError::Truncated`]. The rest of an over-long line stays
/// in the input buffer.
pub fn read_line<T: Transport + ?Sized>(transport: &mut T, max_len: usize) -> AppResult<String> {
    let timeout = transport.timeout();
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match transport.read(&mut byte) {
            Ok(0) => {
                return Err(AnalyserError::Disconnected(
                    "unexpected EOF from transport".to_string(),
                ))
            }
            Ok(_) => {
                if byte[0] == TERMINATOR {
                    break;
                }
                line.push(byte[0]);
                if line.len() > max_len {
                    return Err(AnalyserError::Truncated { max_len });
                }
            }
            Err(e) if is_retryable(&e) => {
                // Port poll interval is shorter than our overall timeout
                if Instant::now() >= deadline {
                    return Err(AnalyserError::Timeout(timeout));
                }
            }
            Err(e) => return Err(link_error(e)),
        }
    }

    let line = String::from_utf8(line).map_err(|e| {
        AnalyserError::malformed("ASCII text", String::from_utf8_lossy(e.as_bytes()))
    })?;
    trace!("Received line: {:?}", line);
    Ok(line)
}

/// Parse a comma-separated line of exactly `expected` numbers.
pub fn parse_values(line: &str, expected: usize) -> AppResult<Vec<f64>> {
    let values = line
        .split(',')
        .map(|field| field.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| AnalyserError::malformed(format!("{expected} numeric fields"), line))?;

    if values.len() != expected {
        return Err(AnalyserError::malformed(
            format!("{expected} numeric fields"),
            line,
        ));
    }
    Ok(values)
}

/// Read one line and parse it as `expected` comma-separated numbers.
pub fn read_values_line<T: Transport + ?Sized>(
    transport: &mut T,
    max_len: usize,
    expected: usize,
) -> AppResult<Vec<f64>> {
    let line = read_line(transport, max_len)?;
    parse_values(&line, expected)
}

/// Split a `key=value` confirmation.
pub fn parse_echo(response: &str) -> AppResult<(&str, &str)> {
    response
        .split_once('=')
        .map(|(key, value)| (key.trim(), value.trim()))
        .ok_or_else(|| AnalyserError::malformed("key=value", response))
}

/// Whether a complete sentinel line starts anywhere at or after `from`.
fn find_sentinel(buf: &[u8], from: usize) -> bool {
    let start = from.min(buf.len());
    (start..buf.len())
        .filter(|&i| i == 0 || buf[i - 1] == TERMINATOR)
        .any(|i| buf[i..].starts_with(SENTINEL))
}

/// Buffer raw sweep output until the sentinel has arrived and the device has gone quiet.
///
/// The device may burst a sweep across many partial reads, so line boundaries are
/// ignored here. The timeout counts from the last received byte. At most `max_bytes`
/// are buffered; more fails with [`AnalyserError::Truncated`].
pub fn read_until_sentinel<T: Transport + ?Sized>(
    transport: &mut T,
    max_bytes: usize,
) -> AppResult<Vec<u8>> {
    let timeout = transport.timeout();
    let mut deadline = Instant::now() + timeout;
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 512];
    let mut seen_sentinel = false;

    loop {
        match transport.read(&mut chunk) {
            Ok(0) => {
                return Err(AnalyserError::Disconnected(
                    "unexpected EOF from transport".to_string(),
                ))
            }
            Ok(n) => {
                let scan_from = buf.len().saturating_sub(SENTINEL.len());
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > max_bytes {
                    return Err(AnalyserError::Truncated { max_len: max_bytes });
                }
                seen_sentinel = seen_sentinel || find_sentinel(&buf, scan_from);
                deadline = Instant::now() + timeout;
            }
            Err(e) if is_retryable(&e) => {
                if Instant::now() >= deadline {
                    return Err(AnalyserError::Timeout(timeout));
                }
            }
            Err(e) => return Err(link_error(e)),
        }

        if seen_sentinel && transport.bytes_available().map_err(link_error)? == 0 {
            break;
        }
    }

    debug!("Sweep block received: {} bytes", buf.len());
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use std::time::Duration;

    #[test]
    fn encodes_commands() {
        assert_eq!(Command::Version.encode(), b"V");
        assert_eq!(Command::Trigger.encode(), b"N");
        assert_eq!(Command::StartFrequency(300e3).encode(), b"S0.30\r");
        assert_eq!(Command::StopFrequency(20e6).encode(), b"E20.00\r");
        assert_eq!(Command::Points(500).encode(), b"P500\r");
        assert_eq!(Command::Single(1.5e6).encode(), b"F1.50\r");
        assert_eq!(
            Command::Configure {
                name: "averaging",
                value: "16"
            }
            .encode(),
            b"Caveraging\r16\r"
        );
    }

    #[test]
    fn reads_line_without_terminator() {
        let mut transport = MockTransport::with_input(b"S=0.30\rnext\r");
        assert_eq!(read_line(&mut transport, 100).unwrap(), "S=0.30");
        assert_eq!(read_line(&mut transport, 100).unwrap(), "next");
    }

    #[test]
    fn line_of_exactly_max_len_is_accepted() {
        let mut transport = MockTransport::with_input(b"12345\r");
        assert_eq!(read_line(&mut transport, 5).unwrap(), "12345");
    }

    #[test]
    fn over_long_line_is_truncated_error() {
        let mut transport = MockTransport::with_input(b"123456789\r");
        let err = read_line(&mut transport, 4).unwrap_err();
        assert!(matches!(err, AnalyserError::Truncated { max_len: 4 }));
    }

    #[test]
    fn missing_terminator_times_out() {
        let mut transport =
            MockTransport::with_input(b"partial").with_timeout(Duration::from_millis(10));
        let err = read_line(&mut transport, 100).unwrap_err();
        assert!(matches!(err, AnalyserError::Timeout(_)));
    }

    #[test]
    fn link_loss_is_disconnected() {
        let mut transport = MockTransport::with_input(b"abc\r");
        transport.probe().disconnect();
        let err = read_line(&mut transport, 100).unwrap_err();
        assert!(matches!(err, AnalyserError::Disconnected(_)));
    }

    #[test]
    fn parses_value_lines() {
        assert_eq!(
            parse_values("1e6, 50.0,-10.5", 3).unwrap(),
            vec![1e6, 50.0, -10.5]
        );
        assert!(matches!(
            parse_values("1e6,abc,3", 3),
            Err(AnalyserError::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse_values("1e6,2", 3),
            Err(AnalyserError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn reads_values_line() {
        let mut transport = MockTransport::with_input(b"1000000.0,49.9,-2.5\r");
        assert_eq!(
            read_values_line(&mut transport, 100, 3).unwrap(),
            vec![1e6, 49.9, -2.5]
        );
    }

    #[test]
    fn parses_echo() {
        assert_eq!(parse_echo("averaging=16").unwrap(), ("averaging", "16"));
        assert_eq!(parse_echo("output = 80%").unwrap(), ("output", "80%"));
        assert!(parse_echo("averaging 16").is_err());
    }

    #[test]
    fn sentinel_must_start_a_line() {
        assert!(find_sentinel(b"END\r", 0));
        assert!(find_sentinel(b"hdr\r1,2,3\rEND\r", 0));
        assert!(!find_sentinel(b"hdr\rXEND\r", 0));
        assert!(!find_sentinel(b"hdr\rEND", 0));
    }

    #[test]
    fn bulk_read_spans_partial_reads() {
        let stream = b"hdr\r1e6,50.0,10.0\r2e6,48.0,9.0\rEND\r";
        let mut transport = MockTransport::with_input(stream).with_chunk_size(3);
        let block = read_until_sentinel(&mut transport, 4096).unwrap();
        assert_eq!(block, stream.to_vec());
    }

    #[test]
    fn bulk_read_without_sentinel_times_out() {
        let mut transport = MockTransport::with_input(b"hdr\r1e6,50.0,10.0\r")
            .with_timeout(Duration::from_millis(10));
        assert!(matches!(
            read_until_sentinel(&mut transport, 4096),
            Err(AnalyserError::Timeout(_))
        ));
    }

    #[test]
    fn bulk_read_respects_byte_cap() {
        let mut transport = MockTransport::with_input(b"hdr\r1e6,50.0,10.0\rEND\r");
        assert!(matches!(
            read_until_sentinel(&mut transport, 8),
            Err(AnalyserError::Truncated { max_len: 8 })
        ));
    }
}
