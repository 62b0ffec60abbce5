//! The length-prefixed text instruction framing used on every client socket.
//!
//! Wire format: one or more comma-separated fields terminated by `;`, each
//! field `<decimal-length>.<payload>`, where `<decimal-length>` is the byte
//! length of the payload. The first field is the opcode; the rest are
//! arguments.
//!
//! ```text
//! 7.select,3.rdp;
//! ```

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// A fully decoded instruction: an opcode plus zero or more argument fields.
///
/// Payload bytes are not required to be valid UTF-8 by the parser itself --
/// that is a convention of producers, not an invariant the codec enforces.
/// Callers that need text (e.g. mimetypes, usernames) validate it themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<Vec<u8>>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    /// Convenience accessor for an argument as a UTF-8 string, lossily.
    pub fn arg_str(&self, index: usize) -> Option<std::borrow::Cow<'_, str>> {
        self.args.get(index).map(|b| String::from_utf8_lossy(b))
    }

    /// Encode this instruction to its on-wire byte representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_field(&mut buf, self.opcode.as_bytes());
        for arg in &self.args {
            buf.put_u8(b',');
            write_field(&mut buf, arg);
        }
        buf.put_u8(b';');
        buf.to_vec()
    }
}

fn write_field(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_slice(payload.len().to_string().as_bytes());
    buf.put_u8(b'.');
    buf.put_slice(payload);
}

/// Parser state machine driven by [`Parser::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating decimal digits of a field length.
    Length,
    /// Reading exactly `remaining` more payload bytes.
    Payload { remaining: usize },
    /// Payload just completed; expecting `,` (next field) or `;` (done).
    Delimiter,
    /// A full instruction has been parsed; no further input is consumed
    /// until [`Parser::reset`].
    Complete,
}

/// Incremental, re-usable instruction parser.
///
/// Feed it bytes via [`Parser::append`]; once it reaches [`State::Complete`]
/// call [`Parser::take`] to retrieve the instruction and [`Parser::reset`]
/// to parse the next one.
#[derive(Debug)]
pub struct Parser {
    state: State,
    length_acc: usize,
    current_field: Vec<u8>,
    opcode: Option<String>,
    args: Vec<Vec<u8>>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Length,
            length_acc: 0,
            current_field: Vec::new(),
            opcode: None,
            args: Vec::new(),
        }
    }

    /// Reset the parser to start reading a fresh instruction, discarding
    /// any in-progress state.
    pub fn reset(&mut self) {
        self.state = State::Length;
        self.length_acc = 0;
        self.current_field.clear();
        self.opcode = None;
        self.args.clear();
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    /// Feed `buf` to the parser, returning the number of bytes consumed.
    /// Stops consuming once `State::Complete` is reached or input is
    /// exhausted. Fails with [`Error::Malformed`] on any byte that
    /// violates the grammar.
    pub fn append(&mut self, buf: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        for &byte in buf {
            if matches!(self.state, State::Complete) {
                break;
            }

            match self.state {
                State::Length => {
                    if byte.is_ascii_digit() {
                        self.length_acc = self
                            .length_acc
                            .checked_mul(10)
                            .and_then(|v| v.checked_add((byte - b'0') as usize))
                            .ok_or_else(|| Error::Malformed("field length overflow".into()))?;
                    } else if byte == b'.' {
                        self.current_field = Vec::with_capacity(self.length_acc);
                        self.state = if self.length_acc == 0 {
                            State::Delimiter
                        } else {
                            State::Payload {
                                remaining: self.length_acc,
                            }
                        };
                        self.length_acc = 0;
                    } else {
                        return Err(Error::Malformed(format!(
                            "expected digit or '.', got {byte:#04x}"
                        )));
                    }
                }
                State::Payload { remaining } => {
                    self.current_field.push(byte);
                    let remaining = remaining - 1;
                    self.state = if remaining == 0 {
                        State::Delimiter
                    } else {
                        State::Payload { remaining }
                    };
                }
                State::Delimiter => {
                    let field = std::mem::take(&mut self.current_field);
                    if self.opcode.is_none() {
                        self.opcode = Some(String::from_utf8_lossy(&field).into_owned());
                    } else {
                        self.args.push(field);
                    }

                    match byte {
                        b',' => self.state = State::Length,
                        b';' => self.state = State::Complete,
                        _ => {
                            return Err(Error::Malformed(format!(
                                "expected ',' or ';', got {byte:#04x}"
                            )))
                        }
                    }
                }
                State::Complete => unreachable!(),
            }

            consumed += 1;
            if matches!(self.state, State::Complete) {
                break;
            }
        }

        Ok(consumed)
    }

    /// Take the completed instruction, leaving the parser in `State::Length`
    /// ready for the next one. Panics if the parser is not yet complete --
    /// callers must check [`Parser::is_complete`] first.
    pub fn take(&mut self) -> Instruction {
        assert!(self.is_complete(), "Parser::take called before completion");
        let opcode = self.opcode.take().expect("complete parser has an opcode");
        let args = std::mem::take(&mut self.args);
        self.reset();
        Instruction { opcode, args }
    }
}

/// Read one complete instruction from `reader` with a total deadline of
/// `deadline`, then verify its opcode matches `expected_opcode`.
pub async fn expect<R>(
    reader: &mut R,
    deadline: Duration,
    expected_opcode: &str,
) -> Result<Instruction>
where
    R: AsyncRead + Unpin,
{
    let instr = read_instruction(reader, deadline).await?;
    if instr.opcode != expected_opcode {
        return Err(Error::UnexpectedOpcode {
            expected: expected_opcode.to_string(),
            actual: instr.opcode,
        });
    }
    Ok(instr)
}

/// Read one complete instruction from `reader`, bounded by `deadline`.
pub async fn read_instruction<R>(reader: &mut R, deadline: Duration) -> Result<Instruction>
where
    R: AsyncRead + Unpin,
{
    let mut parser = Parser::new();
    let mut byte = [0u8; 1];

    let fut = async {
        loop {
            let n = reader
                .read(&mut byte)
                .await
                .map_err(|e| Error::Malformed(format!("read error: {e}")))?;
            if n == 0 {
                return Err(Error::Malformed("connection closed mid-instruction".into()));
            }
            parser.append(&byte)?;
            if parser.is_complete() {
                return Ok(parser.take());
            }
        }
    };

    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(deadline)),
    }
}

/// Write one instruction to `writer` and flush it, holding nothing across
/// `.await` points beyond the write itself. Callers that need several
/// instructions emitted atomically (e.g. a broadcast fan-out) should
/// serialize through an external lock around repeated calls to this
/// function -- see [`crate::transport::Transport::instruction_begin`].
pub async fn write_instruction<W>(writer: &mut W, instr: &Instruction) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = instr.encode();
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::Upstream(format!("write error: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Upstream(format!("flush error: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_opcode_and_args() {
        let instr = Instruction::new("select", vec![b"rdp".to_vec()]);
        let wire = instr.encode();
        assert_eq!(wire, b"6.select,3.rdp;");

        let mut parser = Parser::new();
        let consumed = parser.append(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert!(parser.is_complete());
        assert_eq!(parser.take(), instr);
    }

    #[test]
    fn byte_accounting_matches_wire_length() {
        let instr = Instruction::new(
            "connect",
            vec![b"hostname=example".to_vec(), b"port=3389".to_vec()],
        );
        let wire = instr.encode();

        let mut parser = Parser::new();
        let mut total = 0;
        for chunk in wire.chunks(3) {
            total += parser.append(chunk).unwrap();
            if parser.is_complete() {
                break;
            }
        }
        assert_eq!(total, wire.len());
    }

    #[test]
    fn supports_zero_length_fields() {
        let wire = b"0.;";
        let mut parser = Parser::new();
        parser.append(wire).unwrap();
        assert!(parser.is_complete());
        let instr = parser.take();
        assert_eq!(instr.opcode, "");
        assert!(instr.args.is_empty());
    }

    #[test]
    fn rejects_malformed_length() {
        let wire = b"3x.abc;";
        let mut parser = Parser::new();
        assert!(parser.append(wire).is_err());
    }

    #[test]
    fn rejects_bad_delimiter() {
        let wire = b"3.abc:";
        let mut parser = Parser::new();
        assert!(parser.append(wire).is_err());
    }

    #[test]
    fn reset_allows_reuse() {
        let mut parser = Parser::new();
        parser.append(b"4.size;").unwrap();
        assert!(parser.is_complete());
        let _ = parser.take();
        assert!(!parser.is_complete());
        parser.append(b"4.sync;").unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.take().opcode, "sync");
    }

    #[tokio::test]
    async fn read_instruction_from_async_reader() {
        let wire = Instruction::new("ready", vec![b"$abc".to_vec()]).encode();
        let mut cursor = std::io::Cursor::new(wire);
        let instr = read_instruction(&mut cursor, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(instr.opcode, "ready");
        assert_eq!(instr.args[0], b"$abc");
    }

    #[tokio::test]
    async fn read_instruction_times_out_on_silence() {
        // A reader that never returns data: `tokio::io::empty` yields EOF
        // immediately, so use a pending-forever pipe instead.
        let (mut _tx, mut rx) = tokio::io::duplex(64);
        let result = read_instruction(&mut rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
