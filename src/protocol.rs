//! Framing of the scp file copy exchange.
//!
//! A copy of one regular file looks like this on the wire, with the sink
//! (`scp -t`) acknowledging every step with a single NUL byte:
//!
//! ```text
//! sink   -> source : \0                       ready
//! source -> sink   : C0644 5 hello.txt\n      control header
//! sink   -> source : \0
//! source -> sink   : hello \0                 payload + terminator
//! sink   -> source : \0
//! ```

use std::borrow::Cow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::ScpError;

/// Acknowledgment byte, also the payload terminator
pub const ACK: u8 = 0;

/// Control byte of a regular file header
pub const REGULAR_FILE: u8 = b'C';

/// Longest control header accepted from a remote
pub const MAX_HEADER_LEN: u64 = 4096;

const WARNING: u8 = 1;
const FATAL: u8 = 2;

/// The control line announcing one regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub mode: u32,
    pub length: u64,
    pub file_name: String,
}

impl ProtocolFrame {
    /// Builds a header for sending, refusing names that would break framing
    pub fn regular_file(mode: u32, length: u64, file_name: &str) -> Result<Self, ScpError> {
        if file_name.is_empty() || file_name == "." || file_name == ".." {
            return Err(ScpError::ProtocolFormat(format!(
                "invalid file name {file_name:?}"
            )));
        }
        if file_name.contains(['/', '\n', '\r']) {
            return Err(ScpError::ProtocolFormat(format!(
                "file name {file_name:?} contains a path separator or line break"
            )));
        }
        Ok(Self {
            mode: mode & 0o7777,
            length,
            file_name: file_name.to_string(),
        })
    }

    /// `C` + `0` + octal mode (at least three digits) + size + name + newline
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "C0{:03o} {} {}\n",
            self.mode & 0o7777,
            self.length,
            self.file_name
        )
        .into_bytes()
    }

    /// Parses one control line, with or without its trailing newline
    pub fn parse(line: &[u8]) -> Result<Self, ScpError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let Some((&kind, rest)) = line.split_first() else {
            return Err(ScpError::ProtocolFormat("empty header".to_string()));
        };
        match kind {
            REGULAR_FILE => {}
            WARNING | FATAL => {
                return Err(ScpError::Remote(
                    String::from_utf8_lossy(rest).trim().to_string(),
                ));
            }
            other => {
                return Err(ScpError::ProtocolFormat(format!(
                    "unsupported entry type {:?}",
                    other as char
                )));
            }
        }

        let rest = String::from_utf8_lossy(rest);
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(ScpError::ProtocolFormat(format!(
                "protocol demands 3 fields, got {}",
                fields.len()
            )));
        }

        let mode = u32::from_str_radix(fields[0], 8).map_err(|e| {
            ScpError::ProtocolFormat(format!("failed to parse the mode: {:?} ({e})", fields[0]))
        })?;
        let length = fields[1].parse::<u64>().map_err(|e| {
            ScpError::ProtocolFormat(format!(
                "failed to parse the length: {:?} ({e})",
                fields[1]
            ))
        })?;

        Ok(Self {
            mode: mode & 0o7777,
            length,
            file_name: fields[2].to_string(),
        })
    }
}

/// Reads the control line that precedes a file's payload
pub async fn read_header<R>(reader: &mut R) -> Result<ProtocolFrame, ScpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    reader
        .take(MAX_HEADER_LEN)
        .read_until(b'\n', &mut line)
        .await?;
    if line.is_empty() {
        return Err(ScpError::ProtocolFormat(
            "stream ended before the file header".to_string(),
        ));
    }
    if line.last() != Some(&b'\n') {
        if line.len() as u64 >= MAX_HEADER_LEN {
            return Err(ScpError::ProtocolFormat(format!(
                "header longer than {MAX_HEADER_LEN} bytes"
            )));
        }
        // an error line may be the last thing a failing remote sends
        if matches!(line[0], WARNING | FATAL) {
            return ProtocolFrame::parse(&line);
        }
        return Err(ScpError::ProtocolFormat(
            "stream ended in the middle of the file header".to_string(),
        ));
    }
    ProtocolFrame::parse(&line)
}

/// Remote command receiving a file into `target_dir`
pub fn sink_command(scp_program: &str, target_dir: &str) -> String {
    format!("{} -t {}", scp_program, quote(target_dir))
}

/// Remote command sending the file at `source`
pub fn source_command(scp_program: &str, source: &str) -> String {
    format!("{} -f {}", scp_program, quote(source))
}

fn quote(arg: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pads_mode_to_three_octal_digits() {
        let frame = ProtocolFrame::regular_file(0o644, 1024, "main.go").unwrap();
        assert_eq!(frame.encode(), b"C0644 1024 main.go\n");

        let frame = ProtocolFrame::regular_file(0o7, 0, "x").unwrap();
        assert_eq!(frame.encode(), b"C0007 0 x\n");

        let frame = ProtocolFrame::regular_file(0o100755, 3, "run.sh").unwrap();
        assert_eq!(frame.encode(), b"C0755 3 run.sh\n");
    }

    #[test]
    fn parse_reads_mode_length_and_name() {
        let frame = ProtocolFrame::parse(b"C0640 42 notes.txt\n").unwrap();
        assert_eq!(
            frame,
            ProtocolFrame {
                mode: 0o640,
                length: 42,
                file_name: "notes.txt".to_string(),
            }
        );
    }

    #[test]
    fn parse_requires_exactly_three_fields() {
        for line in [
            &b"C0644 12\n"[..],
            b"C0644 12 my file.txt\n",
            b"C\n",
            b"C0644\n",
        ] {
            match ProtocolFrame::parse(line) {
                Err(ScpError::ProtocolFormat(msg)) => assert!(msg.contains("3 fields"), "{msg}"),
                other => panic!("unexpected {other:?} for {line:?}"),
            }
        }
    }

    #[test]
    fn parse_rejects_bad_numbers() {
        assert!(matches!(
            ProtocolFrame::parse(b"C0986 12 a\n"),
            Err(ScpError::ProtocolFormat(_))
        ));
        assert!(matches!(
            ProtocolFrame::parse(b"C0644 -12 a\n"),
            Err(ScpError::ProtocolFormat(_))
        ));
        assert!(matches!(
            ProtocolFrame::parse(b"C0644 1e3 a\n"),
            Err(ScpError::ProtocolFormat(_))
        ));
    }

    #[test]
    fn parse_surfaces_remote_error_lines() {
        match ProtocolFrame::parse(b"\x01scp: /nope: No such file or directory\n") {
            Err(ScpError::Remote(msg)) => {
                assert_eq!(msg, "scp: /nope: No such file or directory")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_directory_entries() {
        assert!(matches!(
            ProtocolFrame::parse(b"D0755 0 somedir\n"),
            Err(ScpError::ProtocolFormat(_))
        ));
    }

    #[test]
    fn names_that_break_framing_are_refused() {
        assert!(ProtocolFrame::regular_file(0o644, 1, "a\nb").is_err());
        assert!(ProtocolFrame::regular_file(0o644, 1, "dir/a").is_err());
        assert!(ProtocolFrame::regular_file(0o644, 1, "").is_err());
    }

    #[tokio::test]
    async fn read_header_stops_at_newline() {
        let mut reader: &[u8] = b"C0644 5 hello.txt\nhello\0";
        let frame = read_header(&mut reader).await.unwrap();
        assert_eq!(frame.length, 5);
        assert_eq!(reader, b"hello\0");
    }

    #[tokio::test]
    async fn read_header_fails_on_truncated_line() {
        let mut reader: &[u8] = b"C0644 5 hel";
        assert!(matches!(
            read_header(&mut reader).await,
            Err(ScpError::ProtocolFormat(_))
        ));

        let mut reader: &[u8] = b"";
        assert!(matches!(
            read_header(&mut reader).await,
            Err(ScpError::ProtocolFormat(_))
        ));
    }

    #[tokio::test]
    async fn read_header_rejects_oversized_line() {
        let line = vec![b'C'; MAX_HEADER_LEN as usize + 10];
        let mut reader: &[u8] = &line;
        match read_header(&mut reader).await {
            Err(ScpError::ProtocolFormat(msg)) => assert!(msg.contains("longer")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remote_commands_quote_paths() {
        assert_eq!(sink_command("scp", "/srv/data"), "scp -t /srv/data");
        assert_eq!(
            source_command("scp", "/srv/my file.txt"),
            "scp -f '/srv/my file.txt'"
        );
    }
}
