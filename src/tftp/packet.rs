//! TFTP wire format (RFC 1350) with option extensions (RFC 2347, 2348, 2349).

use std::collections::HashMap;
use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::error::TftpError;

/// TFTP opcodes
pub const OPCODE_RRQ: u16 = 1;
pub const OPCODE_WRQ: u16 = 2;
pub const OPCODE_DATA: u16 = 3;
pub const OPCODE_ACK: u16 = 4;
pub const OPCODE_ERROR: u16 = 5;
pub const OPCODE_OACK: u16 = 6;

/// TFTP error codes
pub const ERROR_NOT_DEFINED: u16 = 0;
pub const ERROR_FILE_NOT_FOUND: u16 = 1;
pub const ERROR_ACCESS_VIOLATION: u16 = 2;
pub const ERROR_ILLEGAL_OPERATION: u16 = 4;

pub const DEFAULT_BLOCK_SIZE: usize = 512;
/// RFC 2348 upper bound.
pub const MAX_BLOCK_SIZE: usize = 65464;
const MIN_BLOCK_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Read(ReadRequest),
    Write { filename: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub filename: String,
    pub mode: String,
    /// Option names are lowercased.
    pub options: HashMap<String, String>,
}

/// Transfer parameters agreed with the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub block_size: usize,
    pub timeout: Duration,
    /// Options to echo in an OACK, in a stable order. Empty means no OACK.
    pub acknowledged: Vec<(&'static str, String)>,
}

fn split_fields(body: &[u8]) -> Result<Vec<String>, TftpError> {
    let body = body
        .strip_suffix(&[0])
        .ok_or_else(|| TftpError::Malformed("request is not NUL terminated".into()))?;
    body.split(|&b| b == 0)
        .map(|field| {
            std::str::from_utf8(field)
                .map(str::to_string)
                .map_err(|_| TftpError::Malformed("field is not valid UTF-8".into()))
        })
        .collect()
}

/// Parse a request datagram arriving on the listening port.
pub fn parse_request(buf: &[u8]) -> Result<Request, TftpError> {
    if buf.len() < 4 {
        return Err(TftpError::Malformed(format!("{} byte request", buf.len())));
    }
    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    let fields = split_fields(&buf[2..])?;
    let filename = match fields.first() {
        Some(name) if !name.is_empty() => name.clone(),
        _ => return Err(TftpError::Malformed("empty filename".into())),
    };

    match opcode {
        OPCODE_RRQ => {
            let mode = fields
                .get(1)
                .map(|m| m.to_ascii_lowercase())
                .ok_or_else(|| TftpError::Malformed("missing transfer mode".into()))?;
            if !matches!(mode.as_str(), "octet" | "netascii") {
                return Err(TftpError::UnsupportedMode(mode));
            }

            let options = fields[2..]
                .chunks_exact(2)
                .filter(|pair| !pair[0].is_empty())
                .map(|pair| (pair[0].to_ascii_lowercase(), pair[1].clone()))
                .collect();

            Ok(Request::Read(ReadRequest {
                filename,
                mode,
                options,
            }))
        }
        OPCODE_WRQ => Ok(Request::Write { filename }),
        other => Err(TftpError::Malformed(format!("unexpected opcode {other}"))),
    }
}

impl ReadRequest {
    /// Agree on block size, timeout and transfer size. Unknown or invalid
    /// options are ignored, as RFC 2347 allows.
    pub fn negotiate(&self, file_size: u64, max_block: usize, timeout: Duration) -> Negotiated {
        let mut negotiated = Negotiated {
            block_size: DEFAULT_BLOCK_SIZE,
            timeout,
            acknowledged: Vec::new(),
        };

        if let Some(requested) = self.options.get("blksize").and_then(|v| v.parse::<usize>().ok()) {
            let size = requested
                .min(max_block.min(MAX_BLOCK_SIZE))
                .max(MIN_BLOCK_SIZE);
            negotiated.block_size = size;
            negotiated.acknowledged.push(("blksize", size.to_string()));
        }

        if let Some(secs) = self.options.get("timeout").and_then(|v| v.parse::<u64>().ok()) {
            if (1..=255).contains(&secs) {
                negotiated.timeout = Duration::from_secs(secs);
                negotiated.acknowledged.push(("timeout", secs.to_string()));
            }
        }

        if self.options.contains_key("tsize") {
            negotiated.acknowledged.push(("tsize", file_size.to_string()));
        }

        negotiated
    }
}

pub fn data_packet(block: u16, data: &[u8]) -> Vec<u8> {
    let mut packet = BytesMut::with_capacity(4 + data.len());
    packet.put_u16(OPCODE_DATA);
    packet.put_u16(block);
    packet.put_slice(data);
    packet.to_vec()
}

pub fn error_packet(code: u16, message: &str) -> Vec<u8> {
    let mut packet = BytesMut::with_capacity(5 + message.len());
    packet.put_u16(OPCODE_ERROR);
    packet.put_u16(code);
    packet.put_slice(message.as_bytes());
    packet.put_u8(0);
    packet.to_vec()
}

pub fn oack_packet(options: &[(&str, String)]) -> Vec<u8> {
    let mut packet = BytesMut::new();
    packet.put_u16(OPCODE_OACK);
    for (name, value) in options {
        packet.put_slice(name.as_bytes());
        packet.put_u8(0);
        packet.put_slice(value.as_bytes());
        packet.put_u8(0);
    }
    packet.to_vec()
}

/// What a client sent back during a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack(u16),
    Error { code: u16, message: String },
    Other,
}

pub fn parse_reply(buf: &[u8]) -> Reply {
    if buf.len() < 4 {
        return Reply::Other;
    }
    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    let value = u16::from_be_bytes([buf[2], buf[3]]);
    match opcode {
        OPCODE_ACK => Reply::Ack(value),
        OPCODE_ERROR => {
            let text = buf[4..].split(|&b| b == 0).next().unwrap_or_default();
            Reply::Error {
                code: value,
                message: String::from_utf8_lossy(text).into_owned(),
            }
        }
        _ => Reply::Other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn rrq(filename: &str, options: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = OPCODE_RRQ.to_be_bytes().to_vec();
        for field in [filename, "octet"] {
            buf.extend_from_slice(field.as_bytes());
            buf.push(0);
        }
        for (name, value) in options {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        buf
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_parse_plain_rrq() {
            let request = parse_request(&rrq("undionly.kpxe", &[])).unwrap();
            let Request::Read(read) = request else {
                panic!("expected read request");
            };
            assert_eq!(read.filename, "undionly.kpxe");
            assert_eq!(read.mode, "octet");
            assert!(read.options.is_empty());
        }

        #[test]
        fn test_parse_rrq_with_options() {
            let request =
                parse_request(&rrq("ipxe.efi", &[("BLKSIZE", "1468"), ("tsize", "0")])).unwrap();
            let Request::Read(read) = request else {
                panic!("expected read request");
            };
            assert_eq!(read.options.get("blksize").map(String::as_str), Some("1468"));
            assert_eq!(read.options.get("tsize").map(String::as_str), Some("0"));
        }

        #[test]
        fn test_parse_wrq() {
            let mut buf = OPCODE_WRQ.to_be_bytes().to_vec();
            buf.extend_from_slice(b"upload.bin\0octet\0");
            assert_eq!(
                parse_request(&buf).unwrap(),
                Request::Write {
                    filename: "upload.bin".into()
                }
            );
        }

        #[test]
        fn test_malformed_requests() {
            assert!(matches!(parse_request(&[0, 1]), Err(TftpError::Malformed(_))));
            assert!(matches!(
                parse_request(b"\x00\x01file\x00octet"),
                Err(TftpError::Malformed(_))
            ));
            assert!(matches!(
                parse_request(b"\x00\x01\x00octet\x00"),
                Err(TftpError::Malformed(_))
            ));
            assert!(matches!(
                parse_request(b"\x00\x03file\x00octet\x00"),
                Err(TftpError::Malformed(_))
            ));
            assert!(matches!(
                parse_request(b"\x00\x01file\x00mail\x00"),
                Err(TftpError::UnsupportedMode(_))
            ));
        }
    }

    mod negotiate_tests {
        use super::*;

        fn read(options: &[(&str, &str)]) -> ReadRequest {
            match parse_request(&rrq("ipxe.efi", options)).unwrap() {
                Request::Read(read) => read,
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_no_options_means_no_oack() {
            let n = read(&[]).negotiate(1000, 1468, Duration::from_secs(5));
            assert_eq!(n.block_size, DEFAULT_BLOCK_SIZE);
            assert!(n.acknowledged.is_empty());
        }

        #[test]
        fn test_blksize_clamped() {
            let n = read(&[("blksize", "65535")]).negotiate(1000, MAX_BLOCK_SIZE, Duration::from_secs(5));
            assert_eq!(n.block_size, MAX_BLOCK_SIZE);

            let n = read(&[("blksize", "1468")]).negotiate(1000, 1024, Duration::from_secs(5));
            assert_eq!(n.block_size, 1024);
            assert_eq!(n.acknowledged, vec![("blksize", "1024".to_string())]);

            let n = read(&[("blksize", "2")]).negotiate(1000, 1468, Duration::from_secs(5));
            assert_eq!(n.block_size, 8);
        }

        #[test]
        fn test_tsize_and_timeout() {
            let n = read(&[("tsize", "0"), ("timeout", "3")])
                .negotiate(4242, 512, Duration::from_secs(5));
            assert_eq!(n.timeout, Duration::from_secs(3));
            assert_eq!(
                n.acknowledged,
                vec![("timeout", "3".to_string()), ("tsize", "4242".to_string())]
            );
        }

        #[test]
        fn test_invalid_values_ignored() {
            let n = read(&[("blksize", "big"), ("timeout", "0"), ("windowsize", "4")])
                .negotiate(10, 1468, Duration::from_secs(5));
            assert_eq!(n.block_size, DEFAULT_BLOCK_SIZE);
            assert_eq!(n.timeout, Duration::from_secs(5));
            assert!(n.acknowledged.is_empty());
        }
    }

    mod packet_tests {
        use super::*;

        #[test]
        fn test_build_packets() {
            assert_eq!(data_packet(2, b"ab"), vec![0, 3, 0, 2, b'a', b'b']);
            assert_eq!(error_packet(1, "File not found")[..4], [0u8, 5, 0, 1]);
            assert_eq!(
                oack_packet(&[("tsize", "10".to_string())]),
                b"\x00\x06tsize\x0010\x00".to_vec()
            );
        }

        #[test]
        fn test_parse_reply() {
            assert_eq!(parse_reply(&[0, 4, 0, 9]), Reply::Ack(9));
            assert_eq!(
                parse_reply(b"\x00\x05\x00\x08no\x00"),
                Reply::Error {
                    code: 8,
                    message: "no".into()
                }
            );
            assert_eq!(parse_reply(&[0, 4]), Reply::Other);
        }
    }
}
