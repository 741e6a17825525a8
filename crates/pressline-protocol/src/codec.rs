//! Fixed binary framing for requests on the shared inbound channel.
//!
//! The transport is a byte pipe without message boundaries, so every request
//! is self-describing:
//!
//! ```text
//! sender:i32 | request_type:i32 | stage_count:i32 | stages:i32[stage_count]
//! | input_len:u64 | output_len:u64 | input:[u8; input_len] 0x00 | output:[u8; output_len] 0x00
//! ```
//!
//! Integers are little-endian.

use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{ProtocolError, ProtocolResult};
use crate::request::{Request, RequestKind};

/// Largest stage count accepted on the wire.
pub const MAX_STAGES: usize = 64;
/// Longest path, in bytes, accepted on the wire.
pub const MAX_PATH_LEN: usize = 4096;

/// Encode a request into its wire representation.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] when the request exceeds the stage or
/// path limits the server enforces.
pub fn encode(request: &Request) -> ProtocolResult<Vec<u8>> {
    if request.stages.len() > MAX_STAGES {
        return Err(ProtocolError::malformed(
            "stage_count",
            "too_many_stages",
            Some(request.stages.len().to_string()),
        ));
    }
    let input = path_bytes(&request.input_path, "input_path")?;
    let output = path_bytes(&request.output_path, "output_path")?;
    let stage_count = i32::try_from(request.stages.len()).map_err(|_| {
        ProtocolError::malformed("stage_count", "out_of_range", None)
    })?;

    let mut buffer =
        Vec::with_capacity(12 + request.stages.len() * 4 + 16 + input.len() + output.len() + 2);
    buffer.extend_from_slice(&request.sender.to_le_bytes());
    buffer.extend_from_slice(&request.kind.code().to_le_bytes());
    buffer.extend_from_slice(&stage_count.to_le_bytes());
    for stage in &request.stages {
        buffer.extend_from_slice(&stage.to_le_bytes());
    }
    buffer.extend_from_slice(&(input.len() as u64).to_le_bytes());
    buffer.extend_from_slice(&(output.len() as u64).to_le_bytes());
    buffer.extend_from_slice(input);
    buffer.push(0);
    buffer.extend_from_slice(output);
    buffer.push(0);
    Ok(buffer)
}

/// Encode a request and write it to `writer` in a single call.
///
/// # Errors
///
/// Returns an error if the request cannot be encoded or the write fails.
pub fn encode_into<W: Write>(writer: &mut W, request: &Request) -> ProtocolResult<()> {
    let bytes = encode(request)?;
    writer
        .write_all(&bytes)
        .and_then(|()| writer.flush())
        .map_err(|err| ProtocolError::io("encode_into.write", err))
}

/// Decode exactly one request from a complete byte slice.
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] for short input and
/// [`ProtocolError::Malformed`] for invalid fields or trailing bytes.
pub fn decode(bytes: &[u8]) -> ProtocolResult<Request> {
    let mut cursor = bytes;
    let request = decode_from(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(ProtocolError::malformed(
            "trailer",
            "unexpected_bytes",
            Some(cursor.len().to_string()),
        ));
    }
    Ok(request)
}

/// Read exactly one request from `reader`, field by field.
///
/// Nothing is returned unless every field was read in full, so a writer that
/// disconnects mid-message never yields a partial request.
///
/// # Errors
///
/// Returns [`ProtocolError::Empty`] when the stream ends before the first byte,
/// [`ProtocolError::Truncated`] when it ends later, and
/// [`ProtocolError::Malformed`] for out-of-domain values.
pub fn decode_from<R: Read>(reader: &mut R) -> ProtocolResult<Request> {
    let sender = read_first_i32(reader)?;
    let kind = RequestKind::try_from(read_i32(reader, "request_type")?)?;

    let stage_count = read_i32(reader, "stage_count")?;
    let stage_count = usize::try_from(stage_count).map_err(|_| {
        ProtocolError::malformed("stage_count", "negative", Some(stage_count.to_string()))
    })?;
    if stage_count > MAX_STAGES {
        return Err(ProtocolError::malformed(
            "stage_count",
            "too_many_stages",
            Some(stage_count.to_string()),
        ));
    }
    let mut stages = Vec::with_capacity(stage_count);
    for _ in 0..stage_count {
        stages.push(read_i32(reader, "stages")?);
    }

    let input_len = read_len(reader, "input_path_len")?;
    let output_len = read_len(reader, "output_path_len")?;
    let input_path = read_path(reader, input_len, "input_path")?;
    let output_path = read_path(reader, output_len, "output_path")?;

    Ok(Request {
        sender,
        kind,
        stages,
        input_path,
        output_path,
    })
}

fn path_bytes<'a>(path: &'a Path, field: &'static str) -> ProtocolResult<&'a [u8]> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() > MAX_PATH_LEN {
        return Err(ProtocolError::malformed(
            field,
            "too_long",
            Some(bytes.len().to_string()),
        ));
    }
    Ok(bytes)
}

fn read_first_i32<R: Read>(reader: &mut R) -> ProtocolResult<i32> {
    let mut buf = [0_u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(ProtocolError::Empty),
            Ok(0) => return Err(ProtocolError::Truncated { field: "sender" }),
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(ProtocolError::io("decode.sender", err)),
        }
    }
    Ok(i32::from_le_bytes(buf))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], field: &'static str) -> ProtocolResult<()> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated { field }
        } else {
            ProtocolError::io("decode.read", err)
        }
    })
}

fn read_i32<R: Read>(reader: &mut R, field: &'static str) -> ProtocolResult<i32> {
    let mut buf = [0_u8; 4];
    read_exact(reader, &mut buf, field)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_len<R: Read>(reader: &mut R, field: &'static str) -> ProtocolResult<usize> {
    let mut buf = [0_u8; 8];
    read_exact(reader, &mut buf, field)?;
    let len = u64::from_le_bytes(buf);
    usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_PATH_LEN)
        .ok_or_else(|| ProtocolError::malformed(field, "too_long", Some(len.to_string())))
}

fn read_path<R: Read>(reader: &mut R, len: usize, field: &'static str) -> ProtocolResult<PathBuf> {
    let mut buf = vec![0_u8; len + 1];
    read_exact(reader, &mut buf, field)?;
    if buf.pop() != Some(0) {
        return Err(ProtocolError::malformed(field, "missing_terminator", None));
    }
    Ok(PathBuf::from(OsStr::from_bytes(&buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformation::Transformation;

    fn sample() -> Request {
        Request::process_file(
            4242,
            "/tmp/in.dat",
            "/tmp/out.dat",
            &[Transformation::ByteCompress, Transformation::Encrypt],
        )
    }

    #[test]
    fn layout_matches_documented_framing() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[0..4], &4242_i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0_i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2_i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &1_i32.to_le_bytes());
        assert_eq!(&bytes[16..20], &5_i32.to_le_bytes());
        assert_eq!(&bytes[20..28], &11_u64.to_le_bytes());
        assert_eq!(&bytes[28..36], &12_u64.to_le_bytes());
        assert_eq!(&bytes[36..47], b"/tmp/in.dat");
        assert_eq!(bytes[47], 0);
        assert_eq!(&bytes[48..60], b"/tmp/out.dat");
        assert_eq!(bytes[60], 0);
        assert_eq!(bytes.len(), 61);
    }

    #[test]
    fn status_request_survives_the_wire() {
        let request = Request::status(17);
        let decoded = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn every_strict_prefix_is_rejected_without_a_request() {
        let bytes = encode(&sample()).unwrap();
        assert!(matches!(decode(&[]), Err(ProtocolError::Empty)));
        for cut in 1..bytes.len() {
            let result = decode(&bytes[..cut]);
            assert!(
                matches!(result, Err(ProtocolError::Truncated { .. })),
                "prefix of {cut} bytes decoded as {result:?}"
            );
        }
    }

    #[test]
    fn truncation_names_the_missing_field() {
        let bytes = encode(&sample()).unwrap();
        assert!(matches!(
            decode(&bytes[..2]),
            Err(ProtocolError::Truncated { field: "sender" })
        ));
        assert!(matches!(
            decode(&bytes[..14]),
            Err(ProtocolError::Truncated { field: "stages" })
        ));
        assert!(matches!(
            decode(&bytes[..50]),
            Err(ProtocolError::Truncated {
                field: "output_path"
            })
        ));
    }

    #[test]
    fn hostile_lengths_are_rejected_before_allocation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1_i32.to_le_bytes());
        bytes.extend_from_slice(&0_i32.to_le_bytes());
        bytes.extend_from_slice(&0_i32.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(&0_u64.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::Malformed {
                field: "input_path_len",
                reason: "too_long",
                ..
            })
        ));

        let mut negative = Vec::new();
        negative.extend_from_slice(&1_i32.to_le_bytes());
        negative.extend_from_slice(&0_i32.to_le_bytes());
        negative.extend_from_slice(&(-3_i32).to_le_bytes());
        assert!(matches!(
            decode(&negative),
            Err(ProtocolError::Malformed {
                field: "stage_count",
                reason: "negative",
                ..
            })
        ));
    }

    #[test]
    fn missing_terminator_and_trailer_are_malformed() {
        let mut bytes = encode(&Request::status(3)).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'x';
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::Malformed {
                reason: "missing_terminator",
                ..
            })
        ));

        let mut trailing = encode(&Request::status(3)).unwrap();
        trailing.push(9);
        assert!(matches!(
            decode(&trailing),
            Err(ProtocolError::Malformed {
                field: "trailer",
                ..
            })
        ));
    }

    #[test]
    fn unknown_stage_codes_pass_through_the_codec() {
        let mut request = sample();
        request.stages = vec![99, -4];
        let decoded = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded.stages, vec![99, -4]);
    }

    #[test]
    fn encode_rejects_oversized_requests() {
        let mut request = sample();
        request.stages = vec![0; MAX_STAGES + 1];
        assert!(encode(&request).is_err());

        let mut long_path = sample();
        long_path.output_path = PathBuf::from("a".repeat(MAX_PATH_LEN + 1));
        assert!(matches!(
            encode(&long_path),
            Err(ProtocolError::Malformed {
                field: "output_path",
                ..
            })
        ));
    }

    #[test]
    fn decode_from_consumes_one_message_per_call() {
        let mut stream = encode(&Request::status(1)).unwrap();
        stream.extend(encode(&sample()).unwrap());
        let mut reader = stream.as_slice();
        assert_eq!(decode_from(&mut reader).unwrap(), Request::status(1));
        assert_eq!(decode_from(&mut reader).unwrap(), sample());
        assert!(matches!(decode_from(&mut reader), Err(ProtocolError::Empty)));
    }
}
