//! Request framing: command argument lists to the array-of-bulks wire form.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::arg::{Arg, ArgError, EncodeOptions};
use super::write;

/// Errors from writing requests to a sink.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// An argument could not be encoded. Nothing was written.
    #[error("encode error")]
    Encode(#[from] ArgError),
    /// The sink failed.
    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Encodes each non-empty argument list as `*<n>\r\n` followed by its
/// arguments' bulk forms. Empty lists emit nothing.
///
/// On error the buffer is left exactly as it was passed in.
pub fn encode_requests(
    buf: &mut BytesMut,
    requests: &[&[Arg]],
    opts: EncodeOptions,
) -> Result<(), ArgError> {
    let checkpoint = buf.len();
    for args in requests {
        if args.is_empty() {
            continue;
        }
        write::write_array_len(buf, args.len());
        for arg in *args {
            if let Err(err) = arg.write(buf, opts) {
                buf.truncate(checkpoint);
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Encodes the requests, writes the bytes to `sink`, and flushes once.
///
/// A successful call produces a stream a RESP server parses as exactly `k`
/// commands, `k` being the number of non-empty argument lists, in order.
/// Encoding errors surface before any byte reaches the sink.
pub async fn write_requests<W: AsyncWrite + Unpin>(
    sink: &mut W,
    requests: &[&[Arg]],
    opts: EncodeOptions,
) -> Result<(), RequestError> {
    let mut buf = BytesMut::new();
    encode_requests(&mut buf, requests, opts)?;
    sink.write_all(&buf).await?;
    sink.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(requests: &[&[Arg]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_requests(&mut buf, requests, EncodeOptions::default()).unwrap();
        buf.to_vec()
    }

    #[test]
    fn simple_ping() {
        assert_eq!(encoded(&[&["PING".into()]]), b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn mixed_arg_types() {
        let args: Vec<Arg> = vec![
            "str".into(),
            1i64.into(),
            2i64.into(),
            3i64.into(),
            4.0f64.into(),
            Arg::name(None, "kw"),
            'x'.into(),
        ];
        assert_eq!(
            encoded(&[&args]),
            &b"*7\r\n$3\r\nstr\r\n:1\r\n:2\r\n:3\r\n$3\r\n4.0\r\n$2\r\nkw\r\n$1\r\nx\r\n"[..]
        );
    }

    #[test]
    fn null_with_markers_on() {
        assert_eq!(encoded(&[&[Arg::Null]]), b"*1\r\n$2\r\n\x00_\r\n");
    }

    #[test]
    fn byte_array_marked_and_raw() {
        assert_eq!(
            encoded(&[&[vec![97u8, 98, 99].into()]]),
            b"*1\r\n$5\r\n\x00<abc\r\n"
        );
        let raw = Arg::from(vec![97u8, 98, 99]).into_raw().unwrap();
        assert_eq!(encoded(&[&[raw]]), b"*1\r\n$3\r\nabc\r\n");
    }

    #[test]
    fn empty_lists_are_skipped() {
        assert_eq!(
            encoded(&[&[], &["PING".into()], &[]]),
            b"*1\r\n$4\r\nPING\r\n"
        );
        assert_eq!(encoded(&[]), b"");
    }

    #[test]
    fn pipelined_commands_in_order() {
        let first: Vec<Arg> = vec!["ECHO".into(), "one".into()];
        let second: Vec<Arg> = vec!["PING".into()];
        assert_eq!(
            encoded(&[&first, &second]),
            &b"*2\r\n$4\r\nECHO\r\n$3\r\none\r\n*1\r\n$4\r\nPING\r\n"[..]
        );
    }

    #[test]
    fn encode_error_leaves_buffer_untouched() {
        let mut buf = BytesMut::from(&b"prior"[..]);
        let bad: Vec<Arg> = vec!["ok".into(), Arg::Str("\u{0}bad".into())];
        let err = encode_requests(&mut buf, &[&bad], EncodeOptions::default());
        assert_eq!(err, Err(ArgError::ReservedNull));
        assert_eq!(&buf[..], b"prior");
    }

    #[test]
    fn encoded_arguments_decode_back_through_a_resp_reader() {
        use crate::resp3::reply::{parse_reply, Reply};

        let args: Vec<Arg> = vec![
            "set".into(),
            42i64.into(),
            4.0f64.into(),
            Arg::name(Some("cache"), "sessions"),
        ];
        let mut buf = BytesMut::new();
        encode_requests(&mut buf, &[&args], EncodeOptions::default()).unwrap();

        let (reply, consumed) = parse_reply(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Bulk(b"set".to_vec()),
                Reply::Int(42),
                Reply::Bulk(b"4.0".to_vec()),
                Reply::Bulk(b"cache/sessions".to_vec()),
            ])
        );
    }

    #[tokio::test]
    async fn write_flushes_to_the_sink() {
        let mut sink = Vec::new();
        write_requests(&mut sink, &[&["PING".into()]], EncodeOptions::default())
            .await
            .unwrap();
        assert_eq!(sink, b"*1\r\n$4\r\nPING\r\n");
    }

    #[tokio::test]
    async fn write_error_emits_nothing() {
        let mut sink = Vec::new();
        let bad: Vec<Arg> = vec![Arg::Null];
        let res = write_requests(
            &mut sink,
            &[&bad],
            EncodeOptions {
                blob_markers: false,
            },
        )
        .await;
        assert!(matches!(res, Err(RequestError::Encode(_))));
        assert!(sink.is_empty());
    }
}
