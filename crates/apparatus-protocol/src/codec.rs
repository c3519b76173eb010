//! 长度前缀帧编解码
//!
//! 帧格式：`u32_le(len) || payload`，`payload` 为 JSON 对象。
//!
//! - 读取前缀前即遇到 EOF：对端正常关闭，返回 `Ok(None)`
//! - 前缀或载荷读到一半遇到 EOF：[`CodecError::TruncatedFrame`]
//! - 长度为 0 的帧视为保活，直接跳过

use crate::error::CodecError;
use crate::message::Message;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};
use tracing::trace;

/// 长度前缀字节数
pub const HEADER_LEN: usize = 4;

/// 默认最大载荷长度（1 MiB）
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 20;

/// 编码一条消息为完整帧
pub fn encode(msg: &Message) -> Result<Bytes, CodecError> {
    let payload = serde_json::to_vec(&msg.to_value()?)?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// 编码并一次性写出一帧
///
/// 调用方负责写互斥；整帧一次 `write_all`，不会与其他帧交错。
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> Result<(), CodecError> {
    let frame = encode(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    trace!("Sent {} frame ({} bytes)", msg.kind(), frame.len());
    Ok(())
}

/// 解析单个载荷
pub fn decode_payload(payload: &[u8]) -> Result<Message, CodecError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    Message::from_value(value)
}

/// 使用默认帧长上限从流中读取一条消息
pub fn decode_stream<R: Read>(reader: &mut R) -> Result<Option<Message>, CodecError> {
    read_message(reader, DEFAULT_MAX_FRAME_LEN)
}

fn read_message<R: Read>(reader: &mut R, max_frame_len: usize) -> Result<Option<Message>, CodecError> {
    match read_frame(reader, max_frame_len)? {
        Some(payload) => decode_payload(&payload).map(Some),
        None => Ok(None),
    }
}

/// 读取一个非空载荷；`Ok(None)` 表示对端在帧边界处关闭
fn read_frame<R: Read>(reader: &mut R, max_frame_len: usize) -> Result<Option<Vec<u8>>, CodecError> {
    loop {
        let mut header = [0u8; HEADER_LEN];
        let got = read_full(reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(CodecError::TruncatedFrame {
                expected: HEADER_LEN,
                actual: got,
            });
        }

        let len = u32::from_le_bytes(header) as usize;
        if len == 0 {
            trace!("Skipping empty frame");
            continue;
        }
        if len > max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: max_frame_len,
            });
        }

        let mut payload = vec![0u8; len];
        let got = read_full(reader, &mut payload)?;
        if got < len {
            return Err(CodecError::TruncatedFrame {
                expected: len,
                actual: got,
            });
        }
        return Ok(Some(payload));
    }
}

/// 读满 `buf` 或直到 EOF，返回实际读取的字节数
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// 带帧长上限的流式解码器
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// 读取下一条消息
    ///
    /// 返回 `Err(CodecError::MissingType)` 时流仍对齐在帧边界，可继续调用。
    pub fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        read_message(&mut self.inner, self.max_frame_len)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::command::Command;
    use crate::ids::CarouselId;
    use crate::message::{CommandFrame, IoEvent, Reply, TextMessage, WaitEvent};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::io::Cursor;

    fn sample_messages() -> Vec<Message> {
        let timestamp = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let mut args = serde_json::Map::new();
        args.insert("nested".into(), json!({"list": [1, 2.5, "x"], "flag": true}));
        args.insert("ratio".into(), json!(0.1 + 0.2));
        vec![
            Message::Command(CommandFrame {
                func: "set_light".into(),
                args,
            }),
            Message::Command(
                Command::SetTestLight {
                    state: true,
                    color: Some(Color::RED),
                    timestamp: Some(timestamp),
                }
                .to_frame()
                .unwrap(),
            ),
            Message::Reply(Reply::ok("command")),
            Message::Reply(Reply::failure("command", "unknown command: foo")),
            Message::IoEvent(IoEvent {
                pin_io: 17,
                name: "LEVER_TOUCHS_IO".into(),
                state: true,
                timestamp,
            }),
            Message::WaitEvent(WaitEvent {
                carousel_id: CarouselId::First,
                func_name: "move_to".into(),
            }),
            Message::Msg(TextMessage {
                msg: "heartbeat".into(),
            }),
        ]
    }

    #[test]
    fn test_round_trip_all_kinds() {
        for msg in sample_messages() {
            let frame = encode(&msg).unwrap();
            let mut cursor = Cursor::new(frame.to_vec());
            let decoded = decode_stream(&mut cursor).unwrap().unwrap();
            assert_eq!(decoded, msg);
            assert!(decode_stream(&mut cursor).unwrap().is_none());
        }
    }

    #[test]
    fn test_length_prefix_is_little_endian() {
        let frame = encode(&Message::heartbeat()).unwrap();
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);
    }

    #[test]
    fn test_truncated_payload() {
        let mut data = 100u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"{\"type\":");
        let err = decode_stream(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::TruncatedFrame {
                expected: 100,
                actual: 8
            }
        ));
    }

    #[test]
    fn test_truncated_header() {
        let err = decode_stream(&mut Cursor::new(vec![5u8, 0])).unwrap_err();
        assert!(matches!(
            err,
            CodecError::TruncatedFrame {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_clean_eof() {
        assert!(decode_stream(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let mut data = 0u32.to_le_bytes().to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&encode(&Message::heartbeat()).unwrap());
        let msg = decode_stream(&mut Cursor::new(data)).unwrap().unwrap();
        assert_eq!(msg, Message::heartbeat());
    }

    #[test]
    fn test_frame_too_large() {
        let data = 64u32.to_le_bytes().to_vec();
        let mut reader = FrameReader::new(Cursor::new(data)).with_max_frame_len(16);
        let err = reader.next_message().unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { len: 64, max: 16 }));
    }

    #[test]
    fn test_missing_type_keeps_stream_aligned() {
        let payload = br#"{"func":"init_hw","args":{}}"#;
        let mut data = (payload.len() as u32).to_le_bytes().to_vec();
        data.extend_from_slice(payload);
        data.extend_from_slice(&encode(&Message::heartbeat()).unwrap());

        let mut reader = FrameReader::new(Cursor::new(data));
        assert!(matches!(reader.next_message(), Err(CodecError::MissingType)));
        assert_eq!(reader.next_message().unwrap(), Some(Message::heartbeat()));
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let payload = b"not json";
        let mut data = (payload.len() as u32).to_le_bytes().to_vec();
        data.extend_from_slice(payload);
        let err = decode_stream(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
        assert!(err.is_fatal());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn float_args_round_trip(x in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
                let mut args = serde_json::Map::new();
                args.insert("value".into(), json!(x));
                let msg = Message::Command(CommandFrame { func: "set_light".into(), args });
                let frame = encode(&msg).unwrap();
                let decoded = decode_stream(&mut Cursor::new(frame.to_vec())).unwrap().unwrap();
                prop_assert_eq!(decoded, msg);
            }
        }
    }
}
