use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

pub const HSLINK_VID: u16 = 0x0D28;
pub const HSLINK_PID: u16 = 0x0204;

/// Report id prefixed to every host-to-device payload.
pub const DOWN_REPORT_ID: u8 = 0x01;
/// Report id the probe puts in front of its replies.
pub const UP_REPORT_ID: u8 = 0x02;

/// HID report framing used by the HSLink probe.
///
/// Replies carry a NUL-terminated UTF-8 string after the report id; the
/// rest of the report is zero padding. On a byte stream a reply may arrive
/// in pieces, so nothing is decoded until the terminator has been seen.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportCodec;

fn skip_padding(src: &mut BytesMut) {
    let padding = src.iter().take_while(|&&b| b == 0).count();
    src.advance(padding);
}

impl<'a> Encoder<&'a [u8]> for ReportCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.put_u8(DOWN_REPORT_ID);
        dst.extend_from_slice(item);
        Ok(())
    }
}

impl Decoder for ReportCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        // Padding of a previous report can lead the buffer.
        skip_padding(src);
        if src.is_empty() {
            return Ok(None);
        }

        let report_id = src[0];
        if report_id != UP_REPORT_ID {
            src.clear();
            return Err(Error::UnexpectedReportId(report_id));
        }

        let Some(end) = src[1..].iter().position(|&b| b == 0) else {
            return Ok(None);
        };

        let report = src.split_to(end + 2);
        skip_padding(src);

        String::from_utf8(report[1..=end].to_vec())
            .map(Some)
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}
