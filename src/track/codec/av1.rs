use bytes::Bytes;

use super::{CodecConfig, UnitKind, VideoCodec};
use crate::error::Result;
use crate::frame::AvFrame;
use crate::media::av1::{contains_sequence_header, obu, obu_type_of, split_obus, with_size_field};
use crate::media::{Av1Config, VideoCodecId};
use crate::rtp::av1::{Av1Depacketizer, Av1Packetizer};
use crate::rtp::{Depacketizer, Packetizer, RtpSequencer};

/// AV1 keeps the sequence header OBU in-band: it marks the keyframe and
/// decoders expect it there.
#[derive(Debug, Default)]
pub(crate) struct Av1Codec {
    config: Option<Av1Config>,
}

impl VideoCodec for Av1Codec {
    fn id(&self) -> VideoCodecId {
        VideoCodecId::Av1
    }

    fn classify(&self, unit: &[u8]) -> UnitKind {
        match obu_type_of(unit) {
            Some(obu::SEQUENCE_HEADER) => UnitKind::Parameter { keep: true },
            Some(obu::TEMPORAL_DELIMITER | obu::PADDING) | None => UnitKind::Ignored,
            Some(_) => UnitKind::Media,
        }
    }

    fn is_keyframe(&self, frame: &AvFrame) -> bool {
        contains_sequence_header(frame.units())
    }

    fn update_parameter(&mut self, unit: Bytes) -> bool {
        let parsed = with_size_field(&unit).and_then(|sized| Av1Config::from_sequence_header(&sized));
        match parsed {
            Ok(config) if self.config.as_ref() != Some(&config) => {
                self.config = Some(config);
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "unusable AV1 sequence header");
                false
            }
        }
    }

    fn load_record(&mut self, record: Bytes) -> Result<()> {
        self.config = Some(Av1Config::parse(record)?);
        Ok(())
    }

    fn config(&self) -> Option<CodecConfig> {
        let config = self.config.as_ref()?;
        Some(CodecConfig {
            record: config.to_bytes(),
            parameter_sets: vec![config.config_obus.clone()],
            codec_string: config.codec_string(),
        })
    }

    fn split_body(&self, body: &Bytes) -> Result<Vec<Bytes>> {
        split_obus(body)
    }

    fn repeats_parameter_sets(&self) -> bool {
        false
    }

    fn depacketizer(&self) -> Box<dyn Depacketizer> {
        Box::new(Av1Depacketizer::new())
    }

    fn packetizer(&self, sequencer: RtpSequencer, mtu: usize) -> Box<dyn Packetizer> {
        Box::new(Av1Packetizer::new(sequencer).with_mtu(mtu))
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::media::av1::write_leb128;

    fn sequence_header_obu() -> Bytes {
        let payload = [0b0000_0000, 0b0000_0000, 0b0000_0000, 0b0100_0000, 0x00];
        let mut out = BytesMut::new();
        out.put_u8(0x0A);
        write_leb128(&mut out, payload.len() as u64);
        out.put_slice(&payload);
        out.freeze()
    }

    #[test]
    fn test_sequence_header_kept_and_parsed() {
        let mut codec = Av1Codec::default();
        let seq = sequence_header_obu();
        assert_eq!(codec.classify(&seq), UnitKind::Parameter { keep: true });
        assert!(codec.update_parameter(seq.clone()));
        assert!(!codec.update_parameter(seq.clone()));
        assert_eq!(codec.config().unwrap().codec_string, "av01.0.08M.08");

        let mut frame = AvFrame::default();
        frame.append_unit(seq);
        frame.append_unit(Bytes::from_static(&[0x32, 0x01, 0xAA]));
        assert!(codec.is_keyframe(&frame));
    }

    #[test]
    fn test_delimiters_ignored() {
        let codec = Av1Codec::default();
        assert_eq!(codec.classify(&[0x12, 0x00]), UnitKind::Ignored);
        assert_eq!(codec.classify(&[0x32, 0x01, 0xAA]), UnitKind::Media);
        assert!(!codec.repeats_parameter_sets());
    }
}
