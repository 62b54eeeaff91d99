use bytes::Bytes;

use super::{CodecConfig, UnitKind, VideoCodec};
use crate::error::{MediaError, Result};
use crate::frame::AvFrame;
use crate::media::h264::{contains_idr, split_avcc};
use crate::media::{AvcConfig, NaluType, VideoCodecId};
use crate::rtp::h264::{H264Depacketizer, H264Packetizer};
use crate::rtp::{Depacketizer, Packetizer, RtpSequencer};

#[derive(Debug, Default)]
pub(crate) struct H264Codec {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    config: Option<AvcConfig>,
}

impl VideoCodec for H264Codec {
    fn id(&self) -> VideoCodecId {
        VideoCodecId::H264
    }

    fn classify(&self, unit: &[u8]) -> UnitKind {
        match NaluType::of(unit) {
            Some(NaluType::Sps | NaluType::Pps) => UnitKind::Parameter { keep: false },
            Some(NaluType::Aud | NaluType::Filler) | None => UnitKind::Ignored,
            Some(_) => UnitKind::Media,
        }
    }

    fn is_keyframe(&self, frame: &AvFrame) -> bool {
        contains_idr(frame.units())
    }

    fn update_parameter(&mut self, unit: Bytes) -> bool {
        match NaluType::of(&unit) {
            Some(NaluType::Sps) => self.sps = Some(unit),
            Some(NaluType::Pps) => self.pps = Some(unit),
            _ => return false,
        }
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return false;
        };
        if self
            .config
            .as_ref()
            .is_some_and(|c| c.sps.first() == Some(sps) && c.pps.first() == Some(pps))
        {
            return false;
        }
        match AvcConfig::from_parameter_sets(sps.clone(), pps.clone()) {
            Ok(config) => {
                self.config = Some(config);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "unusable H.264 parameter sets");
                false
            }
        }
    }

    fn load_record(&mut self, record: Bytes) -> Result<()> {
        let config = AvcConfig::parse(record)?;
        self.sps = config.sps.first().cloned();
        self.pps = config.pps.first().cloned();
        self.config = Some(config);
        Ok(())
    }

    fn config(&self) -> Option<CodecConfig> {
        let config = self.config.as_ref()?;
        Some(CodecConfig {
            record: config.to_bytes(),
            parameter_sets: config.sps.iter().chain(config.pps.iter()).cloned().collect(),
            codec_string: config.codec_string(),
        })
    }

    fn split_body(&self, body: &Bytes) -> Result<Vec<Bytes>> {
        let size = self
            .config
            .as_ref()
            .map(|c| c.nalu_length_size)
            .ok_or(MediaError::MissingSequenceHeader)?;
        split_avcc(body, size)
    }

    fn depacketizer(&self) -> Box<dyn Depacketizer> {
        Box::new(H264Depacketizer::new())
    }

    fn packetizer(&self, sequencer: RtpSequencer, mtu: usize) -> Box<dyn Packetizer> {
        Box::new(H264Packetizer::new(sequencer).with_mtu(mtu))
    }
}
