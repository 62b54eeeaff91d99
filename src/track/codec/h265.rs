use bytes::Bytes;

use super::{CodecConfig, UnitKind, VideoCodec};
use crate::error::{MediaError, Result};
use crate::frame::AvFrame;
use crate::media::h264::split_avcc;
use crate::media::h265::{contains_irap, nal, nalu_type_of};
use crate::media::{HevcConfig, VideoCodecId};
use crate::rtp::h265::{H265Depacketizer, H265Packetizer};
use crate::rtp::{Depacketizer, Packetizer, RtpSequencer};

#[derive(Debug, Default)]
pub(crate) struct H265Codec {
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    config: Option<HevcConfig>,
    using_donl: bool,
}

impl H265Codec {
    /// RTP payloads carry DONL/DOND fields (sprop-max-don-diff > 0)
    pub(crate) fn with_donl(mut self, using_donl: bool) -> Self {
        self.using_donl = using_donl;
        self
    }

    fn matches_config(&self, vps: &Bytes, sps: &Bytes, pps: &Bytes) -> bool {
        self.config.as_ref().is_some_and(|c| {
            c.vps.first() == Some(vps) && c.sps.first() == Some(sps) && c.pps.first() == Some(pps)
        })
    }
}

impl VideoCodec for H265Codec {
    fn id(&self) -> VideoCodecId {
        VideoCodecId::H265
    }

    fn classify(&self, unit: &[u8]) -> UnitKind {
        match nalu_type_of(unit) {
            Some(nal::VPS | nal::SPS | nal::PPS) => UnitKind::Parameter { keep: false },
            Some(nal::AUD) | None => UnitKind::Ignored,
            Some(_) => UnitKind::Media,
        }
    }

    fn is_keyframe(&self, frame: &AvFrame) -> bool {
        contains_irap(frame.units())
    }

    fn update_parameter(&mut self, unit: Bytes) -> bool {
        match nalu_type_of(&unit) {
            Some(nal::VPS) => self.vps = Some(unit),
            Some(nal::SPS) => self.sps = Some(unit),
            Some(nal::PPS) => self.pps = Some(unit),
            _ => return false,
        }
        let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) else {
            return false;
        };
        if self.matches_config(vps, sps, pps) {
            return false;
        }
        match HevcConfig::from_parameter_sets(vps.clone(), sps.clone(), pps.clone()) {
            Ok(config) => {
                self.config = Some(config);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "unusable H.265 parameter sets");
                false
            }
        }
    }

    fn load_record(&mut self, record: Bytes) -> Result<()> {
        let config = HevcConfig::parse(record)?;
        self.vps = config.vps.first().cloned();
        self.sps = config.sps.first().cloned();
        self.pps = config.pps.first().cloned();
        self.config = Some(config);
        Ok(())
    }

    fn config(&self) -> Option<CodecConfig> {
        let config = self.config.as_ref()?;
        Some(CodecConfig {
            record: config.to_bytes(),
            parameter_sets: config
                .vps
                .iter()
                .chain(config.sps.iter())
                .chain(config.pps.iter())
                .cloned()
                .collect(),
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
        Box::new(H265Depacketizer::new().with_donl(self.using_donl))
    }

    fn packetizer(&self, sequencer: RtpSequencer, mtu: usize) -> Box<dyn Packetizer> {
        Box::new(H265Packetizer::new(sequencer).with_mtu(mtu))
    }
}
