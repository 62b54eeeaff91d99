//! End-to-end publish/subscribe scenarios through a private directory

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use livehub::media::VideoCodecId;
use livehub::rtp::RtpPacket;
use livehub::stream::{StreamEvent, StreamState};
use livehub::{Directory, EngineConfig, PublishConfig, ReadMode, RingConfig, SubscribeConfig, VideoTrack};
use tracing_subscriber::EnvFilter;

const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00];
const P: &[u8] = &[0x41, 0x9a, 0x02, 0x00];
const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01];
const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
const SPS_HIGH: &[u8] = &[0x67, 0x64, 0x00, 0x28, 0xAC, 0x2B];

fn annexb(nalus: &[&[u8]]) -> Bytes {
    let mut out = BytesMut::new();
    for nalu in nalus {
        out.put_slice(&[0, 0, 0, 1]);
        out.put_slice(nalu);
    }
    out.freeze()
}

/// Frame `i` at 40 ms spacing, IDR every `gop` frames
fn push(track: &mut VideoTrack, i: u32, gop: u32) {
    let nalu = if i % gop == 0 { IDR } else { P };
    let ts = i * 40 * 90;
    track.write_annexb(ts, Some(ts), &annexb(&[nalu])).unwrap();
}

/// `RUST_LOG=livehub=debug cargo test` shows the stream lifecycle
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn state(stream: &livehub::StreamHandle) -> StreamState {
    stream.summary().await.unwrap().state
}

#[tokio::test(start_paused = true)]
async fn basic_publish_subscribe_starts_on_idr() {
    init_tracing();
    let directory = Directory::new();
    let publisher = directory.publish("live/a", None).await.unwrap();
    let mut video = publisher.create_video_track("h264", VideoCodecId::H264);
    for i in 0..16 {
        push(&mut video, i, 1000);
    }

    let mut subscriber = directory.subscribe("live/a", None).await.unwrap();
    let track = subscriber.wait_video_track().await.unwrap();
    let mut reader = subscriber.read_track(&track);

    let first = reader.read_frame().await.unwrap();
    assert_eq!(first.frame.sequence, 0);
    assert!(first.frame.iframe);
    assert_eq!(first.abs_time, 1);

    for i in 16..30 {
        push(&mut video, i, 1000);
    }
    let mut sequences = vec![first.frame.sequence];
    for _ in 16..30 {
        sequences.push(reader.read_frame().await.unwrap().frame.sequence);
    }
    let expected: Vec<u32> = std::iter::once(0).chain(16..30).collect();
    assert_eq!(sequences, expected);
}

#[tokio::test(start_paused = true)]
async fn rtp_fu_a_reassembles_one_nalu() {
    init_tracing();
    let directory = Directory::new();
    let publisher = directory.publish("live/rtp", None).await.unwrap();
    let mut video = publisher.create_video_track("h264", VideoCodecId::H264);
    let mut subscriber = directory
        .subscribe("live/rtp", Some(SubscribeConfig::default().read_mode(ReadMode::NoJump)))
        .await
        .unwrap();

    let fragments: [(u8, &[u8], bool); 3] = [(0x85, b"AA", false), (0x05, b"BB", false), (0x45, b"CC", true)];
    for (i, (header, body, marker)) in fragments.into_iter().enumerate() {
        let mut payload = vec![0x7C, header];
        payload.extend_from_slice(body);
        let mut packet = RtpPacket::new(96, 100 + i as u16, 90_000, 0x1234, Bytes::from(payload));
        packet.marker = marker;
        video.write_rtp(packet).unwrap();
    }

    let track = subscriber.wait_video_track().await.unwrap();
    let frame = subscriber.read_track(&track).read_frame().await.unwrap();
    assert_eq!(frame.frame.au_list.len(), 1);
    assert_eq!(frame.frame.au_list[0], vec![Bytes::from_static(b"\x65AABBCC")]);
    assert_eq!(frame.frame.pts, 90_000);
}

#[tokio::test(start_paused = true)]
async fn slow_reader_is_routed_around_and_resyncs_on_idr() {
    init_tracing();
    let config = EngineConfig::default().ring(RingConfig::default().video_size(256));
    let directory = Directory::with_config(config);
    let publisher = directory.publish("live/slow", None).await.unwrap();
    let mut video = publisher.create_video_track("h264", VideoCodecId::H264);
    push(&mut video, 0, 50);

    let mut subscriber = directory.subscribe("live/slow", None).await.unwrap();
    let track = subscriber.wait_video_track().await.unwrap();
    let mut reader = subscriber.read_track(&track);
    assert_eq!(reader.read_frame().await.unwrap().frame.sequence, 0);

    // the reader stalls while 999 more frames go by
    for i in 1..1000 {
        push(&mut video, i, 50);
    }
    assert!(track.ring().size() > 256);
    assert!(track.ring().discards() >= 1);

    let frame = reader.read_frame().await.unwrap();
    assert!(frame.frame.iframe);
    assert_eq!(frame.frame.sequence, 950);
    assert_eq!(frame.delay, 49);
    assert_eq!(reader.skipped(), 949);

    // and from there it reads on without gaps
    push(&mut video, 1000, 50);
    assert_eq!(reader.read_frame().await.unwrap().frame.sequence, 951);
}

#[tokio::test(start_paused = true)]
async fn kick_replaces_publisher() {
    init_tracing();
    let directory = Directory::new();
    let mut first = directory.publish("live/b", None).await.unwrap();
    let mut old_video = first.create_video_track("h264", VideoCodecId::H264);
    push(&mut old_video, 0, 50);

    let refused = directory.publish("live/b", None).await;
    assert!(matches!(refused, Err(livehub::RegistryError::PublisherExists(_))));

    let second = directory
        .publish("live/b", Some(PublishConfig::default().kick_exist(true)))
        .await
        .unwrap();
    let kicked = loop {
        match first.next_event().await {
            Some(StreamEvent::Kick) => break true,
            Some(_) => continue,
            None => break false,
        }
    };
    assert!(kicked);

    let mut new_video = second.create_video_track("h264", VideoCodecId::H264);
    new_video
        .write_annexb(0, Some(0), &annexb(&[&[0x65, 0x22, 0x22]]))
        .unwrap();
    // the kicked publisher's writes no longer reach the stream
    push(&mut old_video, 1, 50);

    let mut subscriber = directory.subscribe("live/b", None).await.unwrap();
    let track = subscriber.wait_video_track().await.unwrap();
    assert!(track.same_track(&new_video.handle()));
    let frame = subscriber.read_track(&track).read_frame().await.unwrap();
    assert_eq!(frame.frame.au_list[0], vec![Bytes::from_static(&[0x65, 0x22, 0x22])]);

    drop(first);
    let summary = second.stream().summary().await.unwrap();
    assert_eq!(summary.state, StreamState::Publishing);
    assert_eq!(summary.publisher, Some(second.id()));
}

#[tokio::test(start_paused = true)]
async fn wait_close_survives_quick_rejoin() {
    init_tracing();
    let directory = Directory::new();
    let config = PublishConfig::default().wait_close_timeout(Duration::from_secs(2));
    let publisher = directory.publish("live/wc", Some(config)).await.unwrap();
    let stream = publisher.stream().clone();

    let subscriber = directory.subscribe("live/wc", None).await.unwrap();
    drop(subscriber);
    assert_eq!(state(&stream).await, StreamState::WaitClose);

    tokio::time::sleep(Duration::from_millis(1900)).await;
    let subscriber = directory.subscribe("live/wc", None).await.unwrap();
    assert_eq!(state(&stream).await, StreamState::Publishing);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(state(&stream).await, StreamState::Publishing);

    drop(subscriber);
    assert_eq!(state(&stream).await, StreamState::WaitClose);
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(state(&stream).await, StreamState::Closed);
}

#[tokio::test(start_paused = true)]
async fn sequence_header_change_is_flagged() {
    init_tracing();
    let directory = Directory::new();
    let publisher = directory.publish("live/sps", None).await.unwrap();
    let mut video = publisher.create_video_track("h264", VideoCodecId::H264);
    video.write_annexb(0, Some(0), &annexb(&[SPS, PPS, IDR])).unwrap();

    let mut subscriber = directory.subscribe("live/sps", None).await.unwrap();
    let track = subscriber.wait_video_track().await.unwrap();
    let mut reader = subscriber.read_track(&track);
    let first = reader.read_frame().await.unwrap();
    assert!(first.dec_conf_changed);
    let before = track.decoder_config();

    video.write_annexb(3600, Some(3600), &annexb(&[P])).unwrap();
    assert!(!reader.read_frame().await.unwrap().dec_conf_changed);

    video
        .write_annexb(7200, Some(7200), &annexb(&[SPS_HIGH, PPS, IDR]))
        .unwrap();
    let changed = reader.read_frame().await.unwrap();
    assert!(changed.dec_conf_changed);
    assert!(changed.frame.iframe);

    let after = track.decoder_config();
    assert!(after.seq > before.seq);
    assert_eq!(after.parameter_sets[0], Bytes::from_static(SPS_HIGH));
    assert_ne!(after.record, before.record);
}
