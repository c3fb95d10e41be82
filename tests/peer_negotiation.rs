//! Offer/answer against an in-memory peer connector

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use webrtc::media::Sample;

use framecast::error::{SignalingError, SinkError, SourceError};
use framecast::media::{CodecProvider, DecodedImage, Frame, OverlayStyle, VideoDecoder, VideoEncoder};
use framecast::registry::RegistryError;
use framecast::signaling::{OfferRequest, PeerConnector, PeerLink, PeerRequest, SignalingHandler};
use framecast::sink::{PeerState, SampleWriter};
use framecast::source::{
    CameraTable, CaptureGeometry, DeviceHub, RetryPolicy, SharingMode, SourceFactory, SourceSpec,
};
use framecast::SessionLauncher;

use common::EndlessCameras;

struct Raw;

impl VideoEncoder for Raw {
    fn encode(&mut self, frame: &Frame) -> Result<Bytes, SinkError> {
        Ok(frame.data.clone())
    }
}

struct Blind;

impl VideoDecoder for Blind {
    fn decode(&mut self, _payload: &[u8]) -> Result<Option<DecodedImage>, SourceError> {
        Ok(None)
    }
}

struct RawCodecs;

impl CodecProvider for RawCodecs {
    fn mime_type(&self) -> &'static str {
        "video/raw"
    }

    fn encoder(&self, _w: u32, _h: u32, _fps: u32) -> Result<Box<dyn VideoEncoder>, SignalingError> {
        Ok(Box::new(Raw))
    }

    fn decoder(&self) -> Result<Box<dyn VideoDecoder>, SignalingError> {
        Ok(Box::new(Blind))
    }
}

#[derive(Default)]
struct CountingTrack {
    samples: AtomicUsize,
}

#[async_trait]
impl SampleWriter for CountingTrack {
    async fn write_sample(&self, _sample: &Sample) -> Result<(), SinkError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers every offer after a short delay so negotiations overlap
#[derive(Default)]
struct SlowLoopback {
    tracks: Mutex<Vec<Arc<CountingTrack>>>,
    states: Mutex<Vec<watch::Sender<PeerState>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PeerConnector for SlowLoopback {
    async fn connect(&self, request: PeerRequest) -> Result<PeerLink, SignalingError> {
        tokio::time::sleep(Duration::from_millis(20)).await;

        let track = Arc::new(CountingTrack::default());
        self.tracks.lock().push(Arc::clone(&track));
        let (state_tx, state_rx) = watch::channel(PeerState::Connected);
        self.states.lock().push(state_tx);

        let closed = Arc::clone(&self.closed);
        Ok(PeerLink {
            id: format!("loopback-{}", self.tracks.lock().len()),
            answer_sdp: format!("answer:{}", request.offer_sdp),
            writer: track,
            state: state_rx,
            inbound: None,
            closer: Box::pin(async move {
                closed.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }
}

fn handler(
    max_sessions: usize,
    mode: SharingMode,
    cameras: Arc<EndlessCameras>,
    connector: Arc<SlowLoopback>,
) -> SignalingHandler {
    let hub = DeviceHub::new(Arc::clone(&cameras) as _, mode, RetryPolicy::default());
    let sources = SourceFactory::new(cameras, hub, 30);
    let launcher = Arc::new(SessionLauncher::new(
        common::registry(max_sessions),
        sources,
        common::queue(),
        OverlayStyle::default(),
    ));

    let mut table = CameraTable::new();
    table.insert(
        "usb".to_string(),
        SourceSpec::Device {
            index: Some(0),
            pipeline: None,
        },
    );

    SignalingHandler::new(launcher, connector, Arc::new(RawCodecs), CaptureGeometry::default())
        .cameras(table, "usb")
}

fn offer(sdp: &str) -> OfferRequest {
    serde_json::from_value(serde_json::json!({ "sdp": sdp, "type": "offer" })).unwrap()
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_concurrent_offers_share_one_device() {
    let cameras = Arc::new(EndlessCameras::new());
    let connector = Arc::new(SlowLoopback::default());
    let handler = handler(0, SharingMode::Relay, Arc::clone(&cameras), Arc::clone(&connector));

    let (first, second) = tokio::time::timeout(Duration::from_secs(3), async {
        tokio::join!(
            handler.negotiate(offer("v=0 a"), None),
            handler.negotiate(offer("v=0 b"), None)
        )
    })
    .await
    .unwrap();

    assert_eq!(first.unwrap().sdp, "answer:v=0 a");
    assert_eq!(second.unwrap().sdp, "answer:v=0 b");
    assert_eq!(cameras.opened.load(Ordering::SeqCst), 1);

    let tracks: Vec<Arc<CountingTrack>> = connector.tracks.lock().clone();
    assert_eq!(tracks.len(), 2);
    wait_until(|| tracks.iter().all(|t| t.samples.load(Ordering::SeqCst) > 0)).await;

    // Both peers leave; both sessions end and close their connections
    for state in connector.states.lock().iter() {
        state.send_replace(PeerState::Closed);
    }
    let closed = Arc::clone(&connector.closed);
    wait_until(|| closed.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn test_exclusive_device_rejects_second_offer() {
    let cameras = Arc::new(EndlessCameras::new());
    let connector = Arc::new(SlowLoopback::default());
    let handler = handler(0, SharingMode::Exclusive, cameras, Arc::clone(&connector));

    handler.negotiate(offer("v=0 a"), None).await.unwrap();
    let second = handler.negotiate(offer("v=0 b"), None).await;

    assert!(matches!(
        second,
        Err(SignalingError::Source(SourceError::Busy(_)))
    ));
    // Rejected before any peer connection was made
    assert_eq!(connector.tracks.lock().len(), 1);
}

#[tokio::test]
async fn test_session_limit_applies_to_offers() {
    let cameras = Arc::new(EndlessCameras::new());
    let connector = Arc::new(SlowLoopback::default());
    let handler = handler(1, SharingMode::Relay, cameras, Arc::clone(&connector));

    handler.negotiate(offer("v=0 a"), None).await.unwrap();
    let second = handler.negotiate(offer("v=0 b"), None).await;

    assert!(matches!(
        second,
        Err(SignalingError::Registry(RegistryError::CapacityReached { max: 1 }))
    ));
    assert_eq!(connector.tracks.lock().len(), 1);
}
