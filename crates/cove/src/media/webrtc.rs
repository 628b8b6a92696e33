//! webrtc-rs media backend. Each session wraps an `RTCPeerConnection`;
//! callbacks are forwarded onto the session's event queue so the channel
//! actor sees them in order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{
    ConnectivityState, MediaEngine, MediaError, MediaSession, MediaSessionHandle, RemoteTrack,
    SessionEvent,
};
use crate::capture::CaptureTrack;
use crate::protocol::{IceCandidate, SessionDescription};

fn map_state(state: RTCPeerConnectionState) -> ConnectivityState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectivityState::New,
        RTCPeerConnectionState::Connecting => ConnectivityState::Connecting,
        RTCPeerConnectionState::Connected => ConnectivityState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectivityState::Failed,
        RTCPeerConnectionState::Closed => ConnectivityState::Closed,
    }
}

pub struct WebRtcEngine {
    ice_servers: Vec<String>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<String>) -> Arc<Self> {
        Arc::new(Self { ice_servers })
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_session(&self) -> Result<MediaSessionHandle, MediaError> {
        let mut media = RtcMediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|err| MediaError::Setup(err.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|err| MediaError::Setup(err.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|err| MediaError::Setup(err.to_string()))?,
        );

        let (events_tx, events) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(SessionEvent::IceCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "dropping unserializable ice candidate");
                    }
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(SessionEvent::ConnectivityChanged(map_state(state)));
            })
        }));

        let tx = events_tx.clone();
        pc.on_negotiation_needed(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(SessionEvent::NegotiationNeeded);
            })
        }));

        let tx = events_tx.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _recv: Arc<RTCRtpReceiver>, _tr: Arc<RTCRtpTransceiver>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(SessionEvent::TrackReceived(RemoteTrack {
                        id: track.id(),
                    }));
                })
            },
        ));

        Ok(MediaSessionHandle {
            session: Arc::new(WebRtcSession { pc }),
            events,
        })
    }
}

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcSession {
    fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, MediaError> {
        let converted = match desc.kind.as_str() {
            "offer" => RTCSessionDescription::offer(desc.sdp.clone()),
            "answer" => RTCSessionDescription::answer(desc.sdp.clone()),
            other => {
                return Err(MediaError::Description(format!(
                    "unsupported description type {other:?}"
                )))
            }
        };
        converted.map_err(|err| MediaError::Description(err.to_string()))
    }

    fn from_rtc(desc: RTCSessionDescription) -> SessionDescription {
        SessionDescription {
            kind: desc.sdp_type.to_string(),
            sdp: desc.sdp,
        }
    }
}

#[async_trait]
impl MediaSession for WebRtcSession {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| MediaError::Description(err.to_string()))?;
        Ok(Self::from_rtc(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| MediaError::Description(err.to_string()))?;
        Ok(Self::from_rtc(answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        let rtc = Self::to_rtc(&desc)?;
        self.pc
            .set_local_description(rtc)
            .await
            .map_err(|err| MediaError::Description(err.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        let rtc = Self::to_rtc(&desc)?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|err| MediaError::Description(err.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| MediaError::Candidate(err.to_string()))
    }

    async fn add_track(&self, track: &CaptureTrack) -> Result<(), MediaError> {
        let source = track
            .source()
            .ok_or_else(|| MediaError::Setup("capture track has no media source".into()))?;
        let local = source
            .clone()
            .downcast::<TrackLocalStaticSample>()
            .map_err(|_| MediaError::Setup("capture track source is not a sample track".into()))?;
        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|err| MediaError::Setup(err.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(error = %err, "peer connection close failed");
        }
    }
}
