use presenz_core::{
    EncodeError, Encoding, EnrolledIdentity, FaceEncoder, MatchResult, Matcher, NearestMatcher,
    RecognitionParams,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Probe {
        image: Vec<u8>,
        gallery: Vec<EnrolledIdentity>,
        params: RecognitionParams,
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
    EnrollSample {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Encoding, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Encode a kiosk capture and match it against the gallery.
    pub async fn probe(
        &self,
        image: Vec<u8>,
        gallery: Vec<EnrolledIdentity>,
        params: RecognitionParams,
    ) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Probe {
                image,
                gallery,
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Encode one enrollment sample (exactly one face required).
    pub async fn enroll_sample(&self, image: Vec<u8>) -> Result<Encoding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::EnrollSample {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The encoder owns the ONNX sessions, so all inference is serialized on
/// this thread; callers only ever see it through the async handle.
pub fn spawn_engine(mut encoder: Box<dyn FaceEncoder + Send>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("presenz-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Probe {
                        image,
                        gallery,
                        params,
                        reply,
                    } => {
                        let result = run_probe(&mut *encoder, &image, &gallery, params);
                        let _ = reply.send(result);
                    }
                    EngineRequest::EnrollSample { image, reply } => {
                        let result = encoder.encode_enrollment(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

/// Encode the capture, then run the nearest-neighbor match.
fn run_probe(
    encoder: &mut dyn FaceEncoder,
    image: &[u8],
    gallery: &[EnrolledIdentity],
    params: RecognitionParams,
) -> Result<MatchResult, EngineError> {
    let probe = encoder.encode_probe(image)?;
    let result = NearestMatcher.compare(&probe, gallery, params);
    tracing::debug!(
        matched = result.matched,
        distance = result.distance,
        confidence = result.confidence,
        candidates = gallery.len(),
        "probe matched against gallery"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encoder stub returning a fixed vector, bypassing image decode.
    struct StubEncoder {
        values: Vec<f32>,
    }

    impl FaceEncoder for StubEncoder {
        fn encode_probe(&mut self, _image: &[u8]) -> Result<Encoding, EncodeError> {
            Ok(Encoding {
                values: self.values.clone(),
                model_version: None,
            })
        }

        fn encode_enrollment(&mut self, _image: &[u8]) -> Result<Encoding, EncodeError> {
            self.encode_probe(_image)
        }
    }

    fn identity(id: &str, first_coord: f32) -> EnrolledIdentity {
        let mut values = vec![0.0f32; 128];
        values[0] = first_coord;
        EnrolledIdentity {
            id: id.into(),
            employee_code: id.into(),
            display_name: id.into(),
            org_unit: None,
            encodings: vec![Encoding {
                values,
                model_version: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_probe_round_trip_through_engine() {
        let engine = spawn_engine(Box::new(StubEncoder {
            values: vec![0.0; 128],
        }));
        let gallery = vec![identity("near", 0.1), identity("far", 0.9)];

        let result = engine
            .probe(Vec::new(), gallery, RecognitionParams::default())
            .await
            .unwrap();
        assert!(result.matched);
        assert_eq!(result.identity_id.as_deref(), Some("near"));
    }

    #[tokio::test]
    async fn test_probe_outside_tolerance_is_unmatched() {
        let engine = spawn_engine(Box::new(StubEncoder {
            values: vec![0.0; 128],
        }));
        let gallery = vec![identity("far", 0.9)];

        let result = engine
            .probe(Vec::new(), gallery, RecognitionParams::default())
            .await
            .unwrap();
        assert!(!result.matched);
    }
}
