use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ExtractionError;

/// Converts raw image bytes into a single face embedding.
///
/// Implementations fail with [`ExtractionError::NoFaceDetected`] when the image
/// holds no face and [`ExtractionError::AmbiguousFace`] when it holds several.
pub trait Embedder: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Vec<f64>, ExtractionError>;
}

impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn extract(&self, image: &[u8]) -> Result<Vec<f64>, ExtractionError> {
        (**self).extract(image)
    }
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn extract(&self, image: &[u8]) -> Result<Vec<f64>, ExtractionError> {
        (**self).extract(image)
    }
}

/// Runs the wrapped embedder on a worker thread and gives up after `timeout`.
///
/// A timed-out extraction keeps running in the background; its result is
/// discarded.
pub struct TimedEmbedder<E: ?Sized> {
    inner: Arc<E>,
    timeout: Duration,
}

impl<E: Embedder + ?Sized + 'static> TimedEmbedder<E> {
    pub fn new(inner: Arc<E>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<E: Embedder + ?Sized + 'static> Embedder for TimedEmbedder<E> {
    fn extract(&self, image: &[u8]) -> Result<Vec<f64>, ExtractionError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let inner = Arc::clone(&self.inner);
        let image = image.to_vec();
        thread::Builder::new()
            .name("faceprint-embedder".into())
            .spawn(move || {
                let _ = tx.send(inner.extract(&image));
            })
            .map_err(|err| ExtractionError::Model(format!("failed to spawn extractor: {err}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "embedding extraction timed out");
                Err(ExtractionError::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExtractionError::Model(
                "extractor terminated without a result".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacePayloadRecord {
    pub embedding: Vec<f64>,
}

/// Detection output written by an external face extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacePayload {
    pub faces: Vec<FacePayloadRecord>,
}

/// Embedder for pre-extracted feature payloads.
///
/// The "image" is a JSON [`FacePayload`]; the face-count policy is applied
/// here so callers see the same errors as from a live model.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeaturePayloadEmbedder;

impl Embedder for FeaturePayloadEmbedder {
    fn extract(&self, image: &[u8]) -> Result<Vec<f64>, ExtractionError> {
        let payload: FacePayload = serde_json::from_slice(image)
            .map_err(|err| ExtractionError::Model(format!("invalid feature payload: {err}")))?;
        debug!(faces = payload.faces.len(), "decoded feature payload");
        single_face(payload.faces).map(|face| face.embedding)
    }
}

/// Applies the detection policy: exactly one face or an error.
pub fn single_face<T>(mut faces: Vec<T>) -> Result<T, ExtractionError> {
    match faces.len() {
        0 => Err(ExtractionError::NoFaceDetected),
        1 => Ok(faces.remove(0)),
        count => Err(ExtractionError::AmbiguousFace { count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowEmbedder(Duration);

    impl Embedder for SlowEmbedder {
        fn extract(&self, _image: &[u8]) -> Result<Vec<f64>, ExtractionError> {
            thread::sleep(self.0);
            Ok(vec![1.0, 0.0])
        }
    }

    #[derive(Default)]
    struct CountingEmbedder(AtomicUsize);

    impl Embedder for CountingEmbedder {
        fn extract(&self, _image: &[u8]) -> Result<Vec<f64>, ExtractionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ExtractionError::NoFaceDetected)
        }
    }

    #[test]
    fn timed_embedder_reports_timeout() {
        let embedder = TimedEmbedder::new(
            Arc::new(SlowEmbedder(Duration::from_millis(500))),
            Duration::from_millis(20),
        );
        let err = embedder.extract(b"img").unwrap_err();
        assert_eq!(err, ExtractionError::Timeout(Duration::from_millis(20)));
    }

    #[test]
    fn timed_embedder_passes_through_results() {
        let embedder = TimedEmbedder::new(
            Arc::new(SlowEmbedder(Duration::from_millis(1))),
            Duration::from_secs(5),
        );
        assert_eq!(embedder.extract(b"img").unwrap(), vec![1.0, 0.0]);

        let counting = Arc::new(CountingEmbedder::default());
        let embedder = TimedEmbedder::new(Arc::clone(&counting), Duration::from_secs(5));
        assert_eq!(
            embedder.extract(b"img").unwrap_err(),
            ExtractionError::NoFaceDetected
        );
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_embedder_applies_face_count_policy() {
        let embedder = FeaturePayloadEmbedder;
        assert_eq!(
            embedder.extract(br#"{"faces": []}"#).unwrap_err(),
            ExtractionError::NoFaceDetected
        );
        assert_eq!(
            embedder
                .extract(br#"{"faces": [{"embedding": [1.0]}, {"embedding": [2.0]}]}"#)
                .unwrap_err(),
            ExtractionError::AmbiguousFace { count: 2 }
        );
        assert_eq!(
            embedder
                .extract(br#"{"faces": [{"embedding": [0.5, 0.25]}]}"#)
                .unwrap(),
            vec![0.5, 0.25]
        );
        assert!(matches!(
            embedder.extract(b"not json").unwrap_err(),
            ExtractionError::Model(_)
        ));
    }
}
