//! Bounded annotation work queue
//!
//! Annotation is synchronous and CPU or accelerator bound. Running it inline
//! would stall the async runtime when many sessions are live, so jobs are
//! pushed onto a bounded queue drained by a fixed pool of OS threads. With a
//! single worker every session's annotation is serialised, which is what a
//! single accelerator needs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::Annotate;
use crate::error::AnnotateError;
use crate::media::Frame;

struct Job {
    frame: Frame,
    reply: oneshot::Sender<Result<Frame, AnnotateError>>,
}

/// Handle to the annotation worker pool
///
/// Cloning shares the pool. Workers exit once every handle is dropped.
#[derive(Clone)]
pub struct AnnotationQueue {
    tx: mpsc::Sender<Job>,
    annotator: Arc<dyn Annotate>,
}

impl AnnotationQueue {
    /// Start `workers` threads fed by a queue of `depth` pending jobs
    pub fn start(annotator: Arc<dyn Annotate>, workers: usize, depth: usize) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>(depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for index in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let annotator = Arc::clone(&annotator);
            thread::Builder::new()
                .name(format!("annotate-{}", index))
                .spawn(move || worker(index, rx, annotator))?;
        }

        tracing::info!(
            annotator = annotator.name(),
            workers = workers.max(1),
            depth = depth.max(1),
            "Annotation workers started"
        );

        Ok(Self { tx, annotator })
    }

    /// Name of the annotator behind the queue
    pub fn annotator_name(&self) -> &str {
        self.annotator.name()
    }

    /// Annotate one frame, waiting for a queue slot if the pool is busy
    pub async fn annotate(&self, frame: Frame) -> Result<Frame, AnnotateError> {
        let (reply, result) = oneshot::channel();
        self.tx
            .send(Job { frame, reply })
            .await
            .map_err(|_| AnnotateError::QueueClosed)?;
        result.await.map_err(|_| AnnotateError::QueueClosed)?
    }
}

fn worker(index: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, annotator: Arc<dyn Annotate>) {
    loop {
        // Only the idle worker waiting for the next job holds the lock
        let job = rx.lock().blocking_recv();
        let Some(job) = job else { break };

        let (width, height) = (job.frame.width, job.frame.height);
        // A panicking model fails this frame only; the worker keeps serving
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| annotator.annotate(&job.frame)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(worker = index, annotator = annotator.name(), reason = %reason, "Annotator panicked");
                Err(AnnotateError::Failed {
                    annotator: annotator.name().to_string(),
                    reason: format!("panicked: {}", reason),
                })
            }
        };
        let result = result.and_then(|out| {
            if out.width != width || out.height != height {
                Err(AnnotateError::GeometryMismatch {
                    width,
                    height,
                    got_width: out.width,
                    got_height: out.height,
                })
            } else {
                Ok(out)
            }
        });

        // The session may have gone away while we worked
        let _ = job.reply.send(result);
    }

    tracing::debug!(worker = index, "Annotation worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::annotate::Passthrough;
    use crate::media::PixelFormat;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            Bytes::from(vec![0u8; 12]),
            2,
            2,
            PixelFormat::Rgb24,
            sequence,
            Duration::from_millis(sequence),
        )
        .unwrap()
    }

    /// Tracks how many annotations run at the same time
    struct Concurrency {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Annotate for Concurrency {
        fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotateError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(frame.clone())
        }

        fn name(&self) -> &str {
            "concurrency"
        }
    }

    struct Shrink;

    impl Annotate for Shrink {
        fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotateError> {
            Frame::new(
                Bytes::from(vec![0u8; 3]),
                1,
                1,
                frame.format,
                frame.sequence,
                frame.timestamp,
            )
            .map_err(|e| AnnotateError::Failed {
                annotator: "shrink".to_string(),
                reason: e.to_string(),
            })
        }

        fn name(&self) -> &str {
            "shrink"
        }
    }

    /// Panics on the first frame it sees, then behaves
    struct PanicOnce {
        calls: AtomicUsize,
    }

    impl Annotate for PanicOnce {
        fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotateError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("model crashed");
            }
            Ok(frame.clone())
        }

        fn name(&self) -> &str {
            "panic-once"
        }
    }

    #[tokio::test]
    async fn test_panic_fails_only_that_frame() {
        let annotator = Arc::new(PanicOnce {
            calls: AtomicUsize::new(0),
        });
        let queue = AnnotationQueue::start(annotator, 1, 2).unwrap();

        let first = queue.annotate(frame(0)).await;
        assert!(matches!(
            first,
            Err(AnnotateError::Failed { ref annotator, ref reason })
                if annotator == "panic-once" && reason.contains("model crashed")
        ));

        // Another session sharing the single worker is unaffected
        let other = queue.clone();
        let second = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::spawn(async move { other.annotate(frame(1)).await }),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(second.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_passthrough_round_trip() {
        let queue = AnnotationQueue::start(Arc::new(Passthrough), 2, 4).unwrap();
        let out = queue.annotate(frame(7)).await.unwrap();

        assert_eq!(out.sequence, 7);
        assert_eq!(queue.annotator_name(), "passthrough");
    }

    #[tokio::test]
    async fn test_single_worker_serialises() {
        let annotator = Arc::new(Concurrency {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = AnnotationQueue::start(annotator.clone(), 1, 8).unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.annotate(frame(i)).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(annotator.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_geometry_mismatch_rejected() {
        let queue = AnnotationQueue::start(Arc::new(Shrink), 1, 1).unwrap();
        let result = queue.annotate(frame(0)).await;

        assert!(matches!(
            result,
            Err(AnnotateError::GeometryMismatch {
                width: 2,
                height: 2,
                got_width: 1,
                got_height: 1
            })
        ));
    }
}
