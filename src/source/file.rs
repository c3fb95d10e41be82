//! Looping, paced file source

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{FrameReader, FrameSource, ReaderFactory};
use crate::error::SourceError;
use crate::media::Frame;

/// Frames of a decoded video file
///
/// Timestamps are `sequence / fps` where the sequence keeps counting across
/// loop restarts, so the wrap has neither a gap nor a duplicate.
pub struct FileSource {
    factory: Arc<dyn ReaderFactory>,
    looping: bool,
    pace: bool,
    fps: u64,
    reader: Option<Box<dyn FrameReader>>,
    sequence: u64,
    frames_this_cycle: u64,
    cycles: u64,
    started: Option<Instant>,
    terminal: bool,
}

impl FileSource {
    /// Create a file source; `fps` is the rate the decoder emits frames at
    pub fn new(factory: Arc<dyn ReaderFactory>, looping: bool, pace: bool, fps: u32) -> Self {
        Self {
            factory,
            looping,
            pace,
            fps: u64::from(fps.max(1)),
            reader: None,
            sequence: 0,
            frames_this_cycle: 0,
            cycles: 0,
            started: None,
            terminal: false,
        }
    }

    /// Number of completed passes over the file
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn timestamp(&self, sequence: u64) -> Duration {
        Duration::from_nanos(sequence.saturating_mul(1_000_000_000) / self.fps)
    }

    async fn drop_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close().await;
        }
    }

    async fn restart(&mut self) -> Result<(), SourceError> {
        self.drop_reader().await;
        self.reader = Some(self.factory.open().await?);
        self.cycles += 1;
        self.frames_this_cycle = 0;

        tracing::debug!(
            source = %self.factory.label(),
            cycles = self.cycles,
            "File source looped"
        );
        Ok(())
    }
}

#[async_trait]
impl FrameSource for FileSource {
    fn label(&self) -> String {
        self.factory.label()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        if self.reader.is_none() && !self.terminal {
            self.reader = Some(self.factory.open().await?);
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            if self.terminal {
                return Ok(None);
            }

            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| SourceError::read(self.factory.label(), "source is not open"))?;

            match reader.read_frame().await {
                Ok(Some(image)) => {
                    let timestamp = self.timestamp(self.sequence);
                    let frame = image.into_frame(self.sequence, timestamp)?;
                    self.sequence += 1;
                    self.frames_this_cycle += 1;

                    if self.pace {
                        let started = *self.started.get_or_insert_with(Instant::now);
                        tokio::time::sleep_until(started + timestamp).await;
                    }

                    return Ok(Some(frame));
                }
                Ok(None) if self.looping && self.frames_this_cycle > 0 => {
                    if let Err(e) = self.restart().await {
                        self.terminal = true;
                        return Err(e);
                    }
                }
                Ok(None) => {
                    if self.looping {
                        tracing::warn!(
                            source = %self.factory.label(),
                            "File produced no frames, not looping again"
                        );
                    }
                    self.terminal = true;
                    self.drop_reader().await;
                    return Ok(None);
                }
                Err(e) => {
                    self.terminal = true;
                    self.drop_reader().await;
                    return Err(e);
                }
            }
        }
    }

    async fn close(&mut self) {
        self.drop_reader().await;
        self.terminal = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::source::testing::{ScriptedFactory, Step};

    fn three_frames() -> Vec<Step> {
        vec![Step::Image(1), Step::Image(2), Step::Image(3), Step::End]
    }

    #[tokio::test]
    async fn test_no_loop_ends() {
        let factory = Arc::new(ScriptedFactory::repeating(three_frames(), 1));
        let mut source = FileSource::new(factory, false, false, 10);
        source.open().await.unwrap();

        for expected in 0..3u64 {
            let frame = source.next_frame().await.unwrap().unwrap();
            assert_eq!(frame.sequence, expected);
            assert_eq!(frame.timestamp, Duration::from_millis(100 * expected));
        }
        assert!(source.next_frame().await.unwrap().is_none());
        // Terminal: stays ended
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loop_is_seamless() {
        let factory = Arc::new(ScriptedFactory::repeating(three_frames(), 4));
        let opens = Arc::clone(&factory.opens);
        let mut source = FileSource::new(factory, true, false, 10);
        source.open().await.unwrap();

        let mut fills = Vec::new();
        let mut timestamps = Vec::new();
        for _ in 0..9 {
            let frame = source.next_frame().await.unwrap().unwrap();
            fills.push(frame.data[0]);
            timestamps.push(frame.timestamp);
        }

        assert_eq!(fills, vec![1, 2, 3, 1, 2, 3, 1, 2, 3]);
        for pair in timestamps.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
        }
        assert_eq!(source.cycles(), 2);
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_file_on_reopen_is_terminal() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            Some(vec![Step::Image(1), Step::End]),
            Some(vec![Step::End]),
            Some(vec![Step::Image(9)]),
        ]));
        let mut source = FileSource::new(factory, true, false, 30);
        source.open().await.unwrap();

        assert!(source.next_frame().await.unwrap().is_some());
        assert!(source.next_frame().await.unwrap().is_none());
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_error_is_terminal() {
        let factory = Arc::new(ScriptedFactory::repeating(
            vec![Step::Image(1), Step::Fail, Step::Image(2)],
            1,
        ));
        let closes = Arc::clone(&factory.closes);
        let mut source = FileSource::new(factory, true, false, 30);
        source.open().await.unwrap();

        assert!(source.next_frame().await.unwrap().is_some());
        assert!(matches!(
            source.next_frame().await,
            Err(SourceError::Read { .. })
        ));
        assert!(source.next_frame().await.unwrap().is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paced_at_native_rate() {
        let factory = Arc::new(ScriptedFactory::repeating(
            vec![Step::Image(0); 5],
            1,
        ));
        let mut source = FileSource::new(factory, false, true, 100);
        source.open().await.unwrap();

        let start = std::time::Instant::now();
        for _ in 0..5 {
            source.next_frame().await.unwrap().unwrap();
        }

        // Frame 4 is due 40ms after frame 0
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_open_failure() {
        let factory = Arc::new(ScriptedFactory::new(vec![None]));
        let mut source = FileSource::new(factory, true, true, 30);

        assert!(matches!(source.open().await, Err(SourceError::Open { .. })));
    }
}
