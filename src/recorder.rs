//! Recording state machine.
//!
//! Decides per frame whether the frame belongs in the summary. Inputs are the
//! object gate outcome and the frame's video time; wall-clock time never enters
//! the decision, so the output is a pure function of the frame sequence, the
//! frame rate and the configuration.

use crate::timeline::TimelineEvent;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

/// Outcome of feeding one frame to the recorder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameDecision {
    /// The frame belongs in the summary.
    pub retain: bool,
    /// Transition emitted by this frame, if any.
    pub event: Option<TimelineEvent>,
}

#[derive(Clone, Debug)]
pub struct Recorder {
    record_timeout: f64,
    state: RecordingState,
    last_detection_time: Option<f64>,
    last_video_time: Option<f64>,
}

impl Recorder {
    /// `record_timeout` is in seconds of video content.
    pub fn new(record_timeout: f64) -> Self {
        Self {
            record_timeout,
            state: RecordingState::Idle,
            last_detection_time: None,
            last_video_time: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn last_detection_time(&self) -> Option<f64> {
        self.last_detection_time
    }

    /// Feed one frame. Frames must arrive in stream order.
    pub fn observe(&mut self, has_detections: bool, video_time: f64) -> FrameDecision {
        self.last_video_time = Some(video_time);

        if has_detections {
            self.last_detection_time = Some(video_time);
            let event = match self.state {
                RecordingState::Idle => {
                    self.state = RecordingState::Recording;
                    Some(TimelineEvent::started(video_time))
                }
                RecordingState::Recording => None,
            };
            return FrameDecision {
                retain: true,
                event,
            };
        }

        match self.state {
            RecordingState::Idle => FrameDecision {
                retain: false,
                event: None,
            },
            RecordingState::Recording => {
                let timed_out = self
                    .last_detection_time
                    .is_some_and(|last| video_time - last > self.record_timeout);
                if timed_out {
                    self.state = RecordingState::Idle;
                    FrameDecision {
                        retain: false,
                        event: Some(TimelineEvent::stopped(video_time)),
                    }
                } else {
                    FrameDecision {
                        retain: true,
                        event: None,
                    }
                }
            }
        }
    }

    /// Close an open recording at the last processed video time.
    pub fn finish(&mut self) -> Option<TimelineEvent> {
        if self.state != RecordingState::Recording {
            return None;
        }
        self.state = RecordingState::Idle;
        let at = self.last_video_time.or(self.last_detection_time).unwrap_or(0.0);
        Some(TimelineEvent::stopped(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::EventKind;

    #[test]
    fn idle_frames_without_detections_are_dropped() {
        let mut rec = Recorder::new(3.0);
        let d = rec.observe(false, 0.0);
        assert!(!d.retain);
        assert!(d.event.is_none());
        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(rec.finish().is_none());
    }

    #[test]
    fn first_detection_starts_recording() {
        let mut rec = Recorder::new(3.0);
        let d = rec.observe(true, 1.5);
        assert!(d.retain);
        assert_eq!(d.event, Some(TimelineEvent::started(1.5)));
        assert_eq!(rec.state(), RecordingState::Recording);

        let d = rec.observe(true, 1.6);
        assert!(d.retain);
        assert!(d.event.is_none());
    }

    #[test]
    fn timeout_boundary_is_inclusive() {
        let mut rec = Recorder::new(1.0);
        rec.observe(true, 0.0);
        assert!(rec.observe(false, 0.5).retain);
        let at_boundary = rec.observe(false, 1.0);
        assert!(at_boundary.retain);
        assert!(at_boundary.event.is_none());

        let past = rec.observe(false, 1.25);
        assert!(!past.retain);
        assert_eq!(past.event, Some(TimelineEvent::stopped(1.25)));
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[test]
    fn timeout_counts_from_last_detection() {
        let mut rec = Recorder::new(5.0);
        rec.observe(true, 0.0);
        assert!(rec.observe(false, 1.0).retain);
        assert!(rec.observe(true, 2.0).retain);
        // 6.5 would have timed out against t=0, not against t=2.
        let d = rec.observe(false, 6.5);
        assert!(d.retain);
        assert!(d.event.is_none());
        let d = rec.observe(false, 7.25);
        assert_eq!(d.event.map(|e| e.kind), Some(EventKind::Stopped));
    }

    #[test]
    fn open_recording_is_closed_at_last_frame() {
        let mut rec = Recorder::new(10.0);
        rec.observe(true, 2.0);
        rec.observe(false, 3.0);
        rec.observe(false, 4.2);
        assert_eq!(rec.finish(), Some(TimelineEvent::stopped(4.2)));
        assert!(rec.finish().is_none());
    }

    #[test]
    fn restarts_after_stop() {
        let mut rec = Recorder::new(0.5);
        rec.observe(true, 0.0);
        rec.observe(false, 1.0);
        let d = rec.observe(true, 2.0);
        assert_eq!(d.event, Some(TimelineEvent::started(2.0)));
    }
}
