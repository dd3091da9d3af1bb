//! Per-period stage tracking and progress events.

use crate::period::Period;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Where a period is in the pipeline.
///
/// `Pending → Extracting → Sampling → Training → Predicting → Recording → Done`,
/// with `Failed` reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Extracting,
    Sampling,
    Training,
    Predicting,
    Recording,
    Done,
    Failed,
}

impl Stage {
    /// The stage that follows a successful `self`, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Extracting),
            Stage::Extracting => Some(Stage::Sampling),
            Stage::Sampling => Some(Stage::Training),
            Stage::Training => Some(Stage::Predicting),
            Stage::Predicting => Some(Stage::Recording),
            Stage::Recording => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    /// Overall completion when the stage starts.
    pub fn base_percent(self) -> f64 {
        match self {
            Stage::Pending => 0.0,
            Stage::Extracting => 5.0,
            Stage::Sampling => 20.0,
            Stage::Training => 25.0,
            Stage::Predicting => 40.0,
            Stage::Recording => 95.0,
            Stage::Done | Stage::Failed => 100.0,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Extracting => "extracting",
            Stage::Sampling => "sampling",
            Stage::Training => "training",
            Stage::Predicting => "predicting",
            Stage::Recording => "recording",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub period: Period,
    pub stage: Stage,
    /// 0 to 100
    pub percent: f64,
    pub message: String,
}

/// Fans progress events out to any number of subscribers.
///
/// Each subscriber gets its own unbounded queue, so publishing never blocks
/// the pipeline. Subscribers whose receiver was dropped are pruned.
#[derive(Debug, Clone, Default)]
pub struct ProgressPublisher {
    subscribers: Arc<Mutex<Vec<async_channel::Sender<ProgressEvent>>>>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> async_channel::Receiver<ProgressEvent> {
        let (tx, rx) = async_channel::unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: ProgressEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
        }
    }

    /// Close every subscriber queue. Receivers drain what is left, then end.
    pub fn close(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            for tx in subscribers.drain(..) {
                tx.close();
            }
        }
    }

    /// Subscribe a thread that logs every event until [`close`](Self::close).
    pub fn spawn_log_subscriber(&self) -> JoinHandle<()> {
        let rx = self.subscribe();
        std::thread::spawn(move || {
            while let Ok(event) = rx.recv_blocking() {
                match event.stage {
                    Stage::Failed => tracing::warn!(
                        "[{}] {:>5.1}% {}: {}",
                        event.period,
                        event.percent,
                        event.stage,
                        event.message
                    ),
                    _ => tracing::info!(
                        "[{}] {:>5.1}% {}: {}",
                        event.period,
                        event.percent,
                        event.stage,
                        event.message
                    ),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stage: Stage) -> ProgressEvent {
        ProgressEvent {
            period: Period::new(2024, 1).unwrap(),
            stage,
            percent: stage.base_percent(),
            message: String::new(),
        }
    }

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Pending;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.last(), Some(&Stage::Done));
        assert_eq!(seen.len(), 7);
        assert!(seen.windows(2).all(|w| w[0].base_percent() < w[1].base_percent()));
        assert_eq!(Stage::Done.next(), None);
        assert_eq!(Stage::Failed.next(), None);
    }

    #[test]
    fn test_every_subscriber_receives_events() {
        let publisher = ProgressPublisher::new();
        let a = publisher.subscribe();
        let b = publisher.subscribe();

        publisher.publish(event(Stage::Extracting));
        publisher.publish(event(Stage::Done));
        publisher.close();

        for rx in [a, b] {
            let stages: Vec<Stage> = std::iter::from_fn(|| rx.recv_blocking().ok()).map(|e| e.stage).collect();
            assert_eq!(stages, vec![Stage::Extracting, Stage::Done]);
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let publisher = ProgressPublisher::new();
        let rx = publisher.subscribe();
        drop(rx);
        publisher.publish(event(Stage::Sampling));
        assert!(publisher.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_log_subscriber_stops_on_close() {
        let publisher = ProgressPublisher::new();
        let handle = publisher.spawn_log_subscriber();
        publisher.publish(event(Stage::Training));
        publisher.close();
        handle.join().unwrap();
    }
}
