use std::time::SystemTime;

use log::info;

use crate::id::ExecutorId;

/// Executor lifecycle events published to registered listeners.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    ExecutorAdded {
        time: SystemTime,
        executor_id: ExecutorId,
        host: String,
        total_cores: usize,
    },
    ExecutorRemoved {
        time: SystemTime,
        executor_id: ExecutorId,
        reason: String,
    },
}

pub trait ClusterEventListener: Send + Sync {
    fn on_event(&self, event: &ClusterEvent);
}

/// A bus fanning events out to listeners in registration order.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Box<dyn ClusterEventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Box<dyn ClusterEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn publish(&self, event: ClusterEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }
}

pub struct LoggingEventListener;

impl ClusterEventListener for LoggingEventListener {
    fn on_event(&self, event: &ClusterEvent) {
        match event {
            ClusterEvent::ExecutorAdded {
                executor_id,
                host,
                total_cores,
                ..
            } => {
                info!("executor {executor_id} added on {host} with {total_cores} cores");
            }
            ClusterEvent::ExecutorRemoved {
                executor_id,
                reason,
                ..
            } => {
                info!("executor {executor_id} removed: {reason}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingListener(Arc<AtomicUsize>);

    impl ClusterEventListener for CountingListener {
        fn on_event(&self, _: &ClusterEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_event_bus_fans_out() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::new()
            .with_listener(Box::new(CountingListener(count.clone())))
            .with_listener(Box::new(CountingListener(count.clone())));
        bus.publish(ClusterEvent::ExecutorRemoved {
            time: SystemTime::now(),
            executor_id: ExecutorId::from("e1"),
            reason: "test".to_string(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
