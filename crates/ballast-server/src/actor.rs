use std::collections::VecDeque;
use std::time::Duration;

use log::error;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};

const ACTOR_CHANNEL_SIZE: usize = 8;

#[tonic::async_trait]
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options: Send + 'static;

    fn name() -> &'static str;
    fn new(options: Self::Options) -> Self;
    async fn start(&mut self, ctx: &mut ActorContext<Self>);
    /// Process one message and return the next action.
    /// All messages are processed sequentially in a single task, so this
    /// method must not block; long-running or async work belongs in tasks
    /// spawned via [`ActorContext::spawn`].
    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction;
    async fn stop(self, ctx: &mut ActorContext<Self>);
}

pub enum ActorAction {
    Continue,
    Stop,
}

/// The error returned when sending a message to an actor that has stopped.
#[derive(Debug)]
pub struct ActorSendError;

impl std::fmt::Display for ActorSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to send message to stopped actor")
    }
}

impl std::error::Error for ActorSendError {}

impl<T> From<mpsc::error::SendError<T>> for ActorSendError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self
    }
}

pub struct ActorContext<T: Actor> {
    handle: ActorHandle<T>,
    /// Messages the actor has sent to itself while processing a message.
    /// They are delivered before anything else in the mailbox, in order.
    queue: VecDeque<T::Message>,
    /// A set of tasks spawned by the actor when processing messages.
    /// All these tasks will be aborted when the context is dropped.
    tasks: JoinSet<()>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: &ActorHandle<T>) -> Self {
        Self {
            handle: handle.clone(),
            queue: VecDeque::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    /// Send a message to the actor itself. The message is processed ahead of
    /// messages from other senders, after the current handler returns.
    pub fn send(&mut self, message: T::Message) {
        self.queue.push_back(message);
    }

    /// Deliver a message to the actor itself after the given delay.
    pub fn send_with_delay(&mut self, message: T::Message, delay: Duration) -> AbortHandle {
        let handle = self.handle.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            // The send fails only when the actor has stopped.
            let _ = handle.send(message).await;
        })
    }

    /// Spawn a task and save the handle in the context.
    pub fn spawn(
        &mut self,
        task: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> AbortHandle {
        self.tasks.spawn(task)
    }

    fn next_queued(&mut self) -> Option<T::Message> {
        self.queue.pop_front()
    }

    /// Join tasks that have completed and log panics. When the actor expects
    /// to handle task failures, the logic belongs inside the task itself
    /// (e.g. sending the actor a message on error).
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!("failed to join task spawned by {}: {e}", T::name());
            }
        }
    }
}

pub struct ActorHandle<T: Actor> {
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T: Actor> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub fn new(options: T::Options) -> Self {
        let (tx, rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let handle = Self {
            sender: tx,
            stopped: stopped_rx,
        };
        let runner = ActorRunner {
            actor: T::new(options),
            ctx: ActorContext::new(&handle),
            receiver: rx,
            stopped: stopped_tx,
        };
        // The handle to the actor event loop task is not saved, so the actor
        // runs detached and its event loop stops by itself when the stop
        // action is taken or all handles are dropped.
        tokio::spawn(runner.run());
        handle
    }

    pub async fn send(&self, message: T::Message) -> Result<(), ActorSendError> {
        self.sender.send(message).await.map_err(ActorSendError::from)
    }

    pub async fn wait_for_stop(mut self) {
        // The receiver error is ignored since the sender must have been
        // dropped in this case, which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }

    fn stopped(&self) -> watch::Receiver<bool> {
        self.stopped.clone()
    }
}

struct ActorRunner<T: Actor> {
    actor: T,
    ctx: ActorContext<T>,
    receiver: mpsc::Receiver<T::Message>,
    stopped: watch::Sender<bool>,
}

impl<T: Actor> ActorRunner<T> {
    async fn run(mut self) {
        self.actor.start(&mut self.ctx).await;
        loop {
            let message = if let Some(message) = self.ctx.next_queued() {
                message
            } else {
                self.ctx.reap();
                match self.receiver.recv().await {
                    Some(message) => message,
                    None => break,
                }
            };
            match self.actor.receive(&mut self.ctx, message) {
                ActorAction::Continue => {}
                ActorAction::Stop => break,
            }
        }
        self.receiver.close();
        self.actor.stop(&mut self.ctx).await;
        let _ = self.stopped.send(true);
    }
}

/// A collection of actors that can be awaited together.
pub struct ActorSystem {
    stopped: Vec<watch::Receiver<bool>>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self { stopped: vec![] }
    }

    pub fn spawn<T: Actor>(&mut self, options: T::Options) -> ActorHandle<T> {
        let handle = ActorHandle::<T>::new(options);
        self.stopped.push(handle.stopped());
        handle
    }

    /// Wait until every actor spawned in this system has stopped.
    pub async fn join(&mut self) {
        for mut stopped in self.stopped.drain(..) {
            let _ = stopped.wait_for(|x| *x).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    struct TestActor {
        greeting: String,
    }

    enum TestMessage {
        Echo {
            value: String,
            reply: oneshot::Sender<String>,
        },
        Relay {
            value: String,
            reply: oneshot::Sender<String>,
        },
        Stop,
    }

    #[tonic::async_trait]
    impl Actor for TestActor {
        type Message = TestMessage;
        type Options = String;

        fn name() -> &'static str {
            "TestActor"
        }

        fn new(options: String) -> Self {
            Self { greeting: options }
        }

        async fn start(&mut self, _: &mut ActorContext<Self>) {}

        fn receive(&mut self, ctx: &mut ActorContext<Self>, message: TestMessage) -> ActorAction {
            match message {
                TestMessage::Echo { value, reply } => {
                    let _ = reply.send(format!("{} {}", self.greeting, value));
                    ActorAction::Continue
                }
                TestMessage::Relay { value, reply } => {
                    // A self-send is delivered before external messages.
                    ctx.send(TestMessage::Echo { value, reply });
                    ActorAction::Continue
                }
                TestMessage::Stop => ActorAction::Stop,
            }
        }

        async fn stop(self, _: &mut ActorContext<Self>) {}
    }

    #[tokio::test]
    async fn test_actor_handle_send() {
        let handle = ActorHandle::<TestActor>::new("hello".to_string());
        let (tx, rx) = oneshot::channel();
        let result = handle
            .send(TestMessage::Echo {
                value: "world".to_string(),
                reply: tx,
            })
            .await;
        assert!(matches!(result, Ok(())));
        assert_eq!(rx.await, Ok("hello world".to_string()));
    }

    #[tokio::test]
    async fn test_actor_self_send() {
        let handle = ActorHandle::<TestActor>::new("hello".to_string());
        let (tx, rx) = oneshot::channel();
        handle
            .send(TestMessage::Relay {
                value: "again".to_string(),
                reply: tx,
            })
            .await
            .unwrap();
        assert_eq!(rx.await, Ok("hello again".to_string()));
    }

    #[tokio::test]
    async fn test_actor_system_join() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<TestActor>("hi".to_string());
        handle.send(TestMessage::Stop).await.unwrap();
        system.join().await;
        let (tx, _rx) = oneshot::channel();
        let result = handle
            .send(TestMessage::Echo {
                value: "late".to_string(),
                reply: tx,
            })
            .await;
        assert!(result.is_err());
    }
}
