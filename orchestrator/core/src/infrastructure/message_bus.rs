// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Message Bus Implementation - Subject-addressed Pub/Sub
//
// In-process transport built on tokio broadcast channels. Subjects are
// dot-separated tokens; subscriptions filter by pattern where `*` matches
// exactly one token and `>` matches one or more trailing tokens.
//
// Connection lifecycle (disconnect / reconnect) is published on a separate
// channel so consumers can resynchronize caches after an outage.

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A raw message as delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusLifecycleEvent {
    Disconnected,
    Reconnected,
}

/// Message bus for publishing and subscribing by subject
#[derive(Clone)]
pub struct MessageBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    lifecycle: Arc<broadcast::Sender<BusLifecycleEvent>>,
}

impl MessageBus {
    /// Create a new bus. Capacity is the per-subscriber backlog kept before
    /// slow receivers start losing messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (lifecycle, _) = broadcast::channel(16);
        Self {
            sender: Arc::new(sender),
            lifecycle: Arc::new(lifecycle),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Publish a message. Returns the number of subscriptions on the bus at
    /// send time, which is zero when nobody is listening.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<usize, BusError> {
        validate_subject(subject)?;
        let message = BusMessage {
            subject: subject.to_string(),
            payload: payload.into(),
        };

        // send() only fails when there are no receivers
        let receiver_count = self.sender.send(message).unwrap_or(0);
        if receiver_count == 0 {
            debug!(subject, "No subscribers listening to subject");
        }
        Ok(receiver_count)
    }

    pub fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let pattern = SubjectPattern::parse(pattern)?;
        Ok(Subscription {
            receiver: self.sender.subscribe(),
            pattern,
        })
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<BusLifecycleEvent> {
        self.lifecycle.subscribe()
    }

    pub fn notify_disconnected(&self) {
        warn!("Message bus disconnected");
        let _ = self.lifecycle.send(BusLifecycleEvent::Disconnected);
    }

    pub fn notify_reconnected(&self) {
        debug!("Message bus reconnected");
        let _ = self.lifecycle.send(BusLifecycleEvent::Reconnected);
    }

    /// Get the number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// A filtered view of the bus
pub struct Subscription {
    receiver: broadcast::Receiver<BusMessage>,
    pattern: SubjectPattern,
}

impl Subscription {
    /// Receive the next message whose subject matches this subscription.
    /// `Lagged` is recoverable: the next call resumes with the oldest retained message.
    pub async fn recv(&mut self) -> Result<BusMessage, BusError> {
        loop {
            let message = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => BusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!(pattern = %self.pattern, "Subscription lagged by {} messages", n);
                    BusError::Lagged(n)
                }
            })?;

            if self.pattern.matches(&message.subject) {
                return Ok(message);
            }
        }
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }
}

/// Pump a subscription until `cancel` fires, running `handler` for every
/// message on its own task so slow handlers never block delivery.
pub fn spawn_dispatch<F, Fut>(
    mut subscription: Subscription,
    cancel: CancellationToken,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = subscription.recv() => match received {
                    Ok(message) => {
                        tokio::spawn(handler(message));
                    }
                    Err(BusError::Lagged(_)) => continue,
                    Err(e) => {
                        debug!(pattern = %subscription.pattern, "Subscription ended: {}", e);
                        break;
                    }
                },
            }
        }
    })
}

/// Parsed subscription pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<PatternToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternToken {
    Literal(String),
    Single,
    Tail,
}

impl SubjectPattern {
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        if pattern.is_empty() {
            return Err(BusError::InvalidSubject(pattern.to_string()));
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let mut tokens = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => return Err(BusError::InvalidSubject(pattern.to_string())),
                "*" => PatternToken::Single,
                ">" if i == parts.len() - 1 => PatternToken::Tail,
                ">" => return Err(BusError::InvalidSubject(pattern.to_string())),
                literal => PatternToken::Literal(literal.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self {
            raw: pattern.to_string(),
            tokens,
        })
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut parts = subject.split('.');
        for token in &self.tokens {
            match token {
                PatternToken::Tail => return parts.next().is_some(),
                PatternToken::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                PatternToken::Literal(expected) => match parts.next() {
                    Some(part) if part == expected => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }
}

impl std::fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn validate_subject(subject: &str) -> Result<(), BusError> {
    let valid = !subject.is_empty()
        && subject
            .split('.')
            .all(|token| !token.is_empty() && token != "*" && token != ">");
    if valid {
        Ok(())
    } else {
        Err(BusError::InvalidSubject(subject.to_string()))
    }
}

/// Errors that can occur on the bus
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Message bus is closed")]
    Closed,

    #[error("Receiver lagged by {0} messages (messages were dropped)")]
    Lagged(u64),

    #[error("Invalid subject: '{0}'")]
    InvalidSubject(String),
}
