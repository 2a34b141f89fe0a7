use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Events published by the pricing engine for the surrounding order and
/// notification flow to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderConfirmed(Uuid),
    OrderUpdated(Uuid),
    DiscountRedeemed {
        discount_id: Uuid,
        order_id: Uuid,
        customer_id: Option<Uuid>,
    },
    /// A submission disagreed with authoritative pricing. Audit signal;
    /// the reason never reaches the client.
    PriceVerificationFailed {
        customer_id: Option<Uuid>,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the receiver is
    /// gone. Event delivery is never load-bearing for pricing decisions.
    pub async fn send_or_log(&self, event: Event) {
        let label = format!("{:?}", event);
        if let Err(e) = self.send(event).await {
            warn!(error = %e, event = %label, "Failed to publish event");
        }
    }
}

/// Creates an event channel pair.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_the_receiver() {
        let (sender, mut rx) = channel(4);
        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCreated(order_id)).await.unwrap();
        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, rx) = channel(1);
        drop(rx);
        // Must not panic or error out.
        sender.send_or_log(Event::OrderUpdated(Uuid::new_v4())).await;
    }
}
