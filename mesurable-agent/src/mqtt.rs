//! rumqttc-backed transport
//!
//! The rumqttc event loop runs on its own tokio task. Everything it observes
//! (ConnAck, inbound publishes, connection errors) is forwarded as a
//! [`LinkEvent`] on an unbounded channel, and the host drains that channel
//! from the same task that owns the agent. The agent itself is never shared
//! across tasks.

use crate::config::MqttSettings;
use crate::transport::{LinkEvent, Transport, TransportError};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Requests rumqttc may queue before `try_*` calls start failing.
const REQUEST_CAPACITY: usize = 32;

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
    reconnect_delay: Duration,
}

impl MqttTransport {
    /// Builds the client. Nothing touches the network until [`Transport::connect`].
    pub fn new(
        settings: &MqttSettings,
        client_id: &str,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let mut mqtt_options =
            MqttOptions::new(client_id, &settings.broker_host, settings.broker_port);
        mqtt_options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        mqtt_options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (events, receiver) = mpsc::unbounded_channel();

        let transport = Self {
            client,
            eventloop: Some(eventloop),
            connected: Arc::new(AtomicBool::new(false)),
            events,
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
        };
        (transport, receiver)
    }

    fn reject(topic: &str, e: rumqttc::ClientError) -> TransportError {
        TransportError::Rejected {
            topic: topic.to_string(),
            reason: e.to_string(),
        }
    }
}

impl Transport for MqttTransport {
    /// Spawns the event loop task. Must be called inside a tokio runtime.
    fn connect(&mut self) -> Result<(), TransportError> {
        let eventloop = self.eventloop.take().ok_or(TransportError::AlreadyStarted)?;
        let connected = self.connected.clone();
        let events = self.events.clone();
        let reconnect_delay = self.reconnect_delay;

        tokio::spawn(drive_event_loop(eventloop, connected, events, reconnect_delay));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| Self::reject(topic, e))
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| Self::reject(topic, e))
    }
}

/// Polls rumqttc until the agent side of the channel goes away. rumqttc
/// reconnects on the next poll after an error.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
    reconnect_delay: Duration,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("Connected to MQTT broker");
                    connected.store(true, Ordering::SeqCst);
                    Some(LinkEvent::Connected)
                } else {
                    warn!("Broker refused connection: {:?}", ack.code);
                    None
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                debug!("Received MQTT message on topic: {}", publish.topic);
                Some(LinkEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                })
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => mark_disconnected(&connected),
            Ok(_) => None,
            Err(e) => {
                error!("MQTT connection error: {}", e);
                let event = mark_disconnected(&connected);
                if let Some(event) = event {
                    if events.send(event).is_err() {
                        break;
                    }
                }
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };

        if let Some(event) = event {
            if events.send(event).is_err() {
                break;
            }
        }
        if events.is_closed() {
            break;
        }
    }
    debug!("MQTT event loop stopped");
}

fn mark_disconnected(connected: &AtomicBool) -> Option<LinkEvent> {
    connected
        .swap(false, Ordering::SeqCst)
        .then_some(LinkEvent::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_disconnected_reports_once() {
        let connected = AtomicBool::new(true);
        assert_eq!(mark_disconnected(&connected), Some(LinkEvent::Disconnected));
        assert_eq!(mark_disconnected(&connected), None);
    }

    #[tokio::test]
    async fn test_requests_refused_before_connect() {
        let (mut transport, _events) = MqttTransport::new(&MqttSettings::default(), "test");
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("a/b", b"1", false),
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.subscribe("a/b"),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_only_once() {
        let settings = MqttSettings {
            broker_port: 1,
            reconnect_delay_secs: 60,
            ..MqttSettings::default()
        };
        let (mut transport, _events) = MqttTransport::new(&settings, "test");
        assert!(transport.connect().is_ok());
        assert!(matches!(transport.connect(), Err(TransportError::AlreadyStarted)));
    }
}
