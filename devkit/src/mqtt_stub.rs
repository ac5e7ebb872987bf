/*!
Transport MQTT simulé pour tester l'agent sans broker

Enregistre toutes les publications et tous les abonnements, et permet de
basculer l'état de connexion à la main. Les clones partagent le même état:
l'agent possède une copie, le test garde l'autre pour ses assertions.
*/

use anyhow::Result;
use mesurable_agent::{Transport, TransportError};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl MockMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_calls: usize,
    published: Vec<MockMessage>,
    subscriptions: Vec<String>,
}

/// Transport qui remplace `MqttTransport` dans les tests
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bascule l'état du lien. L'agent doit ensuite recevoir le `LinkEvent`
    /// correspondant, comme avec le vrai transport.
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
        log::info!("[MOCK] Link {}", if connected { "up" } else { "down" });
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().unwrap().connect_calls
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Récupère les abonnements, dans l'ordre et avec répétitions
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    pub fn last_message(&self, topic: &str) -> Option<MockMessage> {
        self.find_messages_by_topic(topic).pop()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.last_message(topic) {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Reset publications et abonnements (l'état de connexion est conservé)
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.published.clear();
        state.subscriptions.clear();
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.state.lock().unwrap().connect_calls += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.push(topic.to_string());
        log::info!("[MOCK] Subscribed to {}", topic);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.published.push(MockMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        });
        log::info!("[MOCK] Published to {}: {} bytes", topic, payload.len());
        Ok(())
    }
}

/// Helper pour créer les commandes reçues sur `sensors/config` et `sensors/enable`
pub struct CommandBuilder;

impl CommandBuilder {
    /// `{"sensors": {"<unit>": {"interval": <secs>}}}`
    pub fn config_update(intervals: &[(&str, f64)]) -> Value {
        let sensors: Map<String, Value> = intervals
            .iter()
            .map(|(unit, secs)| (unit.to_string(), json!({ "interval": secs })))
            .collect();
        json!({ "sensors": sensors })
    }

    /// `{"hardware": "<unit>", "enabled": <bool>}`
    pub fn enable(unit: &str, enabled: bool) -> Value {
        json!({ "hardware": unit, "enabled": enabled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transport_records() {
        let mut transport = MockTransport::new();
        let observer = transport.clone();

        assert!(matches!(
            transport.publish("a/b", b"1", true),
            Err(TransportError::NotConnected)
        ));

        observer.set_connected(true);
        transport.subscribe("dev/sensors/config").unwrap();
        transport.publish("dev/sensors/status", b"{}", true).unwrap();

        assert_eq!(observer.get_subscriptions(), vec!["dev/sensors/config"]);
        let messages = observer.find_messages_by_topic("dev/sensors/status");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].retain);
        assert_eq!(messages[0].payload_str(), "{}");
    }

    #[test]
    fn test_json_message_parsing() {
        let mut transport = MockTransport::new();
        transport.set_connected(true);
        transport
            .publish("json/topic", br#"{"test_field":"test_value","number":42}"#, false)
            .unwrap();

        let parsed: Option<Value> = transport.get_last_json_message("json/topic").unwrap();
        assert_eq!(parsed.unwrap()["test_field"], "test_value");
        assert!(transport.get_last_json_message::<Value>("other").unwrap().is_none());
    }

    #[test]
    fn test_command_builders() {
        let config = CommandBuilder::config_update(&[("dht22", 30.0)]);
        assert_eq!(config["sensors"]["dht22"]["interval"], 30.0);

        let enable = CommandBuilder::enable("dht22", false);
        assert_eq!(enable["hardware"], "dht22");
        assert_eq!(enable["enabled"], false);
    }
}
