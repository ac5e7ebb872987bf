/*!
Test Harness pour l'agent de télémétrie

Facilite l'écriture de tests avec:
- Agent câblé sur un transport simulé, un store mémoire et une horloge manuelle
- Enregistrement des notifications envoyées à l'hôte
- Assertions sur les messages publiés
*/

use crate::mqtt_stub::{CommandBuilder, MockTransport};
use anyhow::Result;
use mesurable_agent::{
    Change, Clock, LinkEvent, MemoryStore, PublishKind, PublishSettings, TelemetryAgent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Horloge pilotée par le test
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Notification reçue par l'hôte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ConfigChanged { unit: String, interval_ms: u64 },
    EnableChanged { unit: String, enabled: bool },
    Connection(bool),
}

/// Harness de test complet pour l'agent
pub struct TestHarness {
    pub agent: TelemetryAgent<MockTransport, MemoryStore>,
    pub transport: MockTransport,
    pub clock: ManualClock,
    events: Arc<Mutex<Vec<HostEvent>>>,
}

impl TestHarness {
    /// Crée un harness avec un store vide et les périodes par défaut
    pub fn new(device_id: &str) -> Result<Self> {
        Self::with_store(device_id, MemoryStore::new(), &PublishSettings::default())
    }

    /// Crée un harness avec un store pré-rempli, comme après un redémarrage
    pub fn with_store(device_id: &str, store: MemoryStore, settings: &PublishSettings) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let transport = MockTransport::new();
        let clock = ManualClock::new(0);
        let mut agent = TelemetryAgent::new(
            device_id,
            transport.clone(),
            store,
            Arc::new(clock.clone()),
            settings,
        )?;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        agent.on_config_change(move |unit, interval_ms| {
            sink.lock().unwrap().push(HostEvent::ConfigChanged {
                unit: unit.to_string(),
                interval_ms,
            });
        });
        let sink = events.clone();
        agent.on_enable_change(move |unit, enabled| {
            sink.lock().unwrap().push(HostEvent::EnableChanged {
                unit: unit.to_string(),
                enabled,
            });
        });
        let sink = events.clone();
        agent.on_connection_change(move |connected| {
            sink.lock().unwrap().push(HostEvent::Connection(connected));
        });

        Ok(Self {
            agent,
            transport,
            clock,
            events,
        })
    }

    /// `<deviceId>/<suffix>`
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.agent.device_id(), suffix)
    }

    /// Simule l'établissement du lien avec le broker
    pub fn connect(&mut self) {
        self.transport.set_connected(true);
        self.agent.handle_link_event(LinkEvent::Connected);
    }

    /// Simule une perte du lien
    pub fn disconnect(&mut self) {
        self.transport.set_connected(false);
        self.agent.handle_link_event(LinkEvent::Disconnected);
    }

    /// Simule la réception d'une commande `sensors/config`
    pub fn send_config(&mut self, intervals: &[(&str, f64)]) -> Result<Vec<Change>> {
        let payload = serde_json::to_vec(&CommandBuilder::config_update(intervals))?;
        let topic = self.agent.topics().config.clone();
        log::info!("Sent config command for {} units", intervals.len());
        Ok(self.send_raw(&topic, &payload))
    }

    /// Simule la réception d'une commande `sensors/enable`
    pub fn send_enable(&mut self, unit: &str, enabled: bool) -> Result<Vec<Change>> {
        let payload = serde_json::to_vec(&CommandBuilder::enable(unit, enabled))?;
        let topic = self.agent.topics().enable.clone();
        log::info!("Sent enable command for {}: {}", unit, enabled);
        Ok(self.send_raw(&topic, &payload))
    }

    /// Simule la réception d'un message brut
    pub fn send_raw(&mut self, topic: &str, payload: &[u8]) -> Vec<Change> {
        self.agent.handle_link_event(LinkEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    /// Avance l'horloge puis exécute un tick de la boucle hôte
    pub fn advance_and_tick(&mut self, ms: u64) -> Vec<PublishKind> {
        self.clock.advance(ms);
        self.agent.tick()
    }

    pub fn host_events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn config_events(&self) -> Vec<(String, u64)> {
        self.host_events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::ConfigChanged { unit, interval_ms } => Some((unit, interval_ms)),
                _ => None,
            })
            .collect()
    }

    pub fn enable_events(&self) -> Vec<(String, bool)> {
        self.host_events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::EnableChanged { unit, enabled } => Some((unit, enabled)),
                _ => None,
            })
            .collect()
    }

    /// Assert qu'un message JSON spécifique a été publié
    pub fn assert_message_sent(&self, topic: &str, expected_payload: &Value) -> Result<()> {
        for msg in self.transport.find_messages_by_topic(topic) {
            let payload: Value = serde_json::from_slice(&msg.payload)?;
            if payload == *expected_payload {
                log::info!("Found expected message on {}", topic);
                return Ok(());
            }
        }

        anyhow::bail!("Expected message not found on topic: {}", topic);
    }

    /// Assert qu'un champ a une valeur spécifique dans le dernier message
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        if let Some(msg) = self.transport.get_last_json_message::<Value>(topic)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    return Ok(());
                }
                anyhow::bail!(
                    "Field '{}' mismatch: expected {:?}, got {:?}",
                    field_path,
                    expected,
                    actual
                );
            }
        }

        anyhow::bail!("Field '{}' not found for comparison in {}", field_path, topic);
    }

    /// Stats sur les messages collectés
    pub fn get_stats(&self) -> TestStats {
        let messages = self.transport.get_published_messages();
        let mut topic_counts = HashMap::new();

        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.transport.get_subscriptions(),
        }
    }

    /// Reset messages et notifications pour la phase suivante du test
    pub fn reset(&mut self) {
        self.transport.clear();
        self.events.lock().unwrap().clear();
    }
}

/// Chemin pointé (`dht22:temperature.status`) dans une valeur JSON
fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
}

impl TestStats {
    pub fn count(&self, topic: &str) -> usize {
        self.topic_counts.get(topic).copied().unwrap_or(0)
    }

    pub fn print(&self) {
        println!("Test Statistics:");
        println!("  Total messages: {}", self.total_messages);
        for (topic, count) in &self.topic_counts {
            println!("    {}: {} messages", topic, count);
        }
        println!("  Subscriptions: {:?}", self.subscriptions);
    }
}

/// Macro pour créer facilement des tests d'agent
#[macro_export]
macro_rules! agent_test {
    ($name:ident, $device:expr, |$harness:ident| $body:block) => {
        #[test]
        fn $name() {
            let mut $harness = $crate::test_utils::TestHarness::new($device).unwrap();
            let result = (|| -> anyhow::Result<()> { $body })();

            match result {
                Ok(_) => {
                    $harness.get_stats().print();
                    println!("Test '{}' passed", stringify!($name));
                }
                Err(e) => panic!("Test '{}' failed: {}", stringify!($name), e),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new("bench").unwrap();
        harness.agent.register_unit("dht22", "DHT22").unwrap();
        harness.agent.add_measurement("dht22", "temperature").unwrap();
        harness.connect();

        assert_eq!(harness.host_events(), vec![HostEvent::Connection(true)]);
        assert_eq!(harness.get_stats().subscriptions.len(), 2);

        harness.send_config(&[("dht22", 10.0)]).unwrap();
        assert_eq!(harness.config_events(), vec![("dht22".to_string(), 10_000)]);

        let due = harness.advance_and_tick(5_000);
        assert_eq!(due, vec![PublishKind::Status]);
        let status_topic = harness.topic("sensors/status");
        harness
            .assert_field_equals(&status_topic, "dht22:temperature.status", &Value::from("missing"))
            .unwrap();
    }

    #[test]
    fn test_nested_field() {
        let value = serde_json::json!({"a": {"b": {"c": 1}}});
        assert_eq!(get_nested_field(&value, "a.b.c"), Some(&Value::from(1)));
        assert_eq!(get_nested_field(&value, "a.x"), None);
        assert_eq!(get_nested_field(&value, "a.b.c.d"), None);
    }

    // Test avec la macro
    agent_test!(test_macro_functionality, "bench", |harness| {
        harness.agent.register_unit("hw", "Hardware")?;
        harness.connect();
        harness.send_enable("hw", false)?;
        anyhow::ensure!(harness.enable_events() == vec![("hw".to_string(), false)]);
        Ok(())
    });
}
