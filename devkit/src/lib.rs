/*!
# Mesurable DevKit - Doublures et utilitaires de test

Bibliothèque facilitant le test de l'agent de télémétrie sans broker:
- Transport MQTT simulé (publications et abonnements enregistrés)
- Horloge manuelle pour piloter les timers de publication
- Constructeurs de commandes `sensors/config` et `sensors/enable`
- Harness de test complet autour de `TelemetryAgent`
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{CommandBuilder, MockMessage, MockTransport};
pub use test_utils::{HostEvent, ManualClock, TestHarness, TestStats};
