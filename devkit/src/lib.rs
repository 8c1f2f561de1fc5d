/*!
# Vigie DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant les tests du kernel Vigie avec:
- Stub transport scriptable (sorties, échecs typés, délais, parallélisme)
- Stub ledger en mémoire avec détection d'écritures concurrentes
- Sink d'alertes collecteur pour assertions
- Builders d'enregistrements d'hôtes
*/

pub mod stub_ledger;
pub mod stub_transport;
pub mod test_utils;

pub use stub_ledger::StubLedger;
pub use stub_transport::StubConnector;
pub use test_utils::{host, winrm_host, CollectingSink};
