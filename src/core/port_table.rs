//! Static port → service name table for host-network services.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServiceEntry;

/// Immutable mapping from a transport port to the service that owns it.
///
/// A miss is not an error: it means traffic on that port is not of interest.
#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    ports: HashMap<u16, Arc<str>>,
}

impl ServiceTable {
    /// Build the table from configured entries. Names are shared between all
    /// of a service's ports.
    pub fn from_entries(entries: &[ServiceEntry]) -> Self {
        let mut ports = HashMap::new();
        for entry in entries {
            let name: Arc<str> = Arc::from(entry.name.as_str());
            for &port in &entry.ports {
                ports.entry(port).or_insert_with(|| Arc::clone(&name));
            }
        }
        Self { ports }
    }

    pub fn lookup(&self, port: u16) -> Option<&str> {
        self.ports.get(&port).map(|name| &**name)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl FromIterator<(u16, &'static str)> for ServiceTable {
    fn from_iter<I: IntoIterator<Item = (u16, &'static str)>>(iter: I) -> Self {
        Self {
            ports: iter
                .into_iter()
                .map(|(port, name)| (port, Arc::from(name)))
                .collect(),
        }
    }
}
