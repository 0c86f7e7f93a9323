//! Output discovery results.
//!
//! Outputs are advertised as compositor globals; their names and descriptions
//! arrive only after binding, so the first listing is built from two
//! round-trips. Later hot-plug events produce a fresh listing; a listing
//! itself never changes.

use std::sync::Arc;

use screencopy_core::{CaptureError, OutputSummary};
use tracing::{debug, warn};

/// An output as seen after the discovery round-trips.
#[derive(Debug, Clone)]
pub struct AdvertisedOutput<O> {
    /// Registry global name.
    pub global: u32,
    pub handle: O,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A discovered output. Immutable once built.
#[derive(Debug)]
pub struct OutputDescriptor<O> {
    handle: O,
    global: u32,
    name: String,
    description: Option<String>,
}

impl<O> OutputDescriptor<O> {
    pub fn handle(&self) -> &O {
        &self.handle
    }

    pub fn global(&self) -> u32 {
        self.global
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn summary(&self) -> OutputSummary {
        OutputSummary { name: self.name.clone(), description: self.description.clone() }
    }
}

/// Outputs from the most recent discovery, names unique.
#[derive(Debug)]
pub struct OutputRegistry<O> {
    outputs: Vec<Arc<OutputDescriptor<O>>>,
}

impl<O> Default for OutputRegistry<O> {
    fn default() -> Self {
        Self { outputs: Vec::new() }
    }
}

impl<O> OutputRegistry<O> {
    /// Build a listing from advertised outputs.
    ///
    /// Outputs that never sent a name get `wl_output-<global>`; a repeated
    /// name keeps the first output and drops the rest.
    pub fn from_advertised(advertised: impl IntoIterator<Item = AdvertisedOutput<O>>) -> Self {
        let mut outputs: Vec<Arc<OutputDescriptor<O>>> = Vec::new();
        for adv in advertised {
            let name = match adv.name.filter(|n| !n.is_empty()) {
                Some(name) => name,
                None => {
                    let fallback = format!("wl_output-{}", adv.global);
                    debug!("Output global {} sent no name, using {}", adv.global, fallback);
                    fallback
                }
            };
            if outputs.iter().any(|o| o.name == name) {
                warn!("Output global {} repeats name {:?}, ignoring it", adv.global, name);
                continue;
            }
            outputs.push(Arc::new(OutputDescriptor {
                handle: adv.handle,
                global: adv.global,
                name,
                description: adv.description.filter(|d| !d.is_empty()),
            }));
        }
        Self { outputs }
    }

    pub fn find(&self, name: &str) -> Result<Arc<OutputDescriptor<O>>, CaptureError> {
        self.outputs
            .iter()
            .find(|o| o.name == name)
            .cloned()
            .ok_or_else(|| CaptureError::OutputNotFound { name: name.to_owned() })
    }

    pub fn summaries(&self) -> Vec<OutputSummary> {
        self.outputs.iter().map(|o| o.summary()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OutputDescriptor<O>>> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
