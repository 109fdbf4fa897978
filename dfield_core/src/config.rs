//! Peer configuration.

use crate::geometry::Topology;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every peer of one distributed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Global field width
    pub width: u64,

    /// Global field height
    pub height: u64,

    /// Interaction radius; also the band width
    pub aoi: u64,

    /// Peer grid layout
    pub topology: Topology,

    /// Prepended to every topic name
    pub topic_prefix: String,

    /// Publisher id on the bus; listeners drop snapshots from other fields
    pub field_name: String,

    /// Distributed fields publishing on each topic
    pub fields_per_topic: usize,

    /// Log interval while a step is stalled (0 disables the warning)
    pub stall_warning_ms: u64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            aoi: 5,
            topology: Topology::linear(2, false),
            topic_prefix: String::new(),
            field_name: "field".to_string(),
            fields_per_topic: 1,
            stall_warning_ms: 5000,
        }
    }
}

impl FieldConfig {
    pub fn new(width: u64, height: u64, aoi: u64, topology: Topology) -> Self {
        Self {
            width,
            height,
            aoi,
            topology,
            ..Self::default()
        }
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    pub fn with_fields_per_topic(mut self, count: usize) -> Self {
        self.fields_per_topic = count;
        self
    }

    pub fn with_stall_warning_ms(mut self, ms: u64) -> Self {
        self.stall_warning_ms = ms;
        self
    }

    /// Stall warning interval, or `None` when disabled.
    pub fn stall_warning(&self) -> Option<Duration> {
        (self.stall_warning_ms > 0).then(|| Duration::from_millis(self.stall_warning_ms))
    }
}
