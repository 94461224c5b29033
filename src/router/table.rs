//! Static route table: destination → allowed payload tags

use crate::payload::PayloadTag;
use std::fmt;

/// Consumer of routed payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Serial link and priority outbox
    Hardware,
    /// Broker gateway publishing
    Broker,
    /// The orchestrator itself
    Internal,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::Hardware,
        Destination::Broker,
        Destination::Internal,
    ];
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Hardware => write!(f, "hardware"),
            Destination::Broker => write!(f, "broker"),
            Destination::Internal => write!(f, "internal"),
        }
    }
}

/// Mapping from destination to the set of tags it accepts
///
/// Fixed at construction, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<(Destination, Vec<PayloadTag>)>,
}

impl RouteTable {
    pub fn new(routes: Vec<(Destination, Vec<PayloadTag>)>) -> Self {
        Self { routes }
    }

    pub fn allows(&self, destination: Destination, tag: PayloadTag) -> bool {
        self.routes
            .iter()
            .any(|(d, tags)| *d == destination && tags.contains(&tag))
    }

    /// Destinations accepting the tag, in table order
    pub fn destinations_for(&self, tag: PayloadTag) -> Vec<Destination> {
        self.routes
            .iter()
            .filter(|(_, tags)| tags.contains(&tag))
            .map(|(d, _)| *d)
            .collect()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            (
                Destination::Hardware,
                vec![PayloadTag::ConfigUpdate, PayloadTag::CommandData],
            ),
            (
                Destination::Broker,
                vec![
                    PayloadTag::Telemetry,
                    PayloadTag::ConfigEcho,
                    PayloadTag::StatusUpdate,
                    PayloadTag::LogEntry,
                ],
            ),
            (Destination::Internal, vec![PayloadTag::StatusUpdate]),
        ])
    }
}
