use crate::error::{Result, TomoError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    GantryAngle,
    JawFront,
    JawBack,
    IsoX,
    IsoY,
    IsoZ,
    GantryRate,
    JawFrontRate,
    JawBackRate,
    IsoZRate,
    Sync,
    ProjWidth,
    Eop,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::GantryAngle => "gantryAngle",
            EventKind::JawFront => "jawFront",
            EventKind::JawBack => "jawBack",
            EventKind::IsoX => "isoX",
            EventKind::IsoY => "isoY",
            EventKind::IsoZ => "isoZ",
            EventKind::GantryRate => "gantryRate",
            EventKind::JawFrontRate => "jawFrontRate",
            EventKind::JawBackRate => "jawBackRate",
            EventKind::IsoZRate => "isoZRate",
            EventKind::Sync => "sync",
            EventKind::ProjWidth => "projWidth",
            EventKind::Eop => "eop",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload; `Unset` marks a pure marker, distinct from a numeric 0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventValue {
    Unset,
    Value(f64),
}

impl EventValue {
    pub fn get(&self) -> Option<f64> {
        match self {
            EventValue::Unset => None,
            EventValue::Value(v) => Some(*v),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimelineEvent {
    pub tau: f64,
    pub kind: EventKind,
    pub value: EventValue,
}

impl TimelineEvent {
    fn at(tau: f64, kind: EventKind, value: f64) -> Self {
        Self {
            tau,
            kind,
            value: EventValue::Value(value),
        }
    }

    fn marker(tau: f64, kind: EventKind) -> Self {
        Self {
            tau,
            kind,
            value: EventValue::Unset,
        }
    }
}

/// Start-of-delivery settings, all effective at tau 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UnsyncAction {
    GantryPosition { angle: f64 },
    JawPosition { front: f64, back: f64 },
    IsocenterPosition { x: f64, y: f64, z: f64 },
}

/// Rate changes taking effect at their own tau.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncAction {
    GantryVelocity { tau: f64, rate: f64 },
    JawVelocity { tau: f64, front: f64, back: f64 },
    IsocenterVelocity { tau: f64, rate: f64 },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawActions {
    #[serde(default)]
    pub unsynchronized: Vec<UnsyncAction>,
    #[serde(default)]
    pub synchronized: Vec<SyncAction>,
}

/// Tau-ordered delivery events with boundary markers.
#[derive(Clone, Debug, PartialEq)]
pub struct EventTimeline {
    events: Vec<TimelineEvent>,
    total_tau: f64,
}

impl EventTimeline {
    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimelineEvent> + '_ {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn total_tau(&self) -> f64 {
        self.total_tau
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

pub fn build(actions: &RawActions, total_tau: Option<f64>) -> Result<EventTimeline> {
    let total_tau = total_tau.ok_or(TomoError::MissingTotalTau)?;
    if !total_tau.is_finite() || total_tau < 0.0 {
        return Err(TomoError::Validation(format!(
            "total tau must be a non-negative number, got {total_tau}"
        )));
    }

    let mut events = Vec::new();
    for a in &actions.unsynchronized {
        match *a {
            UnsyncAction::GantryPosition { angle } => {
                events.push(TimelineEvent::at(0.0, EventKind::GantryAngle, angle));
            }
            UnsyncAction::JawPosition { front, back } => {
                events.push(TimelineEvent::at(0.0, EventKind::JawFront, front));
                events.push(TimelineEvent::at(0.0, EventKind::JawBack, back));
            }
            UnsyncAction::IsocenterPosition { x, y, z } => {
                events.push(TimelineEvent::at(0.0, EventKind::IsoX, x));
                events.push(TimelineEvent::at(0.0, EventKind::IsoY, y));
                events.push(TimelineEvent::at(0.0, EventKind::IsoZ, z));
            }
        }
    }
    for a in &actions.synchronized {
        match *a {
            SyncAction::GantryVelocity { tau, rate } => {
                events.push(TimelineEvent::at(tau, EventKind::GantryRate, rate));
            }
            SyncAction::JawVelocity { tau, front, back } => {
                events.push(TimelineEvent::at(tau, EventKind::JawFrontRate, front));
                events.push(TimelineEvent::at(tau, EventKind::JawBackRate, back));
            }
            SyncAction::IsocenterVelocity { tau, rate } => {
                events.push(TimelineEvent::at(tau, EventKind::IsoZRate, rate));
            }
        }
    }
    events.push(TimelineEvent::marker(0.0, EventKind::Sync));
    events.push(TimelineEvent::at(0.0, EventKind::ProjWidth, 1.0));
    events.push(TimelineEvent::marker(total_tau, EventKind::Eop));

    // stable: equal taus keep insertion order
    events.sort_by(|a, b| a.tau.total_cmp(&b.tau));

    Ok(EventTimeline { events, total_tau })
}
