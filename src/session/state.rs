//! Transition table for the recording session
//!
//! `transition` is pure: given the current state and an event it returns the
//! next state plus the effects the runner must perform, or rejects the event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a recording session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Empty,
    Recording,
    Paused,
    Playing,
    Cancelled,
    Saved,
    /// Sticky until the host cancels or saves
    Error(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Cancelled | SessionState::Saved)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Empty => f.write_str("empty"),
            SessionState::Recording => f.write_str("recording"),
            SessionState::Paused => f.write_str("paused"),
            SessionState::Playing => f.write_str("playing"),
            SessionState::Cancelled => f.write_str("cancelled"),
            SessionState::Saved => f.write_str("saved"),
            SessionState::Error(message) => write!(f, "error({})", message),
        }
    }
}

/// Inputs to the transition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Record button: start, pause or resume capture
    Record,
    /// Play button: start, pause or resume playback
    TogglePlayback,
    Cancel,
    Save,
    /// A device, decode or export failure
    Fault(String),
    /// Playback reached the end of the artifact
    PlaybackEnded,
}

impl Event {
    /// Whether the event originates from the host rather than a device
    pub fn is_intent(&self) -> bool {
        matches!(
            self,
            Event::Record | Event::TogglePlayback | Event::Cancel | Event::Save
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Record => f.write_str("record"),
            Event::TogglePlayback => f.write_str("toggle-playback"),
            Event::Cancel => f.write_str("cancel"),
            Event::Save => f.write_str("save"),
            Event::Fault(message) => write!(f, "fault({})", message),
            Event::PlaybackEnded => f.write_str("playback-ended"),
        }
    }
}

/// Side effects the runner performs after a transition, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Reset the recording counter and capture the first take into the output artifact
    StartCapture,
    /// Allocate a new take artifact and capture into it
    ResumeCapture,
    /// Stop capture and commit the take (preview it, or merge it into the output)
    PauseCapture,
    /// Resume a paused player, or load the output artifact and play from zero
    StartPlayback,
    /// Pause the player, keeping its position
    PausePlayback,
    /// Playback ran out; unload so the next play starts from zero
    FinishPlayback,
    /// Stop every timer and device
    StopAll,
    /// Delete every artifact and report cancellation
    DiscardArtifacts,
    /// Hand the output artifact to the host once no merge is outstanding
    DeliverArtifact,
}

/// Outcome of a permitted transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: SessionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn stay(state: &SessionState) -> Self {
        Self {
            next: state.clone(),
            effects: Vec::new(),
        }
    }
}

/// An event the current state does not accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: Event,
}

/// Look up `(state, event)` in the transition table
///
/// Device notifications that no longer apply (an end-of-playback after a
/// pause, a fault after the session ended) are absorbed without effects.
/// Host intents outside the table are rejected.
pub fn transition(state: &SessionState, event: Event) -> Result<Transition, InvalidTransition> {
    use Effect::*;
    use SessionState::*;

    let transition = match (state, &event) {
        (Empty, Event::Record) => Transition::to(Recording, vec![StartCapture]),
        (Recording, Event::Record) => Transition::to(Paused, vec![PauseCapture]),
        (Paused, Event::Record) => Transition::to(Recording, vec![ResumeCapture]),

        (Paused, Event::TogglePlayback) => Transition::to(Playing, vec![StartPlayback]),
        (Playing, Event::TogglePlayback) => Transition::to(Paused, vec![PausePlayback]),
        (Playing, Event::PlaybackEnded) => Transition::to(Paused, vec![FinishPlayback]),

        (s, Event::Cancel) if !s.is_terminal() => {
            Transition::to(Cancelled, vec![StopAll, DiscardArtifacts])
        }
        // The take in progress is committed before the output is handed over
        (Recording, Event::Save) => {
            Transition::to(Saved, vec![PauseCapture, StopAll, DeliverArtifact])
        }
        (s, Event::Save) if !s.is_terminal() => {
            Transition::to(Saved, vec![StopAll, DeliverArtifact])
        }

        (s, Event::Fault(message)) if !s.is_terminal() => {
            Transition::to(Error(message.clone()), vec![StopAll])
        }

        (_, Event::Fault(_)) | (_, Event::PlaybackEnded) => Transition::stay(state),

        _ => {
            return Err(InvalidTransition {
                from: state.clone(),
                event: event.clone(),
            })
        }
    };

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error() -> SessionState {
        SessionState::Error("boom".to_string())
    }

    fn all_states() -> Vec<SessionState> {
        vec![
            SessionState::Empty,
            SessionState::Recording,
            SessionState::Paused,
            SessionState::Playing,
            SessionState::Cancelled,
            SessionState::Saved,
            error(),
        ]
    }

    #[test]
    fn record_cycles_between_recording_and_paused() {
        let t = transition(&SessionState::Empty, Event::Record).unwrap();
        assert_eq!(t.next, SessionState::Recording);
        assert_eq!(t.effects, vec![Effect::StartCapture]);

        let t = transition(&SessionState::Recording, Event::Record).unwrap();
        assert_eq!(t.next, SessionState::Paused);
        assert_eq!(t.effects, vec![Effect::PauseCapture]);

        let t = transition(&SessionState::Paused, Event::Record).unwrap();
        assert_eq!(t.next, SessionState::Recording);
        assert_eq!(t.effects, vec![Effect::ResumeCapture]);
    }

    #[test]
    fn playback_toggles_only_from_paused_or_playing() {
        let t = transition(&SessionState::Paused, Event::TogglePlayback).unwrap();
        assert_eq!(t.next, SessionState::Playing);
        assert_eq!(t.effects, vec![Effect::StartPlayback]);

        let t = transition(&SessionState::Playing, Event::TogglePlayback).unwrap();
        assert_eq!(t.next, SessionState::Paused);
        assert_eq!(t.effects, vec![Effect::PausePlayback]);

        for from in [SessionState::Empty, SessionState::Recording, error()] {
            let err = transition(&from, Event::TogglePlayback).unwrap_err();
            assert_eq!(err.from, from);
            assert_eq!(err.event, Event::TogglePlayback);
        }
    }

    #[test]
    fn recording_and_playing_are_never_adjacent() {
        assert!(transition(&SessionState::Recording, Event::TogglePlayback).is_err());
        assert!(transition(&SessionState::Playing, Event::Record).is_err());
    }

    #[test]
    fn cancel_and_save_end_every_live_state() {
        for from in all_states().into_iter().filter(|s| !s.is_terminal()) {
            let t = transition(&from, Event::Cancel).unwrap();
            assert_eq!(t.next, SessionState::Cancelled);
            assert_eq!(t.effects, vec![Effect::StopAll, Effect::DiscardArtifacts]);

            let t = transition(&from, Event::Save).unwrap();
            assert_eq!(t.next, SessionState::Saved);
            assert!(t.effects.ends_with(&[Effect::StopAll, Effect::DeliverArtifact]));
        }
    }

    #[test]
    fn saving_while_recording_commits_the_take_first() {
        let t = transition(&SessionState::Recording, Event::Save).unwrap();
        assert_eq!(t.effects.first(), Some(&Effect::PauseCapture));
    }

    #[test]
    fn terminal_states_reject_every_intent() {
        for from in [SessionState::Cancelled, SessionState::Saved] {
            for event in [Event::Record, Event::TogglePlayback, Event::Cancel, Event::Save] {
                assert!(transition(&from, event).is_err(), "{} accepted an intent", from);
            }
        }
    }

    #[test]
    fn error_is_sticky_until_cancel_or_save() {
        assert!(transition(&error(), Event::Record).is_err());
        assert_eq!(
            transition(&error(), Event::Cancel).unwrap().next,
            SessionState::Cancelled
        );
    }

    #[test]
    fn faults_move_live_states_to_error() {
        for from in all_states().into_iter().filter(|s| !s.is_terminal()) {
            let t = transition(&from, Event::Fault("encode failed".into())).unwrap();
            assert_eq!(t.next, SessionState::Error("encode failed".into()));
            assert_eq!(t.effects, vec![Effect::StopAll]);
        }
    }

    #[test]
    fn late_device_notifications_are_absorbed() {
        for from in [SessionState::Cancelled, SessionState::Saved] {
            let t = transition(&from, Event::Fault("late".into())).unwrap();
            assert_eq!(t.next, from);
            assert!(t.effects.is_empty());
        }

        let t = transition(&SessionState::Paused, Event::PlaybackEnded).unwrap();
        assert_eq!(t.next, SessionState::Paused);
        assert!(t.effects.is_empty());

        let t = transition(&SessionState::Playing, Event::PlaybackEnded).unwrap();
        assert_eq!(t.next, SessionState::Paused);
        assert_eq!(t.effects, vec![Effect::FinishPlayback]);
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&SessionState::Error("disk full".into())).unwrap();
        assert_eq!(json, r#"{"state":"error","message":"disk full"}"#);
        let json = serde_json::to_string(&SessionState::Paused).unwrap();
        assert_eq!(json, r#"{"state":"paused"}"#);
    }
}
