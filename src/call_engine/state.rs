//! Negotiation state machine
//!
//! `next_action` is the whole transition table. It only decides; the
//! orchestrator performs the side effects and commits the new state once
//! they succeeded.

use crate::signaling::SignalingMessage;
use std::fmt;

/// Negotiation progress of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// No description exchanged yet
    Idle,
    /// Local offer set and sent, waiting for the answer
    OfferSent,
    /// Remote offer applied and local answer sent
    Answered,
    /// Our offer was answered
    Connected,
    /// Torn down; terminal
    Closed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::OfferSent => "offer-sent",
            Self::Answered => "answered",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Inbound signal, stripped of its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    PeerJoined,
    PeerLeft,
    OfferReceived,
    AnswerReceived,
    CandidateReceived,
}

impl From<&SignalingMessage> for NegotiationEvent {
    fn from(message: &SignalingMessage) -> Self {
        match message {
            SignalingMessage::PeerJoin => Self::PeerJoined,
            SignalingMessage::PeerLeave => Self::PeerLeft,
            SignalingMessage::Offer { .. } => Self::OfferReceived,
            SignalingMessage::Answer { .. } => Self::AnswerReceived,
            SignalingMessage::Ice { .. } => Self::CandidateReceived,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationAction {
    /// Create an offer, set it locally, send `offer`
    SendOffer,
    /// Apply the remote offer, create an answer, set it locally, send `answer`
    SendAnswer,
    /// Apply the remote answer
    ApplyAnswer,
    /// Add the candidate, best effort
    ApplyCandidate,
    /// Tell the application the other side left
    NotifyPeerLeft,
    Ignore,
}

impl NegotiationAction {
    /// State after the action completed successfully
    pub fn next_state(self, current: NegotiationState) -> NegotiationState {
        match self {
            Self::SendOffer => NegotiationState::OfferSent,
            Self::SendAnswer => NegotiationState::Answered,
            Self::ApplyAnswer => NegotiationState::Connected,
            Self::ApplyCandidate | Self::NotifyPeerLeft | Self::Ignore => current,
        }
    }
}

pub fn next_action(state: NegotiationState, event: NegotiationEvent) -> NegotiationAction {
    use NegotiationAction as A;
    use NegotiationEvent as E;
    use NegotiationState as S;

    match (state, event) {
        (S::Closed, _) => A::Ignore,
        (S::Idle, E::PeerJoined) => A::SendOffer,
        (S::Idle | S::OfferSent, E::OfferReceived) => A::SendAnswer,
        (S::OfferSent, E::AnswerReceived) => A::ApplyAnswer,
        (_, E::CandidateReceived) => A::ApplyCandidate,
        (_, E::PeerLeft) => A::NotifyPeerLeft,
        _ => A::Ignore,
    }
}
