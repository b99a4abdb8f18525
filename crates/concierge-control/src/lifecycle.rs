//! Consultation lifecycle state machine.
//!
//! ```text
//!                 accept
//!   ┌─────────┐ ─────────▶ ┌─────────┐ ◀─┐
//!   │ Waiting │            │ Active  │   │ transfer
//!   └────┬────┘            └────┬────┘ ──┘
//!        │ close                │ close
//!        ▼                      ▼
//!   ┌──────────────────────────────────┐
//!   │              Closed              │──▶ rate (once)
//!   └──────────────────────────────────┘
//! ```

use concierge_core::ConsultationId;
use concierge_store::{Consultation, ConsultationStatus};

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    consultation_id: ConsultationId,
    from: ConsultationStatus,
    to: ConsultationStatus,
) -> Result<ConsultationStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState(format!(
            "consultation {consultation_id} cannot go from {from} to {to}"
        )))
    }
}

/// Check if a state transition is valid according to the state machine.
///
/// `Active → Active` is a transfer: the assignee changes, the status does not.
#[must_use]
pub const fn is_valid_transition(from: ConsultationStatus, to: ConsultationStatus) -> bool {
    use ConsultationStatus::{Active, Closed, Waiting};

    matches!(
        (from, to),
        (Waiting | Active, Active) | (Waiting | Active, Closed)
    )
}

/// Check that the consultation is still waiting for a staff member.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the consultation is not `waiting`.
pub fn ensure_acceptable(consultation: &Consultation) -> Result<()> {
    if consultation.status == ConsultationStatus::Waiting {
        return Ok(());
    }
    Err(ControlError::InvalidState(format!(
        "consultation {} is {} and can no longer be accepted",
        consultation.id, consultation.status
    )))
}

/// Check that the consultation can be handed to another staff member.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the consultation is not `active`.
pub fn ensure_transferable(consultation: &Consultation) -> Result<()> {
    if consultation.status == ConsultationStatus::Active {
        return Ok(());
    }
    Err(ControlError::InvalidState(format!(
        "consultation {} is {}; only active consultations can be transferred",
        consultation.id, consultation.status
    )))
}

/// Check that a closed consultation can still receive its rating.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the consultation is open or already rated.
pub fn ensure_rateable(consultation: &Consultation) -> Result<()> {
    if consultation.status != ConsultationStatus::Closed {
        return Err(ControlError::InvalidState(format!(
            "consultation {} is {}; only closed consultations can be rated",
            consultation.id, consultation.status
        )));
    }
    if consultation.rating.is_some() {
        return Err(ControlError::InvalidState(format!(
            "consultation {} has already been rated",
            consultation.id
        )));
    }
    Ok(())
}

/// Returns true if the consultation is terminal.
#[must_use]
pub const fn is_terminal(status: ConsultationStatus) -> bool {
    matches!(status, ConsultationStatus::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use concierge_core::{StaffId, UserId};
    use concierge_store::NewConsultation;

    fn consultation(staff: Option<u64>) -> Consultation {
        NewConsultation {
            user_id: UserId::new(1),
            staff_id: staff.map(StaffId::new),
            created_at: Utc::now(),
        }
        .into_consultation(ConsultationId::new(9))
    }

    #[test]
    fn valid_transitions() {
        use ConsultationStatus::*;

        assert!(is_valid_transition(Waiting, Active));
        assert!(is_valid_transition(Active, Active));
        assert!(is_valid_transition(Waiting, Closed));
        assert!(is_valid_transition(Active, Closed));
    }

    #[test]
    fn closed_is_terminal() {
        use ConsultationStatus::*;

        assert!(!is_valid_transition(Closed, Active));
        assert!(!is_valid_transition(Closed, Closed));
        assert!(!is_valid_transition(Active, Waiting));
        assert!(is_terminal(Closed));
        assert!(!is_terminal(Waiting));
    }

    #[test]
    fn validate_transition_reports_both_states() {
        let err = validate_transition(
            ConsultationId::new(4),
            ConsultationStatus::Closed,
            ConsultationStatus::Closed,
        )
        .unwrap_err();
        assert!(err.to_string().contains("from closed to closed"));
    }

    #[test]
    fn accept_only_from_waiting() {
        assert!(ensure_acceptable(&consultation(None)).is_ok());
        assert!(matches!(
            ensure_acceptable(&consultation(Some(2))),
            Err(ControlError::InvalidState(_))
        ));
    }

    #[test]
    fn transfer_only_from_active() {
        assert!(ensure_transferable(&consultation(Some(2))).is_ok());
        assert!(ensure_transferable(&consultation(None)).is_err());
    }

    #[test]
    fn rating_once_after_close() {
        let mut c = consultation(Some(2));
        assert!(ensure_rateable(&c).is_err());

        c.status = ConsultationStatus::Closed;
        assert!(ensure_rateable(&c).is_ok());

        c.rating = Some(4);
        assert!(ensure_rateable(&c).is_err());
    }
}
