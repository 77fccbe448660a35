// libs/appointment-cell/src/services/policy.rs
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{AuthError, AuthenticatedUser, Role};
use shared_utils::jwt::TokenValidator;

/// Which party of an appointment the caller must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerRule {
    Patient,
    Doctor,
    /// Either the patient or the doctor.
    Participant,
    /// Any authenticated caller holding an accepted role.
    Anyone,
}

/// The parties an access check is evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct Owners {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
}

impl Owners {
    pub fn new(patient_id: Uuid, doctor_id: Uuid) -> Self {
        Self {
            patient_id: Some(patient_id),
            doctor_id: Some(doctor_id),
        }
    }

    pub fn doctor(doctor_id: Uuid) -> Self {
        Self {
            patient_id: None,
            doctor_id: Some(doctor_id),
        }
    }
}

/// Declared access rule for one scheduler operation. Admins pass the
/// ownership check whenever the policy accepts the admin role at all.
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    pub operation: &'static str,
    pub roles: &'static [Role],
    pub owner: OwnerRule,
}

pub const BOOK: AccessPolicy = AccessPolicy {
    operation: "book",
    roles: &[Role::Patient],
    owner: OwnerRule::Patient,
};

pub const RESCHEDULE: AccessPolicy = AccessPolicy {
    operation: "reschedule",
    roles: &[Role::Patient],
    owner: OwnerRule::Patient,
};

pub const CANCEL: AccessPolicy = AccessPolicy {
    operation: "cancel",
    roles: &[Role::Patient, Role::Admin],
    owner: OwnerRule::Patient,
};

pub const CHANGE_STATUS: AccessPolicy = AccessPolicy {
    operation: "change_status",
    roles: &[Role::Doctor, Role::Admin],
    owner: OwnerRule::Doctor,
};

pub const LIST_DOCTOR_APPOINTMENTS: AccessPolicy = AccessPolicy {
    operation: "list_doctor_appointments",
    roles: &[Role::Doctor, Role::Admin],
    owner: OwnerRule::Doctor,
};

pub const VIEW_APPOINTMENT: AccessPolicy = AccessPolicy {
    operation: "view_appointment",
    roles: &[Role::Admin, Role::Doctor, Role::Patient],
    owner: OwnerRule::Participant,
};

pub const VIEW_AVAILABILITY: AccessPolicy = AccessPolicy {
    operation: "view_availability",
    roles: &[Role::Admin, Role::Doctor, Role::Patient],
    owner: OwnerRule::Anyone,
};

impl AccessPolicy {
    /// Verify the token and the caller's role.
    pub fn authenticate(
        &self,
        validator: &TokenValidator,
        token: &str,
    ) -> Result<AuthenticatedUser, AuthError> {
        validator.validate_any(token, self.roles).map_err(|e| {
            debug!("{} rejected at authentication: {}", self.operation, e);
            e
        })
    }

    /// Check the caller against the parties of the resource.
    pub fn authorize(&self, caller: &AuthenticatedUser, owners: Owners) -> Result<(), AuthError> {
        if caller.is_admin() && self.roles.contains(&Role::Admin) {
            return Ok(());
        }

        let is = |party: Option<Uuid>| party == Some(caller.subject_id);
        let owns = match self.owner {
            OwnerRule::Patient => caller.role == Role::Patient && is(owners.patient_id),
            OwnerRule::Doctor => caller.role == Role::Doctor && is(owners.doctor_id),
            OwnerRule::Participant => {
                (caller.role == Role::Patient && is(owners.patient_id))
                    || (caller.role == Role::Doctor && is(owners.doctor_id))
            }
            OwnerRule::Anyone => true,
        };

        if owns {
            Ok(())
        } else {
            debug!(
                "{} rejected: {} {} does not own the resource",
                self.operation, caller.role, caller.subject_id
            );
            Err(AuthError::NotOwner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn caller(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            subject_id: Uuid::new_v4(),
            role,
            email: None,
            issued_at: None,
        }
    }

    #[test]
    fn test_patient_policies_require_ownership() {
        let patient = caller(Role::Patient);
        let doctor_id = Uuid::new_v4();

        assert!(BOOK.authorize(&patient, Owners::new(patient.subject_id, doctor_id)).is_ok());
        assert_matches!(
            BOOK.authorize(&patient, Owners::new(Uuid::new_v4(), doctor_id)),
            Err(AuthError::NotOwner)
        );
    }

    #[test]
    fn test_admin_bypass_only_where_admin_accepted() {
        let admin = caller(Role::Admin);
        let owners = Owners::new(Uuid::new_v4(), Uuid::new_v4());

        assert!(CANCEL.authorize(&admin, owners).is_ok());
        assert!(CHANGE_STATUS.authorize(&admin, owners).is_ok());
        assert_matches!(RESCHEDULE.authorize(&admin, owners), Err(AuthError::NotOwner));
    }

    #[test]
    fn test_doctor_cannot_act_as_patient_with_same_id() {
        let doctor = caller(Role::Doctor);
        let owners = Owners::new(doctor.subject_id, Uuid::new_v4());
        assert_matches!(CANCEL.authorize(&doctor, owners), Err(AuthError::NotOwner));
    }

    #[test]
    fn test_participant_rule() {
        let doctor = caller(Role::Doctor);
        let patient = caller(Role::Patient);
        let owners = Owners::new(patient.subject_id, doctor.subject_id);

        assert!(VIEW_APPOINTMENT.authorize(&doctor, owners).is_ok());
        assert!(VIEW_APPOINTMENT.authorize(&patient, owners).is_ok());
        assert_matches!(
            VIEW_APPOINTMENT.authorize(&caller(Role::Patient), owners),
            Err(AuthError::NotOwner)
        );
    }

    #[test]
    fn test_doctor_listing_requires_matching_doctor() {
        let doctor = caller(Role::Doctor);
        assert!(LIST_DOCTOR_APPOINTMENTS.authorize(&doctor, Owners::doctor(doctor.subject_id)).is_ok());
        assert_matches!(
            LIST_DOCTOR_APPOINTMENTS.authorize(&doctor, Owners::doctor(Uuid::new_v4())),
            Err(AuthError::NotOwner)
        );
    }

    #[test]
    fn test_authenticate_checks_roles() {
        let validator = TokenValidator::new("policy-secret");
        let token = validator
            .issue(Uuid::new_v4(), Role::Doctor, chrono::Duration::hours(1))
            .unwrap();

        assert_matches!(
            BOOK.authenticate(&validator, &token),
            Err(AuthError::RoleMismatch { actual: Role::Doctor })
        );
        assert!(CHANGE_STATUS.authenticate(&validator, &token).is_ok());
        assert!(VIEW_AVAILABILITY.authenticate(&validator, &token).is_ok());
    }
}
