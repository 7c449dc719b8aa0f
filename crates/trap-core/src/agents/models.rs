//! The role -> model map.
//!
//! Every role has an explicit model; the dev mapping is the default for
//! anything code-shaped. The review phase pins [`REVIEWER_MODEL`] when it
//! spawns reviewers.

use trap_db::models::Role;

/// Model used for coding roles.
pub const DEV_MODEL: &str = "moonshot/kimi-for-coding";
/// Model used for triage and research roles.
pub const PM_MODEL: &str = "gpt";
/// Model the review phase pins for reviewer spawns.
pub const REVIEWER_MODEL: &str = "sonnet";

/// The work-phase default model for a role.
pub fn model_for_role(role: Role) -> &'static str {
    match role {
        Role::Pm | Role::Research => PM_MODEL,
        Role::Dev | Role::Reviewer | Role::ConflictResolver => DEV_MODEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_a_model() {
        for role in [
            Role::Pm,
            Role::Dev,
            Role::Research,
            Role::Reviewer,
            Role::ConflictResolver,
        ] {
            assert!(!model_for_role(role).is_empty());
        }
    }

    #[test]
    fn conflict_resolver_uses_the_dev_model() {
        assert_eq!(model_for_role(Role::ConflictResolver), DEV_MODEL);
    }
}
