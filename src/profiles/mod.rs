//! Expert and organization profile wizards.

pub mod hashtags;
pub mod wizard;

use crate::models::{ExpertProfile, OrganizationProfile};

use hashtags::generate_hashtags;

/// Upper bound for an autosaved wizard draft, serialized.
pub const MAX_DRAFT_BYTES: usize = 64 * 1024;

pub fn expert_hashtags(profile: &ExpertProfile) -> Vec<String> {
    generate_hashtags(
        profile
            .skills
            .iter()
            .chain(profile.industries.iter())
            .map(String::as_str),
    )
}

pub fn organization_hashtags(profile: &OrganizationProfile) -> Vec<String> {
    generate_hashtags(
        profile
            .organization_type
            .iter()
            .chain(profile.focus_areas.iter())
            .map(String::as_str),
    )
}
