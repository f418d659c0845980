use diesel::prelude::*;
use serde::Deserialize;

use crate::error::FieldErrors;
use crate::models::{ExpertProfile, OrganizationProfile};
use crate::schema::{expert_profiles, organization_profiles};
use crate::validation::Checks;

pub const AVAILABILITY_OPTIONS: &[&str] = &["full_time", "part_time", "project"];
pub const ORGANIZATION_TYPES: &[&str] = &[
    "incubator",
    "accelerator",
    "university",
    "government",
    "corporate",
    "other",
];

/// A multi-step profile form: an ordered list of named steps, each of
/// which validates its own slice of the fields.
pub trait ProfileWizard {
    type Fields;
    type Changes: Default;

    const STEPS: &'static [&'static str];

    fn validate_step(index: usize, fields: &Self::Fields) -> Result<Self::Changes, FieldErrors>;

    fn step_index(name: &str) -> Option<usize> {
        Self::STEPS.iter().position(|step| *step == name)
    }

    /// Runs every step and merges the failures.
    fn validate_all(fields: &Self::Fields) -> Result<(), FieldErrors> {
        let mut checks = Checks::new();
        for index in 0..Self::STEPS.len() {
            if let Err(errors) = Self::validate_step(index, fields) {
                checks.merge(errors);
            }
        }
        checks.finish(())
    }
}

/// The step a profile resumes at, given how many steps were saved.
pub fn resume_step(saved_steps: i32, total_steps: usize) -> usize {
    (saved_steps.max(0) as usize).min(total_steps.saturating_sub(1))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpertFields {
    pub headline: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub skills: Option<Vec<String>>,
    pub industries: Option<Vec<String>>,
    pub years_experience: Option<i32>,
    pub hourly_rate: Option<i32>,
    pub availability: Option<String>,
    pub linkedin_url: Option<String>,
    pub portfolio_url: Option<String>,
}

impl From<&ExpertProfile> for ExpertFields {
    fn from(profile: &ExpertProfile) -> Self {
        Self {
            headline: profile.headline.clone(),
            bio: profile.bio.clone(),
            location: profile.location.clone(),
            skills: Some(profile.skills.clone()),
            industries: Some(profile.industries.clone()),
            years_experience: profile.years_experience,
            hourly_rate: profile.hourly_rate,
            availability: profile.availability.clone(),
            linkedin_url: profile.linkedin_url.clone(),
            portfolio_url: profile.portfolio_url.clone(),
        }
    }
}

#[derive(Debug, Default, PartialEq, AsChangeset)]
#[diesel(table_name = expert_profiles)]
pub struct ExpertChanges {
    pub headline: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub skills: Option<Vec<String>>,
    pub industries: Option<Vec<String>>,
    pub years_experience: Option<i32>,
    pub hourly_rate: Option<i32>,
    pub availability: Option<String>,
    pub linkedin_url: Option<Option<String>>,
    pub portfolio_url: Option<Option<String>>,
}

pub struct ExpertWizard;

impl ProfileWizard for ExpertWizard {
    type Fields = ExpertFields;
    type Changes = ExpertChanges;

    const STEPS: &'static [&'static str] = &["basics", "expertise", "rates", "links"];

    fn validate_step(index: usize, fields: &ExpertFields) -> Result<ExpertChanges, FieldErrors> {
        let mut checks = Checks::new();
        let changes = match index {
            0 => ExpertChanges {
                headline: checks.text("headline", fields.headline.as_deref(), 5, 120),
                bio: checks.text("bio", fields.bio.as_deref(), 30, 2000),
                location: checks.text("location", fields.location.as_deref(), 2, 120),
                ..Default::default()
            },
            1 => ExpertChanges {
                skills: checks.labels("skills", fields.skills.as_deref(), 1, 20),
                industries: checks.labels("industries", fields.industries.as_deref(), 1, 10),
                years_experience: checks.int_range(
                    "years_experience",
                    fields.years_experience,
                    0,
                    60,
                ),
                ..Default::default()
            },
            2 => ExpertChanges {
                hourly_rate: checks.int_range("hourly_rate", fields.hourly_rate, 1, 10_000),
                availability: checks.choice(
                    "availability",
                    fields.availability.as_deref(),
                    AVAILABILITY_OPTIONS,
                ),
                ..Default::default()
            },
            3 => ExpertChanges {
                linkedin_url: Some(
                    checks.optional_url("linkedin_url", fields.linkedin_url.as_deref()),
                ),
                portfolio_url: Some(
                    checks.optional_url("portfolio_url", fields.portfolio_url.as_deref()),
                ),
                ..Default::default()
            },
            _ => {
                checks.fail("step", "unknown step");
                ExpertChanges::default()
            }
        };
        checks.finish(changes)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationFields {
    pub organization_name: Option<String>,
    pub organization_type: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub team_size: Option<i32>,
    pub focus_areas: Option<Vec<String>>,
    pub website: Option<String>,
}

impl From<&OrganizationProfile> for OrganizationFields {
    fn from(profile: &OrganizationProfile) -> Self {
        Self {
            organization_name: profile.organization_name.clone(),
            organization_type: profile.organization_type.clone(),
            location: profile.location.clone(),
            description: profile.description.clone(),
            team_size: profile.team_size,
            focus_areas: Some(profile.focus_areas.clone()),
            website: profile.website.clone(),
        }
    }
}

#[derive(Debug, Default, PartialEq, AsChangeset)]
#[diesel(table_name = organization_profiles)]
pub struct OrganizationChanges {
    pub organization_name: Option<String>,
    pub organization_type: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub team_size: Option<i32>,
    pub focus_areas: Option<Vec<String>>,
    pub website: Option<Option<String>>,
}

pub struct OrganizationWizard;

impl ProfileWizard for OrganizationWizard {
    type Fields = OrganizationFields;
    type Changes = OrganizationChanges;

    const STEPS: &'static [&'static str] = &["basics", "about", "focus"];

    fn validate_step(
        index: usize,
        fields: &OrganizationFields,
    ) -> Result<OrganizationChanges, FieldErrors> {
        let mut checks = Checks::new();
        let changes = match index {
            0 => OrganizationChanges {
                organization_name: checks.text(
                    "organization_name",
                    fields.organization_name.as_deref(),
                    2,
                    120,
                ),
                organization_type: checks.choice(
                    "organization_type",
                    fields.organization_type.as_deref(),
                    ORGANIZATION_TYPES,
                ),
                location: checks.text("location", fields.location.as_deref(), 2, 120),
                ..Default::default()
            },
            1 => OrganizationChanges {
                description: checks.text("description", fields.description.as_deref(), 30, 2000),
                team_size: checks.int_range("team_size", fields.team_size, 1, 100_000),
                ..Default::default()
            },
            2 => OrganizationChanges {
                focus_areas: checks.labels("focus_areas", fields.focus_areas.as_deref(), 1, 15),
                website: Some(checks.optional_url("website", fields.website.as_deref())),
                ..Default::default()
            },
            _ => {
                checks.fail("step", "unknown step");
                OrganizationChanges::default()
            }
        };
        checks.finish(changes)
    }
}
