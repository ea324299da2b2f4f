/// Harvest configuration
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::HarvestError;

/// Tunables for the harvest pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// First term code whose weeks-based (clinical) effort is recorded in weeks
    pub clinical_weeks_cutoff_term: i32,
    /// Hours recorded per clinical week for terms before the cutoff
    pub clinical_hours_per_week: i32,
    /// Regex over the directory login id that marks a guest account
    pub guest_account_pattern: String,
    /// Department given to guest accounts without one in the directory
    pub guest_department: String,
    /// Department used when resolution yields nothing
    pub default_department: String,
    /// Generic R-course used by the default R-course service
    pub r_course: RCourseConfig,
}

/// Descriptors of the generic R-course created once per term.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RCourseConfig {
    pub crn: String,
    pub subj_code: String,
    pub crse_numb: String,
    pub seq_numb: String,
    pub units: f64,
    pub cust_dept: String,
    pub effort_type_id: String,
    pub role: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            clinical_weeks_cutoff_term: 201604,
            clinical_hours_per_week: 40,
            guest_account_pattern: "(?i)^guest[a-z0-9]*$".to_string(),
            guest_department: "GUEST".to_string(),
            default_department: "UNK".to_string(),
            r_course: RCourseConfig::default(),
        }
    }
}

impl Default for RCourseConfig {
    fn default() -> Self {
        Self {
            crn: "RESID".to_string(),
            subj_code: "RES".to_string(),
            crse_numb: "000R".to_string(),
            seq_numb: "001".to_string(),
            units: 0.0,
            cust_dept: "UNK".to_string(),
            effort_type_id: "RES".to_string(),
            role: "Instructor".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Loads a configuration from a JSON file. Missing fields take their
    /// default values.
    ///
    /// # Arguments
    /// * `path` - Path to the JSON configuration file
    ///
    /// # Returns
    /// * `Ok(HarvestConfig)` - The validated configuration
    /// * `Err` - If the file can't be read, parsed or fails validation
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read harvest config {}", path.display()))?;
        let config: HarvestConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse harvest config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), HarvestError> {
        self.guest_regex()?;

        if self.clinical_hours_per_week <= 0 {
            return Err(HarvestError::Config {
                message: "clinical_hours_per_week must be positive".to_string(),
            });
        }

        if !self.r_course.crse_numb.ends_with('R') {
            return Err(HarvestError::Config {
                message: format!(
                    "generic R-course number '{}' must end in 'R'",
                    self.r_course.crse_numb
                ),
            });
        }

        Ok(())
    }

    /// Compiles the guest naming convention.
    pub fn guest_regex(&self) -> Result<Regex, HarvestError> {
        Regex::new(&self.guest_account_pattern).map_err(|e| HarvestError::Config {
            message: format!("invalid guest_account_pattern: {}", e),
        })
    }
}
