/// Skill registry and install pipeline metrics
pub mod skills {
    /// Skills currently in the active state
    pub const ACTIVE: &str = "alder_skills_active";
    /// Skills that failed to load or start
    pub const FAILED_TOTAL: &str = "alder_skills_failed_total";
    /// Install batches started by the pipeline
    pub const INSTALL_BATCHES_TOTAL: &str = "alder_skills_install_batches_total";
    /// Tickets taken through fetch and provisioning
    pub const INSTALL_ATTEMPTS_TOTAL: &str = "alder_skills_install_attempts_total";
    /// Tickets that ended in failure, labelled by `reason`
    pub const INSTALL_ERRORS_TOTAL: &str = "alder_skills_install_errors_total";
    /// Wall time of a single ticket install in seconds
    pub const INSTALL_DURATION_SECONDS: &str = "alder_skills_install_duration_seconds";
    /// Updates found by the catalog check
    pub const UPDATES_FOUND_TOTAL: &str = "alder_skills_updates_found_total";
}

/// Common label keys
pub mod labels {
    pub const SKILL: &str = "skill";
    pub const REASON: &str = "reason";
}
