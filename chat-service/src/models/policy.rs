//! Per-course access policy records.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The access-control record for one course.
///
/// Owned by the policy store and loaded fresh per request; the gate reads
/// it and never writes it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoursePolicy {
    /// Course identifier the policy belongs to.
    pub course_name: String,

    /// Email of the course owner.
    pub owner_email: String,

    /// Emails with admin privileges.
    #[serde(default)]
    pub admin_emails: HashSet<String>,

    /// Emails explicitly approved for access.
    #[serde(default)]
    pub approved_emails: HashSet<String>,

    /// Private courses reject anonymous readers.
    #[serde(default)]
    pub is_private: bool,

    /// When set, any authenticated user gets regular access.
    #[serde(default)]
    pub allow_any_logged_in_user: bool,
}

impl CoursePolicy {
    pub fn new(course_name: impl Into<String>, owner_email: impl Into<String>) -> Self {
        Self {
            course_name: course_name.into(),
            owner_email: owner_email.into(),
            admin_emails: HashSet::new(),
            approved_emails: HashSet::new(),
            is_private: false,
            allow_any_logged_in_user: false,
        }
    }

    pub fn with_admin(mut self, email: impl Into<String>) -> Self {
        self.admin_emails.insert(email.into());
        self
    }

    pub fn with_approved(mut self, email: impl Into<String>) -> Self {
        self.approved_emails.insert(email.into());
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn open_to_logged_in(mut self) -> Self {
        self.allow_any_logged_in_user = true;
        self
    }
}
