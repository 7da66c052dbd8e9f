//! Graded access control for course-scoped requests.
//!
//! Resolves the course a request targets, loads its access policy, and
//! evaluates the caller against the required level. The gate is stateless
//! and reentrant: its only side effect is the policy-store read.

pub mod identity;

pub use identity::{AuthenticatedIdentity, IdentityClaims, IdentityVerifier};

use axum::http::{HeaderMap, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::models::CoursePolicy;
use crate::services::policy_store::PolicyStore;
use service_core::error::AppError;

/// Header carrying the course name when neither query nor body do.
pub const COURSE_HEADER: &str = "x-course-name";

/// The graded privilege an operation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    /// Any caller with access to the course.
    Any,
    /// Course admins and the owner.
    Admin,
    /// The course owner only.
    Owner,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Any => write!(f, "member"),
            AccessLevel::Admin => write!(f, "admin"),
            AccessLevel::Owner => write!(f, "owner"),
        }
    }
}

/// Required access for an endpoint: one fixed level, or a per-method map
/// for routes whose privilege depends on the verb.
#[derive(Debug, Clone)]
pub enum RequiredAccess {
    Always(AccessLevel),
    PerMethod(HashMap<Method, AccessLevel>),
}

impl RequiredAccess {
    pub fn per_method<I>(levels: I) -> Self
    where
        I: IntoIterator<Item = (Method, AccessLevel)>,
    {
        RequiredAccess::PerMethod(levels.into_iter().collect())
    }

    /// Effective level for a request method; unmapped methods default to `Any`.
    pub fn for_method(&self, method: &Method) -> AccessLevel {
        match self {
            RequiredAccess::Always(level) => *level,
            RequiredAccess::PerMethod(map) => map.get(method).copied().unwrap_or(AccessLevel::Any),
        }
    }
}

/// Access predicates derived from one (identity, policy) pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessFacts {
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_approved: bool,
    pub has_any_access: bool,
    pub is_regular_user: bool,
}

impl AccessFacts {
    pub fn evaluate(identity: &AuthenticatedIdentity, policy: &CoursePolicy) -> Self {
        let email = identity.email.as_deref();
        let is_owner = email == Some(policy.owner_email.as_str());
        let is_admin = email.map_or(false, |e| policy.admin_emails.contains(e));
        let is_approved = email.map_or(false, |e| policy.approved_emails.contains(e));
        let has_any_access = is_owner
            || is_admin
            || is_approved
            || (policy.allow_any_logged_in_user && email.is_some());

        Self {
            is_owner,
            is_admin,
            is_approved,
            has_any_access,
            is_regular_user: has_any_access && !is_owner && !is_admin,
        }
    }

    /// The level-to-predicate table: Owner requires ownership, Admin accepts
    /// owner or admin, Any accepts any granted access.
    pub fn satisfies(&self, level: AccessLevel) -> bool {
        match level {
            AccessLevel::Owner => self.is_owner,
            AccessLevel::Admin => self.is_owner || self.is_admin,
            AccessLevel::Any => self.has_any_access,
        }
    }
}

/// Authorization context attached to a request once the gate grants it.
#[derive(Debug, Clone)]
pub struct CourseContext {
    pub course_name: String,
    pub identity: AuthenticatedIdentity,
    pub facts: AccessFacts,
}

/// Resolve the course name from request parts.
///
/// Precedence: query `courseName`, query `project_name`, body `courseName`,
/// body `course_name`, header `x-course-name`. First non-empty match wins.
pub fn resolve_course_name(
    query: &HashMap<String, String>,
    body: Option<&Value>,
    headers: &HeaderMap,
) -> Option<String> {
    let from_query = |key: &str| {
        query
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };
    let from_body = |key: &str| {
        body.and_then(|b| b.get(key))
            .and_then(Value::as_str)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };
    let from_header = || {
        headers
            .get(COURSE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };

    from_query("courseName")
        .or_else(|| from_query("project_name"))
        .or_else(|| from_body("courseName"))
        .or_else(|| from_body("course_name"))
        .or_else(from_header)
}

/// The access-control gate.
#[derive(Clone)]
pub struct CourseAccessGate {
    store: Arc<dyn PolicyStore>,
}

impl CourseAccessGate {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Authorize an authenticated request against the required level.
    pub async fn authorize(
        &self,
        method: &Method,
        query: &HashMap<String, String>,
        body: Option<&Value>,
        headers: &HeaderMap,
        identity: &AuthenticatedIdentity,
        required: &RequiredAccess,
    ) -> Result<CourseContext, AppError> {
        if !identity.is_authenticated() {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Authentication required"
            )));
        }

        let (course_name, policy) = self.resolve_policy(query, body, headers).await?;
        self.decide(method, course_name, policy, identity.clone(), required)
    }

    /// Authorize a read on a possibly-public course.
    ///
    /// Public courses serve anonymous callers at `Any` level; private
    /// courses enforce the full authenticated path.
    pub async fn authorize_public(
        &self,
        method: &Method,
        query: &HashMap<String, String>,
        body: Option<&Value>,
        headers: &HeaderMap,
        identity: &AuthenticatedIdentity,
        required: &RequiredAccess,
    ) -> Result<CourseContext, AppError> {
        let (course_name, policy) = self.resolve_policy(query, body, headers).await?;

        if !policy.is_private {
            let mut facts = AccessFacts::evaluate(identity, &policy);
            facts.has_any_access = true;
            facts.is_regular_user = !facts.is_owner && !facts.is_admin;
            return Ok(CourseContext {
                course_name,
                identity: identity.clone(),
                facts,
            });
        }

        if !identity.is_authenticated() {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Authentication required"
            )));
        }
        self.decide(method, course_name, policy, identity.clone(), required)
    }

    async fn resolve_policy(
        &self,
        query: &HashMap<String, String>,
        body: Option<&Value>,
        headers: &HeaderMap,
    ) -> Result<(String, CoursePolicy), AppError> {
        let course_name = resolve_course_name(query, body, headers).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("No course specified in request"))
        })?;

        let policy = self.store.get(&course_name).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Course '{}' not found", course_name))
        })?;

        Ok((course_name, policy))
    }

    fn decide(
        &self,
        method: &Method,
        course_name: String,
        policy: CoursePolicy,
        identity: AuthenticatedIdentity,
        required: &RequiredAccess,
    ) -> Result<CourseContext, AppError> {
        let level = required.for_method(method);
        let facts = AccessFacts::evaluate(&identity, &policy);

        if !facts.satisfies(level) {
            tracing::debug!(
                course = %course_name,
                level = %level,
                email = ?identity.email,
                "access denied"
            );
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "{} access to course '{}' required",
                level,
                course_name
            )));
        }

        Ok(CourseContext {
            course_name,
            identity,
            facts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::policy_store::StaticPolicyStore;

    fn policy() -> CoursePolicy {
        CoursePolicy::new("cs101", "owner@example.edu")
            .with_admin("admin@example.edu")
            .with_approved("student@example.edu")
    }

    fn gate_with(policies: Vec<CoursePolicy>) -> CourseAccessGate {
        CourseAccessGate::new(Arc::new(StaticPolicyStore::new(policies)))
    }

    fn query_for(course: &str) -> HashMap<String, String> {
        HashMap::from([("courseName".to_string(), course.to_string())])
    }

    #[test]
    fn owner_satisfies_every_level() {
        let facts = AccessFacts::evaluate(
            &AuthenticatedIdentity::of("owner@example.edu"),
            &policy(),
        );
        assert!(facts.satisfies(AccessLevel::Owner));
        assert!(facts.satisfies(AccessLevel::Admin));
        assert!(facts.satisfies(AccessLevel::Any));
        assert!(!facts.is_regular_user);
    }

    #[test]
    fn admin_satisfies_admin_and_any_but_not_owner() {
        let facts = AccessFacts::evaluate(
            &AuthenticatedIdentity::of("admin@example.edu"),
            &policy(),
        );
        assert!(!facts.satisfies(AccessLevel::Owner));
        assert!(facts.satisfies(AccessLevel::Admin));
        assert!(facts.satisfies(AccessLevel::Any));
    }

    #[test]
    fn approved_user_is_regular() {
        let facts = AccessFacts::evaluate(
            &AuthenticatedIdentity::of("student@example.edu"),
            &policy(),
        );
        assert!(facts.satisfies(AccessLevel::Any));
        assert!(!facts.satisfies(AccessLevel::Admin));
        assert!(facts.is_regular_user);
    }

    #[test]
    fn stranger_has_no_access_unless_course_is_open() {
        let stranger = AuthenticatedIdentity::of("stranger@example.edu");
        assert!(!AccessFacts::evaluate(&stranger, &policy()).has_any_access);

        let open = policy().open_to_logged_in();
        assert!(AccessFacts::evaluate(&stranger, &open).has_any_access);
        assert!(!AccessFacts::evaluate(&AuthenticatedIdentity::anonymous(), &open).has_any_access);
    }

    #[test]
    fn query_course_name_wins_over_body() {
        let query = query_for("from-query");
        let body = serde_json::json!({ "course_name": "from-body" });
        let resolved = resolve_course_name(&query, Some(&body), &HeaderMap::new());
        assert_eq!(resolved.as_deref(), Some("from-query"));
    }

    #[test]
    fn body_course_name_wins_over_header() {
        let body = serde_json::json!({ "courseName": "from-body" });
        let mut headers = HeaderMap::new();
        headers.insert(COURSE_HEADER, "from-header".parse().unwrap());
        let resolved = resolve_course_name(&HashMap::new(), Some(&body), &headers);
        assert_eq!(resolved.as_deref(), Some("from-body"));

        let resolved = resolve_course_name(&HashMap::new(), None, &headers);
        assert_eq!(resolved.as_deref(), Some("from-header"));
    }

    #[test]
    fn empty_values_are_skipped() {
        let query = HashMap::from([("courseName".to_string(), "  ".to_string())]);
        let body = serde_json::json!({ "course_name": "cs101" });
        let resolved = resolve_course_name(&query, Some(&body), &HeaderMap::new());
        assert_eq!(resolved.as_deref(), Some("cs101"));
    }

    #[tokio::test]
    async fn unauthenticated_request_is_rejected() {
        let gate = gate_with(vec![policy()]);
        let err = gate
            .authorize(
                &Method::GET,
                &query_for("cs101"),
                None,
                &HeaderMap::new(),
                &AuthenticatedIdentity::anonymous(),
                &RequiredAccess::Always(AccessLevel::Any),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn missing_course_is_bad_request() {
        let gate = gate_with(vec![policy()]);
        let err = gate
            .authorize(
                &Method::GET,
                &HashMap::new(),
                None,
                &HeaderMap::new(),
                &AuthenticatedIdentity::of("owner@example.edu"),
                &RequiredAccess::Always(AccessLevel::Any),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn unknown_course_is_not_found() {
        let gate = gate_with(vec![policy()]);
        let err = gate
            .authorize(
                &Method::GET,
                &query_for("cs999"),
                None,
                &HeaderMap::new(),
                &AuthenticatedIdentity::of("owner@example.edu"),
                &RequiredAccess::Always(AccessLevel::Any),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn per_method_map_grades_by_verb() {
        let gate = gate_with(vec![policy()]);
        let required = RequiredAccess::per_method([
            (Method::DELETE, AccessLevel::Owner),
            (Method::POST, AccessLevel::Admin),
        ]);
        let admin = AuthenticatedIdentity::of("admin@example.edu");

        let err = gate
            .authorize(
                &Method::DELETE,
                &query_for("cs101"),
                None,
                &HeaderMap::new(),
                &admin,
                &required,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let granted = gate
            .authorize(
                &Method::POST,
                &query_for("cs101"),
                None,
                &HeaderMap::new(),
                &admin,
                &required,
            )
            .await
            .unwrap();
        assert!(granted.facts.is_admin);

        // Unmapped verbs fall back to Any
        let student = AuthenticatedIdentity::of("student@example.edu");
        assert!(gate
            .authorize(
                &Method::GET,
                &query_for("cs101"),
                None,
                &HeaderMap::new(),
                &student,
                &required,
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn public_course_serves_anonymous_readers() {
        let gate = gate_with(vec![policy()]);
        let granted = gate
            .authorize_public(
                &Method::GET,
                &query_for("cs101"),
                None,
                &HeaderMap::new(),
                &AuthenticatedIdentity::anonymous(),
                &RequiredAccess::Always(AccessLevel::Any),
            )
            .await
            .unwrap();
        assert!(granted.facts.has_any_access);
        assert!(!granted.identity.is_authenticated());
    }

    #[tokio::test]
    async fn private_course_rejects_anonymous_readers() {
        let gate = gate_with(vec![policy().private()]);
        let err = gate
            .authorize_public(
                &Method::GET,
                &query_for("cs101"),
                None,
                &HeaderMap::new(),
                &AuthenticatedIdentity::anonymous(),
                &RequiredAccess::Always(AccessLevel::Any),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
