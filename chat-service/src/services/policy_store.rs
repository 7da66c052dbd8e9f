//! Course policy lookup.
//!
//! Policies are owned by this store; the gate reads one per request and
//! never caches it.

use async_trait::async_trait;
use mongodb::{Client as MongoClient, Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use std::collections::HashMap;

use crate::models::CoursePolicy;
use service_core::error::AppError;

/// Read contract consumed by the access gate.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetch the policy for a course, `None` when the course does not exist.
    async fn get(&self, course_name: &str) -> Result<Option<CoursePolicy>, AppError>;
}

/// MongoDB-backed policy store.
#[derive(Clone)]
pub struct MongoPolicyStore {
    db: Database,
}

impl MongoPolicyStore {
    pub fn new(client: &MongoClient, database: &str) -> Self {
        Self {
            db: client.database(database),
        }
    }

    fn policies(&self) -> Collection<CoursePolicy> {
        self.db.collection("course_policies")
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        let course_name_index = IndexModel::builder()
            .keys(doc! { "course_name": 1 })
            .options(
                IndexOptions::builder()
                    .name("course_name_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.policies()
            .create_index(course_name_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create course_name index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MongoPolicyStore {
    async fn get(&self, course_name: &str) -> Result<Option<CoursePolicy>, AppError> {
        self.policies()
            .find_one(doc! { "course_name": course_name }, None)
            .await
            .map_err(|e| {
                tracing::error!(course = %course_name, "Failed to load course policy: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })
    }
}

/// Fixed in-memory policy store for tests.
pub struct StaticPolicyStore {
    policies: HashMap<String, CoursePolicy>,
}

impl StaticPolicyStore {
    pub fn new(policies: Vec<CoursePolicy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.course_name.clone(), p))
                .collect(),
        }
    }
}

#[async_trait]
impl PolicyStore for StaticPolicyStore {
    async fn get(&self, course_name: &str) -> Result<Option<CoursePolicy>, AppError> {
        Ok(self.policies.get(course_name).cloned())
    }
}
