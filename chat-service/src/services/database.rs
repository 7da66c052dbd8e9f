//! Database operations for the chat service.
//!
//! Handles conversation persistence via MongoDB.

use crate::models::Conversation;
use crate::services::conversation_store::ConversationStore;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client as MongoClient, Collection, Database, IndexModel,
    bson::{DateTime as BsonDateTime, doc},
    options::IndexOptions,
};
use service_core::error::AppError;

#[derive(Clone)]
pub struct ChatDb {
    client: MongoClient,
    db: Database,
}

impl ChatDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for chat-service");

        let conversations = self.conversations();

        let conversation_id_index = IndexModel::builder()
            .keys(doc! { "conversation_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("conversation_id_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        conversations
            .create_index(conversation_id_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create conversation_id index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        // Compound index for per-course, per-user listings
        let course_user_index = IndexModel::builder()
            .keys(doc! { "course_name": 1, "user_email": 1 })
            .options(
                IndexOptions::builder()
                    .name("course_user_idx".to_string())
                    .build(),
            )
            .build();

        conversations
            .create_index(course_user_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create course_user index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        let created_at_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("created_at_idx".to_string())
                    .build(),
            )
            .build();

        conversations
            .create_index(created_at_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create created_at index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }

    pub fn conversations(&self) -> Collection<Conversation> {
        self.db.collection("conversations")
    }

    pub async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), AppError> {
        self.conversations()
            .insert_one(conversation, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert conversation: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }

    pub async fn find_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, AppError> {
        self.conversations()
            .find_one(doc! { "conversation_id": conversation_id }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find conversation: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })
    }

    /// List conversations one user holds in one course, newest first.
    pub async fn list_conversations(
        &self,
        course_name: &str,
        user_email: &str,
    ) -> Result<Vec<Conversation>, AppError> {
        let filter = doc! { "course_name": course_name, "user_email": user_email };
        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();

        let cursor = self
            .conversations()
            .find(filter, options)
            .await
            .map_err(|e| {
                tracing::error!("Failed to query conversations: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        cursor.try_collect().await.map_err(|e| {
            tracing::error!("Failed to collect conversations: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })
    }

    /// Append a message to an existing conversation and update usage.
    pub async fn add_conversation_message(
        &self,
        conversation_id: &str,
        message: &crate::models::ConversationMessage,
        input_tokens: i32,
        output_tokens: i32,
    ) -> Result<(), AppError> {
        let now = BsonDateTime::now();

        let message_doc = mongodb::bson::to_document(message).map_err(|e| {
            tracing::error!("Failed to serialize message: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;

        self.conversations()
            .update_one(
                doc! { "conversation_id": conversation_id },
                doc! {
                    "$push": { "messages": message_doc },
                    "$inc": {
                        "message_count": 1,
                        "total_input_tokens": input_tokens,
                        "total_output_tokens": output_tokens
                    },
                    "$set": { "updated_at": now }
                },
                None,
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to add message to conversation: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        Ok(())
    }

    /// Delete every conversation in a course. Returns the deleted count.
    pub async fn purge_course_conversations(&self, course_name: &str) -> Result<u64, AppError> {
        let result = self
            .conversations()
            .delete_many(doc! { "course_name": course_name }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to purge conversations: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        Ok(result.deleted_count)
    }
}

#[async_trait]
impl ConversationStore for ChatDb {
    async fn insert(&self, conversation: &Conversation) -> Result<(), AppError> {
        self.insert_conversation(conversation).await
    }

    async fn find(&self, conversation_id: &str) -> Result<Option<Conversation>, AppError> {
        self.find_conversation(conversation_id).await
    }

    async fn list(
        &self,
        course_name: &str,
        user_email: &str,
    ) -> Result<Vec<Conversation>, AppError> {
        self.list_conversations(course_name, user_email).await
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        message: &crate::models::ConversationMessage,
        input_tokens: i32,
        output_tokens: i32,
    ) -> Result<(), AppError> {
        self.add_conversation_message(conversation_id, message, input_tokens, output_tokens)
            .await
    }

    async fn purge_course(&self, course_name: &str) -> Result<u64, AppError> {
        self.purge_course_conversations(course_name).await
    }

    async fn health_check(&self) -> Result<(), AppError> {
        ChatDb::health_check(self).await
    }
}
