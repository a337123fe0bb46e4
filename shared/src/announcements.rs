//! Announcements shown on the dashboard, stored in Postgres.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{Error, Result};

const COLUMNS: &str = "id, title, content, category, is_active, expires_at, created_at, updated_at";

/// A stored announcement.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create announcement request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnnouncement {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl CreateAnnouncement {
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.title.trim().is_empty() || self.content.trim().is_empty() {
            return Err(Error::Validation("title and content are required".to_string()));
        }
        Ok(())
    }
}

/// Partial update request; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnnouncement {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    pub content: Option<String>,
    /// `Some(None)` clears the category
    #[serde(default, deserialize_with = "present")]
    pub category: Option<Option<String>>,
    pub is_active: Option<bool>,
    /// `Some(None)` clears the expiry
    #[serde(default, deserialize_with = "present")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

/// Distinguish an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl UpdateAnnouncement {
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
        if blank(&self.title) || blank(&self.content) {
            return Err(Error::Validation("title and content cannot be blank".to_string()));
        }
        if self.title.is_none()
            && self.content.is_none()
            && self.category.is_none()
            && self.is_active.is_none()
            && self.expires_at.is_none()
        {
            return Err(Error::Validation("No fields to update".to_string()));
        }
        Ok(())
    }
}

/// Postgres-backed announcement storage.
#[derive(Clone)]
pub struct AnnouncementStore {
    pool: PgPool,
}

impl AnnouncementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List announcements, newest first.
    pub async fn list(&self, active_only: bool) -> Result<Vec<Announcement>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM announcements
            WHERE ($1 = FALSE OR (is_active AND (expires_at IS NULL OR expires_at > now())))
            ORDER BY created_at DESC
            "#
        );

        let rows = sqlx::query_as::<_, Announcement>(&sql)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    pub async fn create(&self, request: &CreateAnnouncement) -> Result<Announcement> {
        let sql = format!(
            r#"
            INSERT INTO announcements (id, title, content, category, is_active, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        );

        let created = sqlx::query_as::<_, Announcement>(&sql)
            .bind(Uuid::new_v4())
            .bind(request.title.trim())
            .bind(&request.content)
            .bind(&request.category)
            .bind(request.is_active)
            .bind(request.expires_at)
            .fetch_one(&self.pool)
            .await?;

        info!("Created announcement {}", created.id);
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, request: &UpdateAnnouncement) -> Result<Announcement> {
        let sql = format!(
            r#"
            UPDATE announcements SET
                title = COALESCE($2, title),
                content = COALESCE($3, content),
                category = CASE WHEN $4 THEN $5 ELSE category END,
                is_active = COALESCE($6, is_active),
                expires_at = CASE WHEN $7 THEN $8 ELSE expires_at END,
                updated_at = now()
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, Announcement>(&sql)
            .bind(id)
            .bind(request.title.as_deref().map(str::trim))
            .bind(&request.content)
            .bind(request.category.is_some())
            .bind(request.category.clone().flatten())
            .bind(request.is_active)
            .bind(request.expires_at.is_some())
            .bind(request.expires_at.flatten())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Announcement {} not found", id)))?;

        info!("Updated announcement {}", id);
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Announcement {} not found", id)));
        }

        info!("Deleted announcement {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn announcement(is_active: bool, expires_at: Option<DateTime<Utc>>) -> Announcement {
        let now = Utc::now();
        Announcement {
            id: Uuid::new_v4(),
            title: "Adli tatil".to_string(),
            content: "Adli tatil 20 Temmuz'da başlıyor.".to_string(),
            category: None,
            is_active,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_announcement_serializes_camel_case() {
        let expires = Utc::now() + Duration::days(7);
        let value = serde_json::to_value(announcement(true, Some(expires))).unwrap();
        assert_eq!(value["isActive"], true);
        assert!(value["expiresAt"].is_string());
        assert!(value["category"].is_null());
        assert!(value.get("is_active").is_none());
    }

    #[test]
    fn test_create_requires_title_and_content() {
        let request: CreateAnnouncement =
            serde_json::from_str(r#"{"title": "Duyuru", "content": "Metin"}"#).unwrap();
        assert!(request.is_active);
        request.check().unwrap();

        let request: CreateAnnouncement =
            serde_json::from_str(r#"{"title": "   ", "content": "Metin"}"#).unwrap();
        assert!(matches!(request.check(), Err(Error::Validation(_))));

        let request: CreateAnnouncement =
            serde_json::from_str(r#"{"title": "Duyuru", "content": ""}"#).unwrap();
        assert!(matches!(request.check(), Err(Error::Validation(_))));

        assert!(serde_json::from_str::<CreateAnnouncement>(r#"{"title": "Duyuru"}"#).is_err());
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let request: UpdateAnnouncement = serde_json::from_str(r#"{"expiresAt": null}"#).unwrap();
        assert_eq!(request.expires_at, Some(None));
        request.check().unwrap();

        let request: UpdateAnnouncement = serde_json::from_str(r#"{"isActive": false}"#).unwrap();
        assert_eq!(request.expires_at, None);
        request.check().unwrap();

        let request: UpdateAnnouncement =
            serde_json::from_str(r#"{"expiresAt": "2026-12-31T00:00:00Z"}"#).unwrap();
        assert!(request.expires_at.flatten().is_some());
    }

    #[test]
    fn test_update_can_clear_category() {
        let request: UpdateAnnouncement = serde_json::from_str(r#"{"category": null}"#).unwrap();
        assert_eq!(request.category, Some(None));
        request.check().unwrap();

        let request: UpdateAnnouncement = serde_json::from_str(r#"{"category": "mevzuat"}"#).unwrap();
        assert_eq!(request.category, Some(Some("mevzuat".to_string())));

        let request: UpdateAnnouncement = serde_json::from_str(r#"{"title": "Yeni"}"#).unwrap();
        assert_eq!(request.category, None);
    }

    #[test]
    fn test_update_rejects_empty_patch() {
        let request: UpdateAnnouncement = serde_json::from_str("{}").unwrap();
        assert!(matches!(request.check(), Err(Error::Validation(_))));

        let request: UpdateAnnouncement = serde_json::from_str(r#"{"title": " "}"#).unwrap();
        assert!(matches!(request.check(), Err(Error::Validation(_))));
    }
}
