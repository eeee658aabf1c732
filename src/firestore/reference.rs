use super::models::{Document, ListDocumentsResponse};
use super::value::{from_fields, to_fields};
use super::{FirebaseFirestore, FirestoreError};
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Clone)]
pub struct DocumentReference<'a> {
    pub(crate) firestore: &'a FirebaseFirestore,
    pub(crate) path: String,
}

impl<'a> DocumentReference<'a> {
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Path relative to the database's `documents` root, e.g. `users/alice`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn collection(&self, collection_id: &str) -> CollectionReference<'a> {
        CollectionReference {
            firestore: self.firestore,
            path: format!("{}/{}", self.path, collection_id),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        let response = self
            .firestore
            .request(Method::GET, self.firestore.url_for(&self.path)?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = FirebaseFirestore::check(response, "Get document").await?;

        let doc: Document = response.json().await?;
        Ok(Some(from_fields(doc.fields)?))
    }

    /// Creates or overwrites the document.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), FirestoreError> {
        self.patch(value, None, "Set document").await
    }

    /// Writes only the fields named in `field_paths`.
    pub async fn update<T: Serialize>(
        &self,
        value: &T,
        field_paths: &[&str],
    ) -> Result<(), FirestoreError> {
        self.patch(value, Some(field_paths), "Update document").await
    }

    async fn patch<T: Serialize>(
        &self,
        value: &T,
        mask: Option<&[&str]>,
        action: &str,
    ) -> Result<(), FirestoreError> {
        let body = serde_json::json!({ "fields": to_fields(value)? });

        let mut url = self.firestore.url_for(&self.path)?;
        if let Some(fields) = mask {
            let mut query = url.query_pairs_mut();
            for field in fields {
                query.append_pair("updateMask.fieldPaths", field);
            }
        }

        let response = self
            .firestore
            .request(Method::PATCH, url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;
        FirebaseFirestore::check(response, action).await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), FirestoreError> {
        let response = self
            .firestore
            .request(Method::DELETE, self.firestore.url_for(&self.path)?)
            .send()
            .await?;
        FirebaseFirestore::check(response, "Delete document").await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct CollectionReference<'a> {
    pub(crate) firestore: &'a FirebaseFirestore,
    pub(crate) path: String,
}

impl<'a> CollectionReference<'a> {
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn doc(&self, document_id: &str) -> DocumentReference<'a> {
        DocumentReference {
            firestore: self.firestore,
            path: format!("{}/{}", self.path, document_id),
        }
    }

    pub async fn list_documents(&self) -> Result<ListDocumentsResponse, FirestoreError> {
        let response = self
            .firestore
            .request(Method::GET, self.firestore.url_for(&self.path)?)
            .send()
            .await?;
        let response = FirebaseFirestore::check(response, "List documents").await?;
        Ok(response.json().await?)
    }

    /// Adds a document under a generated id.
    pub async fn add<T: Serialize>(&self, value: &T) -> Result<Document, FirestoreError> {
        let body = serde_json::json!({ "fields": to_fields(value)? });

        let response = self
            .firestore
            .request(Method::POST, self.firestore.url_for(&self.path)?)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;
        let response = FirebaseFirestore::check(response, "Add document").await?;
        Ok(response.json().await?)
    }
}
