//! Multipart form parsing helpers
//!
//! Collects the image and text fields of a submission upload in one pass.

use std::collections::HashMap;

use axum::extract::Multipart;
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::validation::{validate_content_type, validate_file_size};

/// An image uploaded via multipart form
#[derive(Debug, Clone)]
pub struct FileField {
    pub data: Vec<u8>,
    /// Content-Type from the multipart field (if provided)
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

/// Parsed multipart form fields
#[derive(Debug, Default)]
pub struct MultipartFields {
    file: Option<FileField>,
    text_fields: HashMap<String, String>,
}

impl MultipartFields {
    /// Parse all fields from a multipart request.
    ///
    /// The field named `file` is the image; everything else is read as text.
    /// Content-Type and size are checked as the file is read.
    pub async fn parse(
        multipart: &mut Multipart,
        validate_content_type_flag: bool,
        max_file_size: usize,
    ) -> Result<Self, ApiError> {
        let mut fields = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to parse multipart: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();

            if name == "file" {
                let content_type = field.content_type().map(|s| s.to_string());
                let file_name = field.file_name().map(|s| s.to_string());

                if validate_content_type_flag {
                    validate_content_type(content_type.as_deref())?;
                }

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?
                    .to_vec();

                validate_file_size(data.len(), max_file_size)?;

                fields.file = Some(FileField {
                    data,
                    content_type,
                    file_name,
                });
            } else {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read field '{}': {}", name, e))
                })?;
                fields.text_fields.insert(name, value);
            }
        }

        Ok(fields)
    }

    /// Get the file field, or fail if no file was uploaded.
    pub fn require_file(&self) -> Result<&FileField, ApiError> {
        self.file.as_ref().ok_or_else(|| {
            ApiError::bad_request("No file provided. Use 'file' field in multipart form.")
        })
    }

    pub fn take_file(&mut self) -> Option<FileField> {
        self.file.take()
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.text_fields.get(name).map(|s| s.as_str())
    }

    /// Get a text field parsed as JSON
    ///
    /// Returns:
    /// - `Ok(Some(T))` if the field exists and is valid JSON
    /// - `Ok(None)` if the field is missing or empty
    /// - `Err(ApiError)` if the field exists but JSON parsing fails
    pub fn get_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ApiError> {
        match self.text_fields.get(name) {
            Some(json) if !json.trim().is_empty() => {
                let value: T = serde_json::from_str(json)
                    .map_err(|e| ApiError::bad_request(format!("Invalid {} JSON: {}", name, e)))?;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }
}
