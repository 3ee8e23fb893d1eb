use quick_xml::se::to_string;
use serde::Serialize;

use crate::error::SandbarError;

#[derive(Serialize)]
#[serde(rename = "InitiateMultipartUploadResponse")]
pub struct InitiateMultipartUploadResponse {
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

#[derive(Serialize)]
#[serde(rename = "CompleteMultipartUploadResponse")]
pub struct CompleteMultipartUploadResponse {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Serialize)]
#[serde(rename = "Error")]
pub struct ErrorResponse {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "RequestId")]
    pub request_id: String,
}

fn render<T: Serialize>(value: &T) -> Result<String, SandbarError> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&to_string(value)?);
    Ok(xml)
}

impl InitiateMultipartUploadResponse {
    pub fn new(bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        }
    }

    pub fn to_xml(&self) -> Result<String, SandbarError> {
        render(self)
    }
}

impl CompleteMultipartUploadResponse {
    pub fn new(location: String, bucket: &str, key: &str, etag: &str) -> Self {
        Self {
            location,
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: etag.to_string(),
        }
    }

    pub fn to_xml(&self) -> Result<String, SandbarError> {
        render(self)
    }
}

impl ErrorResponse {
    pub fn new(code: &str, message: String, request_id: &str) -> Self {
        Self {
            code: code.to_string(),
            message,
            request_id: request_id.to_string(),
        }
    }

    pub fn to_xml(&self) -> Result<String, SandbarError> {
        render(self)
    }
}
