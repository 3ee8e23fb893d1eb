//! Route table for the S3 surface.
//!
//! Dispatch depends only on the HTTP method and which of the `uploads`,
//! `uploadId`, and `partNumber` query keys are present; the table below
//! makes every mapping explicit.

use std::collections::HashMap;

use hyper::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    GetObject,
    PutObject,
    DeleteObject,
    InitiateMultipart,
    UploadPart { upload_id: String, part_number: String },
    CompleteMultipart { upload_id: String },
    AbortMultipart { upload_id: String },
    Preflight,
    Unknown,
}

/// Parse a raw query string into a flat map with url-decoded keys and
/// values. Bare flags like `uploads` map to an empty value.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for param in query.split('&') {
        if param.is_empty() {
            continue;
        }
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        let key = urlencoding::decode(key)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| value.to_string());
        params.insert(key, value);
    }
    params
}

/// Resolve the route from method and query-key presence.
pub fn resolve(method: &Method, query: &HashMap<String, String>) -> Route {
    let upload_id = query.get("uploadId");
    let part_number = query.get("partNumber");
    let has_uploads_flag = query.contains_key("uploads");

    match *method {
        Method::GET => Route::GetObject,
        Method::PUT => match (upload_id, part_number) {
            (Some(upload_id), Some(part_number)) => Route::UploadPart {
                upload_id: upload_id.clone(),
                part_number: part_number.clone(),
            },
            (None, None) => Route::PutObject,
            _ => Route::Unknown,
        },
        Method::POST if has_uploads_flag => Route::InitiateMultipart,
        Method::POST => match upload_id {
            Some(upload_id) => Route::CompleteMultipart {
                upload_id: upload_id.clone(),
            },
            None => Route::Unknown,
        },
        Method::DELETE => match upload_id {
            Some(upload_id) => Route::AbortMultipart {
                upload_id: upload_id.clone(),
            },
            None => Route::DeleteObject,
        },
        Method::OPTIONS => Route::Preflight,
        _ => Route::Unknown,
    }
}
