//! HTTP front door for the S3 surface.
//!
//! Parses the request path and query, authenticates before any other work,
//! dispatches on the resolved route, and renders protocol responses with
//! request-id and CORS headers attached.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, RANGE};
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::verify_sigv4;
use crate::credentials::CredentialStore;
use crate::error::SandbarError;
use crate::filesystem::{parse_range_header, ByteStreamBody, ObjectStore};
use crate::multipart::MultipartManager;
use crate::router::{self, Route};
use crate::xml_responses::{
    CompleteMultipartUploadResponse, ErrorResponse, InitiateMultipartUploadResponse,
};

/// CORS response configuration; present only when CORS is enabled.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, PUT, POST, DELETE, OPTIONS".to_string(),
            allow_headers: "Authorization, Content-Type, Content-Length, Content-MD5, Range, x-amz-date, x-amz-content-sha256".to_string(),
            max_age: 3600,
        }
    }
}

/// Server context for S3 request handling, constructed once at startup and
/// shared across all connection tasks.
pub struct S3Handler {
    store: Arc<ObjectStore>,
    multipart: Arc<MultipartManager>,
    credentials: Arc<CredentialStore>,
    cors: Option<CorsConfig>,
    max_object_size: u64,
    verbose: bool,
}

impl S3Handler {
    pub fn new(
        store: Arc<ObjectStore>,
        multipart: Arc<MultipartManager>,
        credentials: Arc<CredentialStore>,
        cors: Option<CorsConfig>,
        max_object_size: u64,
        verbose: bool,
    ) -> Self {
        Self {
            store,
            multipart,
            credentials,
            cors,
            max_object_size,
            verbose,
        }
    }

    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<ByteStreamBody>, Infallible>
    where
        B: http_body::Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Display,
    {
        let request_id = Uuid::new_v4().to_string();
        let (parts, body) = req.into_parts();

        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let query = router::parse_query(parts.uri.query().unwrap_or(""));
        let route = router::resolve(&method, &query);

        info!(
            method = %method,
            path = %path,
            request_id = %request_id,
            "Incoming S3 request"
        );

        // Preflights are unsigned by nature; everything else authenticates
        // before the body is read or any filesystem work happens.
        if route == Route::Preflight {
            let response = self
                .handle_preflight()
                .unwrap_or_else(|e| self.error_response(e, &request_id));
            return Ok(self.finalize(response, &request_id));
        }

        match verify_sigv4(&parts, &self.credentials, chrono::Utc::now()) {
            Ok(verified) => {
                if self.verbose {
                    info!(
                        access_key = %verified.access_key_id,
                        request_id = %request_id,
                        "Request signature verified"
                    );
                } else {
                    debug!(
                        access_key = %verified.access_key_id,
                        request_id = %request_id,
                        "Request signature verified"
                    );
                }
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Signature verification failed");
                let response = self.error_response(e, &request_id);
                return Ok(self.finalize(response, &request_id));
            }
        }

        let result = match route {
            Route::GetObject => {
                let range = parts
                    .headers
                    .get(RANGE)
                    .and_then(|h| h.to_str().ok())
                    .map(|s| s.to_string());
                match parse_object_path(&path) {
                    Ok((bucket, key)) => self.handle_get_object(&bucket, &key, range).await,
                    Err(e) => Err(e),
                }
            }
            Route::PutObject => match parse_object_path(&path) {
                Ok((bucket, key)) => self.handle_put_object(&bucket, &key, &parts, body).await,
                Err(e) => Err(e),
            },
            Route::DeleteObject => match parse_object_path(&path) {
                Ok((bucket, key)) => self.handle_delete_object(&bucket, &key).await,
                Err(e) => Err(e),
            },
            Route::InitiateMultipart => match parse_object_path(&path) {
                Ok((bucket, key)) => self.handle_initiate_multipart(&bucket, &key).await,
                Err(e) => Err(e),
            },
            Route::UploadPart {
                upload_id,
                part_number,
            } => {
                self.handle_upload_part(&upload_id, &part_number, &parts, body)
                    .await
            }
            Route::CompleteMultipart { upload_id } => {
                self.handle_complete_multipart(&upload_id, body).await
            }
            Route::AbortMultipart { upload_id } => self.handle_abort_multipart(&upload_id).await,
            Route::Preflight => unreachable!("preflight handled above"),
            Route::Unknown => Err(SandbarError::MethodNotAllowed),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, code = e.code(), "Request failed");
                self.error_response(e, &request_id)
            }
        };

        info!(
            status = response.status().as_u16(),
            request_id = %request_id,
            "Request completed"
        );
        Ok(self.finalize(response, &request_id))
    }

    async fn handle_get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<String>,
    ) -> Result<Response<ByteStreamBody>, SandbarError> {
        let metadata = self.store.metadata(bucket, key).await?;
        let etag = self.store.compute_etag(&metadata.path).await?;

        let range = match range {
            Some(header) => Some(parse_range_header(&header, metadata.size)?),
            None => None,
        };

        let body = self.store.stream_object(&metadata, range).await?;

        let builder = Response::builder()
            .header(CONTENT_TYPE, &metadata.content_type)
            .header(ETAG, &etag)
            .header("Accept-Ranges", "bytes")
            .header(
                "Last-Modified",
                metadata
                    .last_modified
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            );

        let response = match range {
            Some((start, end)) => {
                debug!(bucket = %bucket, key = %key, start = start, end = end, "GetObject range success");
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_LENGTH, end - start + 1)
                    .header(
                        "Content-Range",
                        format!("bytes {}-{}/{}", start, end, metadata.size),
                    )
                    .body(body)?
            }
            None => {
                debug!(bucket = %bucket, key = %key, size = metadata.size, "GetObject success");
                builder
                    .status(StatusCode::OK)
                    .header(CONTENT_LENGTH, metadata.size)
                    .body(body)?
            }
        };
        Ok(response)
    }

    async fn handle_put_object<B>(
        &self,
        bucket: &str,
        key: &str,
        parts: &http::request::Parts,
        body: B,
    ) -> Result<Response<ByteStreamBody>, SandbarError>
    where
        B: http_body::Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Display,
    {
        self.require_content_length(parts)?;

        let (etag, size) = self.store.write_object(bucket, key, body).await?;
        debug!(bucket = %bucket, key = %key, size = size, "PutObject success");

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(ETAG, etag)
            .header(CONTENT_LENGTH, 0)
            .body(empty_body())?)
    }

    async fn handle_delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Response<ByteStreamBody>, SandbarError> {
        self.store.delete_object(bucket, key).await?;
        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(empty_body())?)
    }

    async fn handle_initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Response<ByteStreamBody>, SandbarError> {
        let upload_id = self.multipart.create_upload(bucket, key).await?;
        let xml = InitiateMultipartUploadResponse::new(bucket, key, &upload_id).to_xml()?;
        xml_response(StatusCode::OK, xml)
    }

    async fn handle_upload_part<B>(
        &self,
        upload_id: &str,
        part_number: &str,
        parts: &http::request::Parts,
        body: B,
    ) -> Result<Response<ByteStreamBody>, SandbarError>
    where
        B: http_body::Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Display,
    {
        let part_number: u32 = part_number.parse().map_err(|_| {
            SandbarError::InvalidArgument(format!("Invalid part number '{}'", part_number))
        })?;

        self.require_content_length(parts)?;

        let etag = self.multipart.upload_part(upload_id, part_number, body).await?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(ETAG, etag)
            .header(CONTENT_LENGTH, 0)
            .body(empty_body())?)
    }

    async fn handle_complete_multipart<B>(
        &self,
        upload_id: &str,
        body: B,
    ) -> Result<Response<ByteStreamBody>, SandbarError>
    where
        B: http_body::Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Display,
    {
        // The client's part manifest is read and discarded; the server-side
        // registry is authoritative for which parts exist and their order.
        drain_body(body).await;

        let (bucket, key, etag) = self.multipart.complete_upload(upload_id, &self.store).await?;

        let location = format!("/{}/{}", bucket, key);
        let xml =
            CompleteMultipartUploadResponse::new(location, &bucket, &key, &etag).to_xml()?;
        xml_response(StatusCode::OK, xml)
    }

    async fn handle_abort_multipart(
        &self,
        upload_id: &str,
    ) -> Result<Response<ByteStreamBody>, SandbarError> {
        self.multipart.abort_upload(upload_id).await?;
        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(empty_body())?)
    }

    fn handle_preflight(&self) -> Result<Response<ByteStreamBody>, SandbarError> {
        match &self.cors {
            Some(_) => Ok(Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_LENGTH, 0)
                .body(empty_body())?),
            None => Err(SandbarError::MethodNotAllowed),
        }
    }

    /// Validate the Content-Length header for uploads.
    fn require_content_length(&self, parts: &http::request::Parts) -> Result<u64, SandbarError> {
        let header = parts
            .headers
            .get(CONTENT_LENGTH)
            .ok_or(SandbarError::MissingContentLength)?;
        let value = header
            .to_str()
            .map_err(|_| SandbarError::InvalidArgument("Invalid Content-Length".to_string()))?;
        let length: u64 = value.parse().map_err(|_| {
            SandbarError::InvalidArgument(format!("Invalid Content-Length '{}'", value))
        })?;
        if length > self.max_object_size {
            return Err(SandbarError::EntityTooLarge {
                size: length,
                max: self.max_object_size,
            });
        }
        Ok(length)
    }

    /// Render an error as the shared XML error body.
    fn error_response(&self, err: SandbarError, request_id: &str) -> Response<ByteStreamBody> {
        let status = err.status_code();
        let body = ErrorResponse::new(err.code(), err.to_string(), request_id)
            .to_xml()
            .unwrap_or_else(|xml_err| {
                error!(error = %xml_err, "Failed to serialize error response");
                format!("<Error><Code>InternalError</Code><RequestId>{}</RequestId></Error>", request_id)
            });

        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/xml")
            .header(CONTENT_LENGTH, body.len())
            .body(full_body(Bytes::from(body)))
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to build error response");
                let mut response = Response::new(empty_body());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            })
    }

    /// Attach the request id and, when enabled, CORS headers.
    fn finalize(
        &self,
        mut response: Response<ByteStreamBody>,
        request_id: &str,
    ) -> Response<ByteStreamBody> {
        let headers = response.headers_mut();
        if let Ok(value) = http::HeaderValue::from_str(request_id) {
            headers.insert("x-amz-request-id", value);
        }

        if let Some(cors) = &self.cors {
            let pairs = [
                ("Access-Control-Allow-Origin", cors.allow_origin.as_str()),
                ("Access-Control-Allow-Methods", cors.allow_methods.as_str()),
                ("Access-Control-Allow-Headers", cors.allow_headers.as_str()),
                (
                    "Access-Control-Expose-Headers",
                    "ETag, Content-Range, Accept-Ranges",
                ),
            ];
            for (name, value) in pairs {
                if let Ok(value) = http::HeaderValue::from_str(value) {
                    headers.insert(name, value);
                }
            }
            headers.insert(
                "Access-Control-Max-Age",
                http::HeaderValue::from(cors.max_age),
            );
        }

        response
    }
}

/// Parse `/{bucket}/{key}` into a bucket name and url-decoded key.
pub fn parse_object_path(path: &str) -> Result<(String, String), SandbarError> {
    let trimmed = path.trim_start_matches('/');
    let (bucket, key) = trimmed
        .split_once('/')
        .ok_or_else(|| SandbarError::InvalidArgument(format!("Expected /bucket/key, got '{}'", path)))?;

    if bucket.is_empty() || key.is_empty() {
        return Err(SandbarError::InvalidArgument(format!(
            "Expected /bucket/key, got '{}'",
            path
        )));
    }

    let key = urlencoding::decode(key)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| key.to_string());

    Ok((bucket.to_string(), key))
}

fn empty_body() -> ByteStreamBody {
    Full::new(Bytes::new()).map_err(std::io::Error::other).boxed()
}

fn full_body(bytes: Bytes) -> ByteStreamBody {
    Full::new(bytes).map_err(std::io::Error::other).boxed()
}

fn xml_response(
    status: StatusCode,
    xml: String,
) -> Result<Response<ByteStreamBody>, SandbarError> {
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/xml")
        .header(CONTENT_LENGTH, xml.len())
        .body(full_body(Bytes::from(xml)))?)
}

async fn drain_body<B>(mut body: B)
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    while let Some(frame) = body.frame().await {
        if frame.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_path() {
        assert_eq!(
            parse_object_path("/bkt/model.bin").expect("Should parse"),
            ("bkt".to_string(), "model.bin".to_string())
        );
        assert_eq!(
            parse_object_path("/bkt/runs/7/model.bin").expect("Should parse"),
            ("bkt".to_string(), "runs/7/model.bin".to_string())
        );
        assert_eq!(
            parse_object_path("/bkt/name%20with%20spaces").expect("Should parse"),
            ("bkt".to_string(), "name with spaces".to_string())
        );
    }

    #[test]
    fn test_parse_object_path_rejects_bucket_only() {
        assert!(parse_object_path("/bkt").is_err());
        assert!(parse_object_path("/bkt/").is_err());
        assert!(parse_object_path("/").is_err());
    }
}
