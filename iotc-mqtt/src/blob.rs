//! File upload through the IoT Hub HTTPS API: request a SAS URI for the
//! blob, PUT the content to storage, then notify the hub of the outcome.

use iotc_client_base::{BlobSource, ClientError, ClientResult};
use iotc_protocol::auth::sas::SasToken;
use iotc_protocol::HUB_API_VERSION;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FileUploadRequest<'a> {
    blob_name: &'a str,
}

/// Where the hub lets the device write the blob
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FileUploadSas {
    correlation_id: String,
    host_name: String,
    container_name: String,
    blob_name: String,
    sas_token: String,
}

impl FileUploadSas {
    fn blob_url(&self) -> String {
        format!(
            "https://{}/{}/{}{}",
            self.host_name, self.container_name, self.blob_name, self.sas_token
        )
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct UploadNotification<'a> {
    correlation_id: &'a str,
    is_success: bool,
    status_code: u16,
    status_description: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct BlobClient {
    http: Client,
}

impl BlobClient {
    pub fn new(http: Client) -> BlobClient {
        BlobClient { http }
    }

    pub async fn upload(
        &self,
        hostname: &str,
        device_id: &str,
        token: &SasToken,
        blob_name: &str,
        source: BlobSource,
        size: Option<u64>,
    ) -> ClientResult<()> {
        let files_url = format!("https://{}/devices/{}/files", hostname, device_id);

        let response = self
            .http
            .post(format!("{}?api-version={}", files_url, HUB_API_VERSION))
            .header(AUTHORIZATION, token.as_str())
            .json(&FileUploadRequest { blob_name })
            .send()
            .await
            .map_err(http_error)?;
        let sas: FileUploadSas = check_status(response)
            .await?
            .json()
            .await
            .map_err(http_error)?;
        debug!("Uploading {} to {}", blob_name, sas.host_name);

        let mut put = self
            .http
            .put(sas.blob_url())
            .header(BLOB_TYPE_HEADER, "BlockBlob");
        if let Some(size) = size {
            put = put.header(CONTENT_LENGTH, size);
        }
        let put = put.body(blob_body(source, size).await?).send().await;
        let (status_code, status_description) = match &put {
            Ok(response) => (response.status().as_u16(), response.status().to_string()),
            Err(e) => (500, e.to_string()),
        };
        let is_success = (200..300).contains(&status_code);

        let notification = UploadNotification {
            correlation_id: &sas.correlation_id,
            is_success,
            status_code,
            status_description: &status_description,
        };
        let notified = self
            .http
            .post(format!("{}/notifications?api-version={}", files_url, HUB_API_VERSION))
            .header(AUTHORIZATION, token.as_str())
            .json(&notification)
            .send()
            .await
            .map_err(http_error)?;
        check_status(notified).await?;

        if is_success {
            Ok(())
        } else {
            Err(ClientError::Rejected {
                status: status_code,
                message: status_description,
            })
        }
    }
}

/// Streams `source` when its length is known. Block blobs need a
/// Content-Length, so a source of unknown size is read into memory first.
async fn blob_body(mut source: BlobSource, size: Option<u64>) -> ClientResult<Body> {
    if size.is_some() {
        return Ok(Body::wrap_stream(ReaderStream::new(source)));
    }

    let mut content = Vec::new();
    source.read_to_end(&mut content).await?;
    Ok(Body::from(content))
}

async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn http_error(error: reqwest::Error) -> ClientError {
    ClientError::Transport(error.to_string())
}
