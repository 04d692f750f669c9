use crate::{
    error::{ApiSnafu, ArrayError, DecodeSnafu, EndpointSnafu, RequestSnafu},
    models::{
        ArrayInfo, ErrorResponse, ListResponse, PgMember, PgSnapshot, ProtectionGroup, Tag, Volume,
        VolumeSnapshot,
    },
    ArrayOps,
};
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use url::Url;

/// REST api version the client speaks.
const API_VERSION: &str = "2.26";
/// Session token header returned by the login exchange.
const AUTH_HEADER: &str = "x-auth-token";

/// A logged-in client for one array's control plane.
#[derive(Clone)]
pub struct ArrayClient {
    host: String,
    base: Url,
    http: reqwest::Client,
    auth_token: String,
}

impl ArrayClient {
    /// Exchange the api token for a session token and return a ready client.
    pub async fn connect(host: &str, api_token: &str) -> Result<Self, ArrayError> {
        let endpoint = format!("https://{host}/api/{API_VERSION}/");
        let base = Url::parse(&endpoint).context(EndpointSnafu {
            endpoint: endpoint.clone(),
        })?;
        // Arrays commonly run with self-signed management certificates.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .context(RequestSnafu { host })?;

        let login = base.join("login").context(EndpointSnafu { endpoint })?;
        let response = http
            .post(login)
            .header("api-token", api_token)
            .send()
            .await
            .context(RequestSnafu { host })?;
        let status = response.status();
        if !status.is_success() {
            let message = Self::error_message(response).await;
            return ApiSnafu {
                call: "login",
                status: status.as_u16(),
                message,
            }
            .fail();
        }
        let auth_token = response
            .headers()
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(ArrayError::Login {
                host: host.to_string(),
            })?;

        tracing::debug!(array = host, "logged in to array");
        Ok(Self {
            host: host.to_string(),
            base,
            http,
            auth_token,
        })
    }

    /// The array host this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> Result<Url, ArrayError> {
        self.base.join(path).context(EndpointSnafu {
            endpoint: format!("{}{path}", self.base),
        })
    }

    async fn error_message(response: reqwest::Response) -> String {
        match response.json::<ErrorResponse>().await {
            Ok(body) => body
                .errors
                .into_iter()
                .next()
                .map(|error| error.message)
                .unwrap_or_else(|| "no error detail provided".to_string()),
            Err(_) => "no error detail provided".to_string(),
        }
    }

    async fn get_items<T: DeserializeOwned>(
        &self,
        call: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ArrayError> {
        let response = self
            .http
            .get(self.url(path)?)
            .header(AUTH_HEADER, &self.auth_token)
            .query(query)
            .send()
            .await
            .context(RequestSnafu { host: &self.host })?;
        let status = response.status();
        if !status.is_success() {
            let message = Self::error_message(response).await;
            return ApiSnafu {
                call,
                status: status.as_u16(),
                message,
            }
            .fail();
        }
        let body: ListResponse<T> = response.json().await.context(DecodeSnafu { call })?;
        Ok(body.items)
    }

    async fn send_mutation(
        &self,
        call: &'static str,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: serde_json::Value,
    ) -> Result<(), ArrayError> {
        let response = self
            .http
            .request(method, self.url(path)?)
            .header(AUTH_HEADER, &self.auth_token)
            .query(query)
            .json(&body)
            .send()
            .await
            .context(RequestSnafu { host: &self.host })?;
        let status = response.status();
        if !status.is_success() {
            let message = Self::error_message(response).await;
            return ApiSnafu {
                call,
                status: status.as_u16(),
                message,
            }
            .fail();
        }
        Ok(())
    }
}

fn csv(names: &[String]) -> String {
    names.join(",")
}

#[async_trait::async_trait]
impl ArrayOps for ArrayClient {
    async fn array_name(&self) -> Result<String, ArrayError> {
        let arrays: Vec<ArrayInfo> = self.get_items("get_arrays", "arrays", &[]).await?;
        arrays
            .into_iter()
            .next()
            .map(|info| info.name)
            .ok_or(ArrayError::Api {
                call: "get_arrays",
                status: 200,
                message: "array returned no identity".to_string(),
            })
    }

    async fn check_connectivity(&self) -> Result<(), ArrayError> {
        let _: Vec<Volume> = self
            .get_items("get_volumes", "volumes", &[("limit", "1".to_string())])
            .await?;
        Ok(())
    }

    async fn pg_snapshots(&self, pg: &str) -> Result<Vec<PgSnapshot>, ArrayError> {
        self.get_items(
            "get_protection_group_snapshots",
            "protection-group-snapshots",
            &[("source_names", pg.to_string())],
        )
        .await
    }

    async fn create_pg_snapshot(
        &self,
        pg: &str,
        suffix: &str,
        replicate: bool,
    ) -> Result<(), ArrayError> {
        self.send_mutation(
            "post_protection_group_snapshots",
            reqwest::Method::POST,
            "protection-group-snapshots",
            &[("source_names", pg.to_string())],
            serde_json::json!({
                "suffix": suffix,
                "replicate": replicate,
                "eradication_config": { "manual_eradication": "enabled" },
            }),
        )
        .await
    }

    async fn pg_members(&self, pg: &str) -> Result<Vec<PgMember>, ArrayError> {
        self.get_items(
            "get_protection_groups_volumes",
            "protection-groups/volumes",
            &[("group_names", pg.to_string())],
        )
        .await
    }

    async fn volume_snapshots(
        &self,
        source_names: Option<&[String]>,
    ) -> Result<Vec<VolumeSnapshot>, ArrayError> {
        let query = match source_names {
            Some(names) => vec![("source_names", csv(names))],
            None => vec![],
        };
        self.get_items("get_volume_snapshots", "volume-snapshots", &query)
            .await
    }

    async fn volumes_space(&self, names: &[String]) -> Result<Vec<Volume>, ArrayError> {
        self.get_items(
            "get_volumes_space",
            "volumes/space",
            &[("names", csv(names))],
        )
        .await
    }

    async fn volume_tags(&self, name: &str) -> Result<Vec<Tag>, ArrayError> {
        self.get_items(
            "get_volumes_tags",
            "volumes/tags",
            &[("resource_names", name.to_string())],
        )
        .await
    }

    async fn tag_volumes(&self, names: &[String], tags: &[Tag]) -> Result<(), ArrayError> {
        self.send_mutation(
            "put_volumes_tags_batch",
            reqwest::Method::PUT,
            "volumes/tags/batch",
            &[("resource_names", csv(names))],
            serde_json::to_value(tags).unwrap_or_default(),
        )
        .await
    }

    async fn snapshot_tags(&self, name: &str) -> Result<Vec<Tag>, ArrayError> {
        self.get_items(
            "get_volume_snapshots_tags",
            "volume-snapshots/tags",
            &[("resource_names", name.to_string())],
        )
        .await
    }

    async fn tag_snapshots(&self, names: &[String], tags: &[Tag]) -> Result<(), ArrayError> {
        self.send_mutation(
            "put_volume_snapshots_tags_batch",
            reqwest::Method::PUT,
            "volume-snapshots/tags/batch",
            &[("resource_names", csv(names))],
            serde_json::to_value(tags).unwrap_or_default(),
        )
        .await
    }

    async fn overwrite_volume(&self, target: &str, source_snapshot: &str) -> Result<(), ArrayError> {
        self.send_mutation(
            "post_volumes",
            reqwest::Method::POST,
            "volumes",
            &[
                ("names", target.to_string()),
                ("overwrite", "true".to_string()),
            ],
            serde_json::json!({ "source": { "name": source_snapshot } }),
        )
        .await
    }

    async fn protection_groups(&self, names: &[String]) -> Result<Vec<ProtectionGroup>, ArrayError> {
        self.get_items(
            "get_protection_groups",
            "protection-groups",
            &[("names", csv(names))],
        )
        .await
    }
}
