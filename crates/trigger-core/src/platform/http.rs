use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Credential, FlowPage, PageToken, PlatformClient, PlatformSettings};
use crate::error::{PlatformError, PlatformResult};
use crate::model::{FlowConfig, FlowConfigId, FlowSummary, TableDetail, Trigger, TriggerDefinition};

/// Header carrying the Storage API token.
pub const TOKEN_HEADER: &str = "X-StorageApi-Token";

const MAX_ERROR_BODY_CHARS: usize = 300;

/// [`PlatformClient`] backed by the Storage API (`{base_url}/v2/storage`).
pub struct HttpPlatformClient {
    client: Client,
    base_url: Url,
    credential: Credential,
    flow_component: String,
    page_size: u32,
}

impl HttpPlatformClient {
    pub fn new(settings: PlatformSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url,
            credential: settings.credential,
            flow_component: settings.flow_component,
            page_size: settings.page_size.max(1),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> PlatformResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| PlatformError::Decode {
                reason: format!("base url `{}` cannot carry a path", self.base_url),
            })?;
            path.pop_if_empty()
                .extend(["v2", "storage"])
                .extend(segments);
        }
        Ok(url)
    }

    async fn execute(&self, request: RequestBuilder, resource: &str) -> PlatformResult<Response> {
        let response = request
            .header(TOKEN_HEADER, self.credential.expose())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(%status, resource, "platform request failed");
        Err(status_error(status, resource, &body))
    }

    fn flow_configs(&self) -> [&str; 3] {
        ["components", self.flow_component.as_str(), "configs"]
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn list_flows(&self, page: Option<&PageToken>) -> PlatformResult<FlowPage> {
        let offset = match page {
            Some(token) => token
                .as_str()
                .parse::<u64>()
                .map_err(|_| PlatformError::Decode {
                    reason: format!("invalid page token `{}`", token.as_str()),
                })?,
            None => 0,
        };
        let url = self.endpoint(&self.flow_configs())?;
        let request = self
            .client
            .get(url)
            .query(&[("limit", u64::from(self.page_size)), ("offset", offset)]);
        let response = self.execute(request, "flow listing").await?;
        let flows: Vec<FlowSummary> = decode(response, "flow listing").await?;
        // A short page is the last one. A page longer than requested means the
        // endpoint ignored the limit and returned everything at once.
        let next = (flows.len() == self.page_size as usize)
            .then(|| PageToken::new((offset + flows.len() as u64).to_string()));
        Ok(FlowPage { flows, next })
    }

    async fn get_flow(&self, flow_id: &FlowConfigId) -> PlatformResult<FlowConfig> {
        let resource = format!("flow `{flow_id}`");
        let [components, component, configs] = self.flow_configs();
        let url = self.endpoint(&[components, component, configs, flow_id.as_str()])?;
        let response = self.execute(self.client.get(url), &resource).await?;
        decode(response, &resource).await
    }

    async fn get_trigger(&self, flow_id: &FlowConfigId) -> PlatformResult<Option<Trigger>> {
        let url = self.endpoint(&["triggers"])?;
        let response = self.execute(self.client.get(url), "trigger listing").await?;
        let triggers: Vec<Trigger> = decode(response, "trigger listing").await?;
        let mut matching = triggers.into_iter().filter(|trigger| {
            &trigger.configuration_id == flow_id && trigger.component == self.flow_component
        });
        let found = matching.next();
        if let Some(extra) = matching.next() {
            let first = found.map(|trigger| trigger.id.to_string()).unwrap_or_default();
            return Err(PlatformError::Conflict {
                reason: format!(
                    "flow `{flow_id}` has more than one trigger ({first} and {})",
                    extra.id
                ),
            });
        }
        Ok(found)
    }

    async fn delete_trigger(&self, trigger: &Trigger) -> PlatformResult<()> {
        let resource = format!("trigger `{}`", trigger.id);
        let url = self.endpoint(&["triggers", trigger.id.as_str()])?;
        self.execute(self.client.delete(url), &resource).await?;
        debug!(trigger_id = %trigger.id, flow_id = %trigger.configuration_id, "trigger deleted");
        Ok(())
    }

    async fn create_trigger(
        &self,
        flow_id: &FlowConfigId,
        definition: &TriggerDefinition,
    ) -> PlatformResult<Trigger> {
        let resource = format!("trigger for flow `{flow_id}`");
        let url = self.endpoint(&["triggers"])?;
        let response = self
            .execute(self.client.post(url).json(definition), &resource)
            .await?;
        let trigger: Trigger = decode(response, &resource).await?;
        debug!(trigger_id = %trigger.id, %flow_id, "trigger created");
        Ok(trigger)
    }

    async fn get_table(&self, table_id: &str) -> PlatformResult<Option<TableDetail>> {
        let resource = format!("table `{table_id}`");
        let url = self.endpoint(&["tables", table_id])?;
        match self.execute(self.client.get(url), &resource).await {
            Ok(response) => decode(response, &resource).await.map(Some),
            Err(PlatformError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response, resource: &str) -> PlatformResult<T> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|err| PlatformError::Decode {
        reason: format!("{resource}: {err}"),
    })
}

fn transport_error(err: reqwest::Error) -> PlatformError {
    if err.is_builder() {
        // status 0: the request never left the client
        return PlatformError::Rejected {
            status: 0,
            reason: err.to_string(),
        };
    }
    PlatformError::Transient {
        reason: err.to_string(),
    }
}

fn status_error(status: StatusCode, resource: &str, body: &str) -> PlatformError {
    let reason = error_message(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Unauthorized { reason },
        StatusCode::NOT_FOUND => PlatformError::not_found(resource),
        StatusCode::CONFLICT => PlatformError::Conflict { reason },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            PlatformError::Transient { reason }
        }
        status if status.is_server_error() => PlatformError::Transient { reason },
        status => PlatformError::Rejected {
            status: status.as_u16(),
            reason,
        },
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    code: Option<Value>,
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(ApiErrorBody {
        error: Some(error),
        code,
    }) = serde_json::from_str::<ApiErrorBody>(body)
    {
        return match code {
            Some(Value::String(code)) => format!("{error}. Exception code {code}"),
            Some(code) if !code.is_null() => format!("{error}. Exception code {code}"),
            _ => error,
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
    }
}
