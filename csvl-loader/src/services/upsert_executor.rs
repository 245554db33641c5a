//! Upsert executor
//!
//! Applies one resource document to the remote store:
//!
//! 1. Validate against the output schema (terminal on failure, never retried)
//! 2. Derive the match key (`name` or `identifiers.<update_key>`)
//! 3. Upsert the resource
//! 4. Scope it to the run's project
//! 5. Provision its redirector when a redirect URL applies
//! 6. Download the redirector's QR image when configured (best effort)
//!
//! Each remote call runs under its own retry loop. Whatever goes wrong, the
//! result is an [`UpsertOutcome`] for this record only; nothing propagates to
//! sibling records.

use crate::error::{LoaderError, LoaderResult};
use crate::models::{AppliedResource, ResourceDocument, UpsertOutcome};
use crate::services::remote_client::{
    ContainerRef, MatchKey, RemoteClient, RemoteError, ResourceKind, SecondaryResource,
};
use crate::services::schema_check::{summarize, SchemaCheck};
use crate::utils::{retry_with, RetryFailure, RetryPolicy};
use csvl_common::config::TomlConfig;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Update key that selects name matching
pub const NAME_UPDATE_KEY: &str = "name";

/// QR image download settings
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSettings {
    pub output_dir: PathBuf,
    /// URL with `{shortDomain}` and `{shortId}` placeholders
    pub url_template: String,
}

impl ArtifactSettings {
    pub fn image_url(&self, secondary: &SecondaryResource) -> Option<String> {
        let short_id = secondary.short_id.as_deref()?;
        let short_domain = secondary.short_domain.as_deref()?;
        Some(
            self.url_template
                .replace("{shortDomain}", short_domain)
                .replace("{shortId}", short_id),
        )
    }

    /// `<output_dir>/<identity>_<shortId>.png`, identity made filename-safe
    pub fn image_path(&self, identity: &str, short_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.png", sanitize_file_stem(identity), sanitize_file_stem(short_id)))
    }
}

/// Per-run executor settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    pub kind: ResourceKind,
    pub update_key: String,
    pub default_redirect_url: Option<String>,
    pub artifacts: Option<ArtifactSettings>,
    pub retry: RetryPolicy,
}

impl ExecutorSettings {
    /// Settings with defaults for everything but the resource type
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            update_key: NAME_UPDATE_KEY.to_string(),
            default_redirect_url: None,
            artifacts: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &TomlConfig) -> LoaderResult<Self> {
        let kind = config
            .output
            .resource_type
            .parse::<ResourceKind>()
            .map_err(LoaderError::Config)?;

        let artifacts = config.output.download_qr_codes.then(|| ArtifactSettings {
            output_dir: config.output.qr_output_dir.clone(),
            url_template: config.output.qr_image_template.clone(),
        });

        Ok(Self {
            kind,
            update_key: config.output.update_key.clone(),
            default_redirect_url: config
                .output
                .default_redirect_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            artifacts,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }
}

/// Why a record could not be applied
#[derive(Debug, Error)]
enum ApplyError {
    #[error("{0}")]
    Validation(String),

    #[error("Resource has no identifiers.{0} to match on")]
    MissingUpdateKey(String),

    #[error("Resource has no name to match on")]
    MissingName,

    #[error("{step} failed: {failure}")]
    Remote {
        step: &'static str,
        failure: RetryFailure<RemoteError>,
    },
}

/// Applies documents against one remote client and project
pub struct UpsertExecutor<'a> {
    settings: &'a ExecutorSettings,
    client: &'a dyn RemoteClient,
    container: &'a ContainerRef,
    output_schema: &'a dyn SchemaCheck,
}

impl<'a> UpsertExecutor<'a> {
    pub fn new(
        settings: &'a ExecutorSettings,
        client: &'a dyn RemoteClient,
        container: &'a ContainerRef,
        output_schema: &'a dyn SchemaCheck,
    ) -> Self {
        Self {
            settings,
            client,
            container,
            output_schema,
        }
    }

    /// Apply one document; never fails, only reports
    pub async fn apply(&self, document: &ResourceDocument) -> UpsertOutcome {
        let identity = document.display_name().to_string();

        match self.try_apply(document, &identity).await {
            Ok(applied) => {
                debug!(
                    ordinal = document.ordinal,
                    identity = %identity,
                    remote_id = %applied.remote_id,
                    attempts = applied.upsert_attempts,
                    "Resource applied"
                );
                UpsertOutcome::success(document.ordinal, identity, applied)
            }
            Err(e) => {
                warn!(
                    ordinal = document.ordinal,
                    identity = %identity,
                    error = %e,
                    "Resource failed"
                );
                UpsertOutcome::failure(document.ordinal, identity, e.to_string())
            }
        }
    }

    async fn try_apply(
        &self,
        document: &ResourceDocument,
        identity: &str,
    ) -> Result<AppliedResource, ApplyError> {
        let violations = self.output_schema.check(&document.payload());
        if !violations.is_empty() {
            return Err(ApplyError::Validation(summarize(identity, &violations)));
        }

        let key = self.match_key(document)?;
        let payload = document.payload();
        let kind = self.settings.kind;
        let policy = &self.settings.retry;

        let upserted = retry_with(
            &format!("upsert {}", kind),
            policy,
            RemoteError::retry_decision,
            || self.client.upsert(kind, &payload, &key),
        )
        .await
        .map_err(|failure| ApplyError::Remote { step: "Upsert", failure })?;

        let remote_id = upserted.value.id;

        retry_with(
            "update scope",
            policy,
            RemoteError::retry_decision,
            || self.client.update_scope(kind, &remote_id, self.container),
        )
        .await
        .map_err(|failure| ApplyError::Remote { step: "Project scope update", failure })?;

        let mut applied = AppliedResource {
            remote_id,
            upsert_attempts: upserted.attempts,
            short_id: None,
            artifact: None,
        };

        let redirect_url = document
            .redirect_url()
            .or(self.settings.default_redirect_url.as_deref());

        if let Some(url) = redirect_url {
            let redirector_payload = json!({ "defaultRedirectUrl": url });
            let secondary = retry_with(
                "upsert redirector",
                policy,
                RemoteError::retry_decision,
                || {
                    self.client
                        .upsert_secondary(kind, &applied.remote_id, &redirector_payload)
                },
            )
            .await
            .map_err(|failure| ApplyError::Remote { step: "Redirector", failure })?
            .value;

            applied.short_id = secondary.short_id.clone();

            if let Some(artifacts) = &self.settings.artifacts {
                applied.artifact = self.download_artifact(artifacts, identity, &secondary).await;
            }
        }

        Ok(applied)
    }

    fn match_key(&self, document: &ResourceDocument) -> Result<MatchKey, ApplyError> {
        let update_key = self.settings.update_key.as_str();

        if update_key == NAME_UPDATE_KEY {
            return document
                .str_field(NAME_UPDATE_KEY)
                .filter(|name| !name.is_empty())
                .map(|name| MatchKey::Name(name.to_string()))
                .ok_or(ApplyError::MissingName);
        }

        document
            .body
            .get("identifiers")
            .and_then(|ids| ids.get(update_key))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(|value| MatchKey::Identifier {
                key: update_key.to_string(),
                value: value.to_string(),
            })
            .ok_or_else(|| ApplyError::MissingUpdateKey(update_key.to_string()))
    }

    /// Fetch and persist the QR image; failures are logged, never returned
    async fn download_artifact(
        &self,
        artifacts: &ArtifactSettings,
        identity: &str,
        secondary: &SecondaryResource,
    ) -> Option<PathBuf> {
        let (Some(url), Some(short_id)) = (artifacts.image_url(secondary), secondary.short_id.as_deref())
        else {
            warn!(identity, "Redirector has no short link, skipping QR download");
            return None;
        };

        let bytes = match retry_with(
            "download QR image",
            &self.settings.retry,
            RemoteError::retry_decision,
            || self.client.fetch_bytes(&url),
        )
        .await
        {
            Ok(retried) => retried.value,
            Err(failure) => {
                warn!(identity, url = %url, error = %failure, "QR image download failed");
                return None;
            }
        };

        let path = artifacts.image_path(identity, short_id);
        match write_artifact(&path, &bytes).await {
            Ok(()) => {
                info!(identity, path = %path.display(), "QR image saved");
                Some(path)
            }
            Err(e) => {
                warn!(identity, path = %path.display(), error = %e, "Failed to save QR image");
                None
            }
        }
    }
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// Replace characters that are unsafe in file names
fn sanitize_file_stem(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "resource".to_string()
    } else {
        cleaned.to_string()
    }
}
